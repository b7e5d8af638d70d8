// CLI pour parcourir une image FAT32
use std::env;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::process;

use fat32_tree::{
    Dir, ErrorPolicy, Fat32FileSystem, IoFault, SectorStream, SharedDevice, TagRef, TreeConfig,
};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Taille de secteur supposée pour les fichiers image
const SECTOR_SIZE: usize = 512;

/// Fichier image lu via son curseur
struct FileStream {
    file: File,
    len: u64,
}

impl FileStream {
    fn open(path: &str) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl SectorStream for FileStream {
    fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> Result<(), IoFault> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|_| IoFault::Medium)?;
        self.file.read_exact(buffer).map_err(|_| IoFault::Medium)
    }

    fn byte_len(&self) -> u64 {
        self.len
    }
}

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        };
        eprintln!("[{tag:5}] {}", record.args());
    }

    fn flush(&self) {}
}

fn init_logger(verbosity: usize) {
    let from_env = env::var("FAT32_TREE_LOG")
        .ok()
        .and_then(|level| level.parse::<LevelFilter>().ok());
    let level = from_env.unwrap_or(match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn print_help(program: &str) {
    println!("FAT32 tree");
    println!();
    println!("Usage: {} <image> [options] [commande] [args]", program);
    println!();
    println!("Commandes:");
    println!("  tree             Affiche l'arbre complet (par défaut)");
    println!("  ls [chemin]      Liste les fichiers");
    println!("  cat <fichier>    Affiche un fichier");
    println!("  info             Affiche la géométrie du volume");
    println!();
    println!("Options:");
    println!("  --max-depth <n>  Profondeur maximale pour tree");
    println!("  --keep-going     Omet les sous-arbres illisibles au lieu d'échouer");
    println!("  -v, -vv          Plus de logs (ou FAT32_TREE_LOG)");
    println!();
    println!("Exemples:");
    println!("  {} disk.img", program);
    println!("  {} disk.img ls /docs", program);
    println!("  {} disk.img cat /readme.txt", program);
}

struct Options {
    image: String,
    command: Vec<String>,
    max_depth: Option<usize>,
    keep_going: bool,
    verbosity: usize,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut positional = Vec::new();
    let mut max_depth = None;
    let mut keep_going = false;
    let mut verbosity = 0;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--max-depth" => {
                let value = iter.next().ok_or("--max-depth attend une valeur")?;
                max_depth = Some(
                    value
                        .parse()
                        .map_err(|_| format!("profondeur invalide: {value}"))?,
                );
            }
            "--keep-going" => keep_going = true,
            "-v" => verbosity += 1,
            "-vv" => verbosity += 2,
            _ => positional.push(arg.clone()),
        }
    }

    let mut positional = positional.into_iter();
    let image = positional.next().ok_or("chemin de l'image manquant")?;
    Ok(Options {
        image,
        command: positional.collect(),
        max_depth,
        keep_going,
        verbosity,
    })
}

fn print_tree(root: &Dir) {
    println!("/");
    for (_, depth, node) in root.walk() {
        let indent = "  ".repeat(depth + 1);
        match node {
            TagRef::Dir(dir) => println!("{indent}{}/", dir.name),
            TagRef::File(file) => println!("{indent}{} ({} octets)", file.name, file.size),
        }
    }
    println!(
        "{} dossiers, {} fichiers, {} octets",
        root.dir_count(),
        root.file_count(),
        root.total_size()
    );
}

fn run(options: &Options, program: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stream = FileStream::open(&options.image)
        .map_err(|e| format!("impossible d'ouvrir '{}': {}", options.image, e))?;
    let fs = Fat32FileSystem::new(SharedDevice::new(stream, SECTOR_SIZE))?;

    let cmd = options.command.first().map(|s| s.as_str()).unwrap_or("tree");
    let arg = options.command.get(1).map(|s| s.as_str());

    match cmd {
        "tree" => {
            let mut config = TreeConfig::default();
            if let Some(depth) = options.max_depth {
                config = config.with_max_depth(depth);
            }
            if options.keep_going {
                config = config.with_policy(ErrorPolicy::SkipSubtree);
            }
            let result = fs.materialize_with(fs.volume().root_cluster, &config)?;
            print_tree(&result.root);
            for skipped in &result.skipped {
                eprintln!("omis {}: {}", skipped.path, skipped.error);
            }
        }

        "ls" => {
            let entries = fs.list_dir(arg)?;
            if entries.is_empty() {
                println!("(vide)");
            }
            for entry in entries {
                let type_str = if entry.is_directory() { "DIR " } else { "FICH" };
                println!("{} {:>10}  {}", type_str, entry.size, entry.name);
            }
        }

        "cat" => {
            let Some(path) = arg else {
                return Err(format!("usage: {} <image> cat <fichier>", program).into());
            };
            let data = fs.read_file(path)?;
            io::stdout().write_all(&data)?;
        }

        "info" => {
            let volume = fs.volume();
            println!("Nom OEM:             {}", volume.oem_name());
            println!("Nom du volume:       {}", volume.label());
            println!("Id du volume:        {:08X}", volume.volume_id);
            println!("Octets par secteur:  {}", volume.bytes_per_sector);
            println!("Secteurs/cluster:    {}", volume.sectors_per_cluster);
            println!("Secteurs réservés:   {}", volume.reserved_sectors);
            println!("FATs:                {} x {} secteurs", volume.fat_count, volume.sectors_per_fat);
            println!("Secteurs au total:   {}", volume.total_sectors);
            println!("Clusters:            {}", volume.cluster_count());
            println!("Cluster racine:      {}", volume.root_cluster);
            if let Some(info) = fs.fs_info() {
                if let Some(free) = info.free_clusters {
                    println!("Clusters libres:     {}", free);
                }
            }
        }

        _ => {
            print_help(program);
            return Err(format!("commande inconnue: {}", cmd).into());
        }
    }
    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(|s| s.as_str()).unwrap_or("fat32-tree");

    if args.len() < 2 || args.iter().any(|a| a == "-h" || a == "--help") {
        print_help(program);
        return;
    }

    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Erreur: {}", e);
            process::exit(2);
        }
    };
    init_logger(options.verbosity);

    if let Err(e) = run(&options, program) {
        eprintln!("Erreur: {}", e);
        process::exit(1);
    }
}
