//! Construction de l'arbre des dossiers d'un volume monté.
//!
//! Parcours en profondeur sur une pile explicite. Les nœuds restent dans une
//! arène plate pendant le parcours et ne deviennent des [`Dir`] qu'une fois
//! tous les dossiers lus : un `Dir` rendu est toujours complet.

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use core::mem;
use log::{trace, warn};

use crate::binding::{TagRef, Walk};
use crate::config::{ErrorPolicy, TreeConfig};
use crate::filesystem::Fat32FileSystem;
use crate::{BlockDevice, Fat32Error, Result};

/// Un fichier. Son contenu se lit à la demande depuis `first_cluster`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name: String,
    pub size: u32,
    pub first_cluster: u32,
}

/// Un dossier et tout ce qu'il contient, dans l'ordre du disque.
/// Les noms en double restent des nœuds distincts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dir {
    pub name: String,
    pub files: Vec<File>,
    pub dirs: Vec<Dir>,
}

impl Dir {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Fichiers à tous les niveaux sous ce dossier
    pub fn file_count(&self) -> usize {
        self.files.len() + self.dirs.iter().map(Dir::file_count).sum::<usize>()
    }

    /// Dossiers sous celui-ci, sans le compter
    pub fn dir_count(&self) -> usize {
        self.dirs.len() + self.dirs.iter().map(Dir::dir_count).sum::<usize>()
    }

    /// Somme des tailles de fichiers sous ce dossier
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size as u64).sum::<u64>()
            + self.dirs.iter().map(Dir::total_size).sum::<u64>()
    }

    /// Nœud au chemin relatif `path` (séparé par `/`), comparaison exacte.
    /// En cas de doublon, le premier gagne.
    pub fn get(&self, path: &str) -> Option<TagRef<'_>> {
        let mut current = self;
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                if let Some(dir) = current.dirs.iter().find(|d| d.name == component) {
                    return Some(TagRef::Dir(dir));
                }
                return current
                    .files
                    .iter()
                    .find(|f| f.name == component)
                    .map(TagRef::File);
            }
            current = current.dirs.iter().find(|d| d.name == component)?;
        }
        Some(TagRef::Dir(current))
    }

    /// Parcours préfixe de tous les nœuds sous ce dossier, avec leur chemin
    pub fn walk(&self) -> Walk<'_> {
        Walk::new(self)
    }
}

/// Sous-arbre omis avec [`ErrorPolicy::SkipSubtree`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSubtree {
    pub path: String,
    pub error: Fat32Error,
}

/// Résultat d'un parcours : l'arbre et ce qui a été omis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub root: Dir,
    pub skipped: Vec<SkippedSubtree>,
}

#[derive(Default)]
struct ArenaDir {
    name: String,
    cluster: u32,
    parent: Option<usize>,
    files: Vec<File>,
    dirs: Vec<usize>,
    failed: bool,
}

struct Task {
    node: usize,
    depth: usize,
    path: String,
}

fn child_path(parent: &str, name: &str) -> String {
    let mut path = String::from(parent.trim_end_matches('/'));
    path.push('/');
    path.push_str(name);
    path
}

/// Vrai si `cluster` apparaît déjà entre `node` et la racine
fn on_ancestry(arena: &[ArenaDir], mut node: usize, cluster: u32) -> bool {
    loop {
        if arena[node].cluster == cluster {
            return true;
        }
        match arena[node].parent {
            Some(parent) => node = parent,
            None => return false,
        }
    }
}

/// Arbre sous `cluster` avec les réglages par défaut. Toute erreur arrête.
pub fn materialize<D: BlockDevice>(fs: &Fat32FileSystem<D>, cluster: u32) -> Result<Dir> {
    materialize_with(fs, cluster, &TreeConfig::default()).map(|m| m.root)
}

pub fn materialize_with<D: BlockDevice>(
    fs: &Fat32FileSystem<D>,
    cluster: u32,
    config: &TreeConfig<'_>,
) -> Result<Materialized> {
    let mut arena = Vec::new();
    arena.push(ArenaDir {
        name: String::from("/"),
        cluster,
        ..ArenaDir::default()
    });
    let mut stack = Vec::new();
    stack.push(Task {
        node: 0,
        depth: 0,
        path: String::from("/"),
    });
    let mut skipped = Vec::new();
    let mut visited = BTreeSet::new();

    while let Some(task) = stack.pop() {
        let result = expand(fs, config, &mut arena, &mut visited, &task);
        match result {
            Ok(children) => stack.extend(children.into_iter().rev()),
            Err(error) => {
                let local = config.on_error == ErrorPolicy::SkipSubtree && error.is_subtree_local();
                if !local || task.node == 0 {
                    return Err(error);
                }
                warn!("{} omis: {}", task.path, error);
                arena[task.node].failed = true;
                skipped.push(SkippedSubtree {
                    path: task.path,
                    error,
                });
            }
        }
    }

    Ok(Materialized {
        root: assemble(arena),
        skipped,
    })
}

/// Lire un dossier dans son nœud de l'arène et renvoyer les tâches de ses
/// sous-dossiers
fn expand<D: BlockDevice>(
    fs: &Fat32FileSystem<D>,
    config: &TreeConfig<'_>,
    arena: &mut Vec<ArenaDir>,
    visited: &mut BTreeSet<u32>,
    task: &Task,
) -> Result<Vec<Task>> {
    let too_deep = || Fat32Error::PathTooDeep {
        path: task.path.clone(),
        limit: config.max_depth,
    };
    if task.depth > config.max_depth {
        return Err(too_deep());
    }
    let node = task.node;
    if let Some(parent) = arena[node].parent {
        // un dossier qui contient un de ses ancêtres est infiniment profond
        if on_ancestry(arena, parent, arena[node].cluster) {
            return Err(too_deep());
        }
    }
    let cluster = arena[node].cluster;
    // pas de liens physiques en FAT : un dossier atteint deux fois est croisé
    if !visited.insert(cluster) {
        warn!("{}: cluster de dossier {} déjà parcouru", task.path, cluster);
        return Err(Fat32Error::CorruptChain {
            start: cluster,
            cluster,
        });
    }

    let entries = fs.read_directory(cluster, config, &task.path)?;
    let mut children = Vec::new();
    for entry in entries {
        if entry.is_dot() || entry.is_volume_label() {
            continue;
        }
        if entry.is_directory() {
            let index = arena.len();
            children.push(Task {
                node: index,
                depth: task.depth + 1,
                path: child_path(&task.path, &entry.name),
            });
            arena.push(ArenaDir {
                name: entry.name,
                cluster: entry.first_cluster,
                parent: Some(node),
                ..ArenaDir::default()
            });
            arena[node].dirs.push(index);
        } else {
            trace!("{}: fichier {} ({} octets)", task.path, entry.name, entry.size);
            arena[node].files.push(File {
                name: entry.name,
                size: entry.size,
                first_cluster: entry.first_cluster,
            });
        }
    }
    Ok(children)
}

/// Transformer l'arène en nœuds possédés. Un enfant a toujours un indice
/// plus grand que son parent : un balayage à rebours le trouve déjà construit.
fn assemble(mut arena: Vec<ArenaDir>) -> Dir {
    let mut built: Vec<Option<Dir>> = Vec::with_capacity(arena.len());
    built.resize_with(arena.len(), || None);
    for index in (0..arena.len()).rev() {
        let node = mem::take(&mut arena[index]);
        if node.failed {
            continue;
        }
        let dirs = node.dirs.iter().filter_map(|&child| built[child].take()).collect();
        built[index] = Some(Dir {
            name: node.name,
            files: node.files,
            dirs,
        });
    }
    built[0].take().unwrap_or_default()
}
