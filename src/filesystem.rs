//! Un volume FAT32 monté : le device et sa géométrie

use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use log::{debug, warn};

use crate::boot_sector::{BootSector, FsInfo};
use crate::directory::{DirectoryDecoder, DirectoryEntry, FileAttributes};
use crate::fat_table::{ClusterChain, FatTable};
use crate::tree::{self, Dir, Materialized};
use crate::{BlockDevice, Fat32Error, Result, TreeConfig, Volume, parse_boot_sector};

/// Lire `count` secteurs du volume, traduits en secteurs du device
pub(crate) fn read_volume_sectors<D: BlockDevice + ?Sized>(
    device: &D,
    volume: &Volume,
    sector: u32,
    count: usize,
    buffer: &mut [u8],
) -> Result<()> {
    let ratio = volume.bytes_per_sector as usize / device.sector_size();
    device.read_sectors(sector as u64 * ratio as u64, count * ratio, buffer)
}

pub struct Fat32FileSystem<D: BlockDevice> {
    device: D,
    volume: Volume,
    fs_info: Option<FsInfo>,
}

impl<D: BlockDevice> Fat32FileSystem<D> {
    /// Monter le volume qui commence au secteur 0 de `device`
    pub fn new(device: D) -> Result<Self> {
        let device_sector = device.sector_size();
        if device_sector == 0 || !device_sector.is_power_of_two() {
            return Err(Fat32Error::InvalidBootSector {
                reason: "taille de secteur du device pas une puissance de deux",
            });
        }
        let count = BootSector::SIZE.div_ceil(device_sector);
        let mut buffer = vec![0u8; count * device_sector];
        device.read_sectors(0, count, &mut buffer)?;
        let volume = parse_boot_sector(&buffer)?;

        if (volume.bytes_per_sector as usize) < device_sector {
            return Err(Fat32Error::InvalidBootSector {
                reason: "secteurs du volume plus petits que ceux du device",
            });
        }
        let needed = volume.total_sectors as u64 * volume.bytes_per_sector as u64;
        let available = device.sector_count() * device_sector as u64;
        if needed > available {
            warn!(
                "le volume fait {} octets mais le device {}, les lectures après la fin échoueront",
                needed, available
            );
        }

        let fs_info = read_fs_info(&device, &volume);
        Ok(Self {
            device,
            volume,
            fs_info,
        })
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn fs_info(&self) -> Option<FsInfo> {
        self.fs_info
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Lire un cluster entier dans `buffer`
    pub fn read_cluster(&self, cluster: u32, buffer: &mut [u8]) -> Result<()> {
        if !self.volume.is_data_cluster(cluster) {
            return Err(Fat32Error::InvalidCluster { cluster });
        }
        read_volume_sectors(
            &self.device,
            &self.volume,
            self.volume.cluster_to_sector(cluster),
            self.volume.sectors_per_cluster as usize,
            buffer,
        )
    }

    pub fn cluster_chain(&self, start: u32) -> ClusterChain<'_, D> {
        FatTable::new(&self.device, &self.volume).chain(start)
    }

    /// Entrées du dossier à `cluster`, `.`, `..` et nom de volume compris.
    /// Les clusters après le marqueur de fin ne sont pas lus.
    pub fn read_dir(&self, cluster: u32) -> Result<Vec<DirectoryEntry>> {
        self.read_directory(cluster, &TreeConfig::default(), "")
    }

    pub(crate) fn read_directory(
        &self,
        cluster: u32,
        config: &TreeConfig<'_>,
        path: &str,
    ) -> Result<Vec<DirectoryEntry>> {
        let mut decoder = DirectoryDecoder::new();
        let mut entries = Vec::new();
        let mut buffer = vec![0u8; self.volume.cluster_size()];
        for next in self.cluster_chain(cluster) {
            if config.is_cancelled() {
                return Err(Fat32Error::Cancelled { path: path.into() });
            }
            self.read_cluster(next?, &mut buffer)?;
            decoder.decode(&buffer, &mut entries);
            if decoder.is_finished() {
                break;
            }
        }
        debug!("dossier {} au cluster {}: {} entrées", path, cluster, entries.len());
        Ok(entries)
    }

    /// Arbre sous `cluster`, réglages par défaut
    pub fn materialize(&self, cluster: u32) -> Result<Dir> {
        tree::materialize(self, cluster)
    }

    pub fn materialize_with(&self, cluster: u32, config: &TreeConfig<'_>) -> Result<Materialized> {
        tree::materialize_with(self, cluster, config)
    }

    /// Arbre complet depuis la racine
    pub fn root(&self) -> Result<Dir> {
        self.materialize(self.volume.root_cluster)
    }

    /// Entrée à `path`. `/` et le chemin vide désignent la racine, qui reçoit
    /// une entrée de dossier construite.
    pub fn lookup(&self, path: &str) -> Result<DirectoryEntry> {
        let mut current = self.root_entry();
        let mut walked = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            walked.push('/');
            walked.push_str(component);
            if !current.is_directory() {
                return Err(Fat32Error::NotADirectory { path: walked });
            }
            let entries = self.read_dir(current.first_cluster)?;
            current = entries
                .into_iter()
                .filter(|e| !e.is_volume_label())
                .find(|e| e.matches(component))
                .ok_or_else(|| Fat32Error::NotFound {
                    path: walked.clone(),
                })?;
            // `..` vers la racine contient le cluster 0
            if current.is_directory() && current.first_cluster == 0 {
                current.first_cluster = self.volume.root_cluster;
            }
        }
        Ok(current)
    }

    /// Liste les fichiers du dossier `path` (la racine si `None`), sans `.`,
    /// `..` ni le nom de volume
    pub fn list_dir(&self, path: Option<&str>) -> Result<Vec<DirectoryEntry>> {
        let path = path.unwrap_or("/");
        let entry = self.lookup(path)?;
        if !entry.is_directory() {
            return Err(Fat32Error::NotADirectory { path: path.into() });
        }
        let mut entries = self.read_dir(entry.first_cluster)?;
        entries.retain(|e| !e.is_dot() && !e.is_volume_label());
        Ok(entries)
    }

    /// Contenu du fichier `path`, exactement `size` octets
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.lookup(path)?;
        if entry.is_directory() {
            return Err(Fat32Error::IsADirectory {
                path: path.to_string(),
            });
        }
        let size = entry.size as usize;
        let mut data = Vec::with_capacity(size);
        if size == 0 {
            return Ok(data);
        }

        let cluster_size = self.volume.cluster_size();
        let mut buffer = vec![0u8; cluster_size];
        let mut last = entry.first_cluster;
        for cluster in self.cluster_chain(entry.first_cluster).take(size.div_ceil(cluster_size)) {
            last = cluster?;
            self.read_cluster(last, &mut buffer)?;
            let wanted = (size - data.len()).min(cluster_size);
            data.extend_from_slice(&buffer[..wanted]);
        }
        if data.len() < size {
            return Err(Fat32Error::CorruptChain {
                start: entry.first_cluster,
                cluster: last,
            });
        }
        Ok(data)
    }

    fn root_entry(&self) -> DirectoryEntry {
        DirectoryEntry {
            name: String::from("/"),
            short_name: String::new(),
            attributes: FileAttributes::DIRECTORY,
            size: 0,
            first_cluster: self.volume.root_cluster,
        }
    }
}

fn read_fs_info<D: BlockDevice>(device: &D, volume: &Volume) -> Option<FsInfo> {
    let sector = volume.fs_info_sector;
    if sector == 0 || sector >= volume.reserved_sectors {
        warn!("pas de secteur FSInfo");
        return None;
    }
    let mut buffer = vec![0u8; volume.bytes_per_sector as usize];
    if let Err(err) = read_volume_sectors(device, volume, sector as u32, 1, &mut buffer) {
        warn!("lecture du secteur FSInfo {} impossible: {}", sector, err);
        return None;
    }
    let info = FsInfo::parse(&buffer);
    if info.is_none() {
        warn!("secteur FSInfo {} invalide", sector);
    }
    info
}
