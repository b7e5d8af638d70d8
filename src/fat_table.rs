//! Gestion de la table FAT et parcours des chaînes de clusters

use alloc::collections::BTreeSet;
use alloc::vec;
use alloc::vec::Vec;
use log::trace;

use crate::filesystem::read_volume_sectors;
use crate::{BlockDevice, Fat32Error, Result, Volume};

const ENTRY_MASK: u32 = 0x0FFF_FFFF;
const BAD_CLUSTER: u32 = 0x0FFF_FFF7;
const END_OF_CHAIN: u32 = 0x0FFF_FFF8;

/// Valeur décodée d'une entrée de la FAT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    /// Valeur 1, jamais valide dans une chaîne
    Reserved,
    Next(u32),
    Bad,
    EndOfChain,
}

impl FatEntry {
    pub fn from_raw(raw: u32) -> Self {
        match raw & ENTRY_MASK {
            0 => Self::Free,
            1 => Self::Reserved,
            BAD_CLUSTER => Self::Bad,
            value if value >= END_OF_CHAIN => Self::EndOfChain,
            value => Self::Next(value),
        }
    }
}

/// Lit les entrées de la FAT active, avec le dernier secteur en cache
pub struct FatTable<'a, D: BlockDevice> {
    device: &'a D,
    volume: &'a Volume,
    cache: Option<(u32, Vec<u8>)>,
}

impl<'a, D: BlockDevice> FatTable<'a, D> {
    pub fn new(device: &'a D, volume: &'a Volume) -> Self {
        Self {
            device,
            volume,
            cache: None,
        }
    }

    /// Entrée de la FAT pour `cluster`
    pub fn entry(&mut self, cluster: u32) -> Result<FatEntry> {
        if !self.volume.is_data_cluster(cluster) {
            return Err(Fat32Error::InvalidCluster { cluster });
        }

        let fat_offset = cluster as u64 * 4;
        let bytes_per_sec = self.volume.bytes_per_sector as u64;
        let fat_sector = self.volume.fat_start_sector() + (fat_offset / bytes_per_sec) as u32;
        let entry_offset = (fat_offset % bytes_per_sec) as usize;

        let sector_data = self.read_fat_sector(fat_sector)?;
        let raw = u32::from_le_bytes([
            sector_data[entry_offset],
            sector_data[entry_offset + 1],
            sector_data[entry_offset + 2],
            sector_data[entry_offset + 3],
        ]);
        Ok(FatEntry::from_raw(raw))
    }

    fn read_fat_sector(&mut self, sector: u32) -> Result<&[u8]> {
        let hit = matches!(&self.cache, Some((cached, _)) if *cached == sector);
        if !hit {
            let mut buffer = vec![0u8; self.volume.bytes_per_sector as usize];
            read_volume_sectors(self.device, self.volume, sector, 1, &mut buffer)?;
            self.cache = Some((sector, buffer));
        }
        match &self.cache {
            Some((_, data)) => Ok(data.as_slice()),
            None => unreachable!(),
        }
    }

    /// Parcourir à la demande la chaîne qui commence à `start`
    pub fn chain(self, start: u32) -> ClusterChain<'a, D> {
        let pending = if self.volume.is_data_cluster(start) {
            None
        } else {
            Some(Fat32Error::InvalidCluster { cluster: start })
        };
        ClusterChain {
            fat: self,
            start,
            next: if pending.is_none() { Some(start) } else { None },
            visited: BTreeSet::new(),
            pending,
        }
    }

    /// Obtenir tous les clusters d'une chaîne, dans l'ordre
    pub fn cluster_chain(self, start: u32) -> Result<Vec<u32>> {
        self.chain(start).collect()
    }
}

/// Clusters d'un fichier ou d'un dossier, dans l'ordre de la chaîne.
///
/// Un cluster atteint deux fois signifie que la FAT boucle : le parcours
/// renvoie [`Fat32Error::CorruptChain`] sur ce cluster, quel que soit le
/// nombre de clusters demandé. Plus rien n'est produit après une erreur.
pub struct ClusterChain<'a, D: BlockDevice> {
    fat: FatTable<'a, D>,
    start: u32,
    next: Option<u32>,
    visited: BTreeSet<u32>,
    pending: Option<Fat32Error>,
}

impl<D: BlockDevice> ClusterChain<'_, D> {
    pub fn start(&self) -> u32 {
        self.start
    }

    fn corrupt(&self, cluster: u32) -> Fat32Error {
        Fat32Error::CorruptChain {
            start: self.start,
            cluster,
        }
    }
}

impl<D: BlockDevice> Iterator for ClusterChain<'_, D> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return Some(Err(err));
        }
        let current = self.next.take()?;

        if !self.visited.insert(current) {
            return Some(Err(self.corrupt(current)));
        }

        match self.fat.entry(current) {
            Ok(FatEntry::Next(next)) if self.fat.volume.is_data_cluster(next) => {
                trace!("chaîne {}: {} -> {}", self.start, current, next);
                self.next = Some(next);
            }
            Ok(FatEntry::EndOfChain) => trace!("chaîne {}: {} est le dernier", self.start, current),
            Ok(FatEntry::Free) => {
                return Some(Err(Fat32Error::FreeClusterReferenced {
                    start: self.start,
                    cluster: current,
                }));
            }
            Ok(FatEntry::Next(_) | FatEntry::Reserved | FatEntry::Bad) => {
                return Some(Err(self.corrupt(current)));
            }
            Err(err) => return Some(Err(err)),
        }
        Some(Ok(current))
    }
}

/// Parcours à la demande de la chaîne qui commence à `start`
pub fn resolve_chain<'a, D: BlockDevice>(
    device: &'a D,
    volume: &'a Volume,
    start: u32,
) -> ClusterChain<'a, D> {
    FatTable::new(device, volume).chain(start)
}
