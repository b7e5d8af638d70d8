#![no_std]
extern crate alloc;

pub mod binding;
pub mod boot_sector;
pub mod config;
pub mod device;
pub mod directory;
pub mod error;
pub mod fat_table;
pub mod filesystem;
pub mod tree;

pub use binding::{Tag, TagRef, TagType, Walk, mount, tree};
pub use boot_sector::{BootSector, FsInfo, Volume, parse_boot_sector};
pub use config::{ErrorPolicy, TreeConfig};
pub use device::{MemoryDevice, SectorStream, SharedDevice};
pub use directory::{
    DirectoryDecoder, DirectoryEntry, FileAttributes, decode_directory_cluster, lfn_checksum,
};
pub use error::{Fat32Error, IoFault, Result};
pub use fat_table::{ClusterChain, FatEntry, FatTable, resolve_chain};
pub use filesystem::Fat32FileSystem;
pub use tree::{Dir, File, Materialized, SkippedSubtree, materialize, materialize_with};

/// Trait pour abstraire l'accès aux secteurs, adressés par numéro logique.
///
/// Les lectures prennent `&self` : un volume monté peut être parcouru depuis
/// plusieurs threads. Un device basé sur un curseur partagé doit verrouiller
/// lui-même (voir [`SharedDevice`]).
pub trait BlockDevice {
    fn read_sector(&self, sector: u64, buffer: &mut [u8]) -> Result<()>;

    fn sector_size(&self) -> usize;

    /// Nombre de secteurs adressables
    fn sector_count(&self) -> u64;

    /// Lire `count` secteurs consécutifs dans `buffer`
    fn read_sectors(&self, start: u64, count: usize, buffer: &mut [u8]) -> Result<()> {
        let size = self.sector_size();
        if buffer.len() != size * count {
            return Err(Fat32Error::IoError {
                sector: start,
                fault: IoFault::BufferSize,
            });
        }
        for (i, chunk) in buffer.chunks_exact_mut(size).enumerate() {
            self.read_sector(start + i as u64, chunk)?;
        }
        Ok(())
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    fn read_sector(&self, sector: u64, buffer: &mut [u8]) -> Result<()> {
        (**self).read_sector(sector, buffer)
    }

    fn sector_size(&self) -> usize {
        (**self).sector_size()
    }

    fn sector_count(&self) -> u64 {
        (**self).sector_count()
    }

    fn read_sectors(&self, start: u64, count: usize, buffer: &mut [u8]) -> Result<()> {
        (**self).read_sectors(start, count, buffer)
    }
}
