//! Lecture du boot sector (BPB) et du secteur FSInfo

use alloc::string::String;
use log::debug;

use crate::{Fat32Error, Result};

pub const BOOT_SIGNATURE: u16 = 0xAA55;
const FS_INFO_LEAD_SIGNATURE: u32 = 0x4161_5252;
const FS_INFO_STRUCT_SIGNATURE: u32 = 0x6141_7272;
const FS_INFO_TRAIL_SIGNATURE: u32 = 0xAA55_0000;

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Champs bruts du BPB d'un boot sector FAT32, dans l'ordre du disque
#[derive(Clone, Copy, Debug)]
pub struct BootSector {
    pub jmp_boot: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub total_sectors_16: u16,
    pub media: u8,
    pub fat_size_16: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    // BPB étendu FAT32
    pub fat_size_32: u32,
    pub ext_flags: u16,
    pub fs_version: u16,
    pub root_cluster: u32,
    pub fs_info: u16,
    pub backup_boot_sector: u16,
    pub drive_number: u8,
    pub boot_signature: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
    pub signature: u16,
}

impl BootSector {
    pub const SIZE: usize = 512;

    /// Décoder les 512 premiers octets d'un volume. Aucune validation ici.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Fat32Error::InvalidBootSector {
                reason: "boot sector de moins de 512 octets",
            });
        }
        let mut jmp_boot = [0u8; 3];
        jmp_boot.copy_from_slice(&data[0..3]);
        let mut oem_name = [0u8; 8];
        oem_name.copy_from_slice(&data[3..11]);
        let mut volume_label = [0u8; 11];
        volume_label.copy_from_slice(&data[71..82]);
        let mut fs_type = [0u8; 8];
        fs_type.copy_from_slice(&data[82..90]);

        Ok(Self {
            jmp_boot,
            oem_name,
            bytes_per_sector: u16_at(data, 11),
            sectors_per_cluster: data[13],
            reserved_sector_count: u16_at(data, 14),
            num_fats: data[16],
            root_entry_count: u16_at(data, 17),
            total_sectors_16: u16_at(data, 19),
            media: data[21],
            fat_size_16: u16_at(data, 22),
            hidden_sectors: u32_at(data, 28),
            total_sectors_32: u32_at(data, 32),
            fat_size_32: u32_at(data, 36),
            ext_flags: u16_at(data, 40),
            fs_version: u16_at(data, 42),
            root_cluster: u32_at(data, 44),
            fs_info: u16_at(data, 48),
            backup_boot_sector: u16_at(data, 50),
            drive_number: data[64],
            boot_signature: data[66],
            volume_id: u32_at(data, 67),
            volume_label,
            fs_type,
            signature: u16_at(data, 510),
        })
    }

    /// Vérifier les champs dont dépend la lecture FAT32
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason| Err(Fat32Error::InvalidBootSector { reason });

        if !matches!(self.jmp_boot[0], 0xEB | 0xE9 | 0xE8) {
            return invalid("instruction de saut invalide");
        }
        if self.signature != BOOT_SIGNATURE {
            return invalid("signature 0xAA55 absente");
        }
        if !matches!(self.bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return invalid("octets par secteur hors de 512..=4096 ou pas une puissance de deux");
        }
        if !self.sectors_per_cluster.is_power_of_two() {
            return invalid("secteurs par cluster pas une puissance de deux");
        }
        if self.num_fats == 0 {
            return invalid("aucune FAT");
        }
        if self.fat_size_16 != 0 || self.fat_size_32 == 0 {
            return invalid("pas un volume FAT32");
        }
        if self.active_fat() >= self.num_fats {
            return invalid("FAT active hors limites");
        }
        let total = self.total_sectors() as u64;
        let data_start = self.first_data_sector();
        if total <= data_start {
            return invalid("pas de zone de données");
        }
        if self.root_cluster < 2 {
            return invalid("cluster racine inférieur à 2");
        }
        let clusters = (total - data_start) / self.sectors_per_cluster as u64;
        if self.root_cluster as u64 > clusters + 1 {
            return invalid("cluster racine après la fin du volume");
        }
        Ok(())
    }

    /// Taille d'un cluster en octets
    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    pub fn fat_size(&self) -> u32 {
        if self.fat_size_16 != 0 {
            self.fat_size_16 as u32
        } else {
            self.fat_size_32
        }
    }

    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }

    /// Début de la zone de données, en u64 : aucune valeur des champs ne
    /// peut déborder, même avant validation.
    pub fn first_data_sector(&self) -> u64 {
        self.reserved_sector_count as u64 + self.num_fats as u64 * self.fat_size() as u64
    }

    /// FAT utilisée pour les lectures. Le bit 7 désactive le miroir, et les
    /// 4 bits de poids faible désignent alors la copie active.
    pub fn active_fat(&self) -> u8 {
        if self.ext_flags & 0x80 != 0 {
            (self.ext_flags & 0x0F) as u8
        } else {
            0
        }
    }
}

/// Géométrie d'un volume FAT32 monté. Immuable une fois lue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Volume {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub sectors_per_fat: u32,
    pub root_cluster: u32,
    pub total_sectors: u32,
    pub active_fat: u8,
    pub fs_info_sector: u16,
    pub volume_id: u32,
    oem_name: [u8; 8],
    label: [u8; 11],
}

impl Volume {
    /// Construire depuis un boot sector déjà passé par [`BootSector::validate`],
    /// qui garantit que la FAT et chaque cluster tiennent sous `total_sectors`
    fn from_boot_sector(bs: &BootSector) -> Self {
        Self {
            bytes_per_sector: bs.bytes_per_sector,
            sectors_per_cluster: bs.sectors_per_cluster,
            reserved_sectors: bs.reserved_sector_count,
            fat_count: bs.num_fats,
            sectors_per_fat: bs.fat_size(),
            root_cluster: bs.root_cluster,
            total_sectors: bs.total_sectors(),
            active_fat: bs.active_fat(),
            fs_info_sector: bs.fs_info,
            volume_id: bs.volume_id,
            oem_name: bs.oem_name,
            // les champs étendus n'ont de sens qu'avec la signature 0x29
            label: if bs.boot_signature == 0x29 {
                bs.volume_label
            } else {
                [b' '; 11]
            },
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.bytes_per_sector as usize * self.sectors_per_cluster as usize
    }

    /// Premier secteur de la FAT utilisée pour les lectures
    pub fn fat_start_sector(&self) -> u32 {
        self.reserved_sectors as u32 + self.active_fat as u32 * self.sectors_per_fat
    }

    pub fn first_data_sector(&self) -> u32 {
        self.reserved_sectors as u32 + self.fat_count as u32 * self.sectors_per_fat
    }

    /// Nombre de clusters de données, borné par ce qu'une FAT peut adresser
    pub fn cluster_count(&self) -> u32 {
        let data = (self.total_sectors - self.first_data_sector()) / self.sectors_per_cluster as u32;
        let fat_entries = self.sectors_per_fat as u64 * self.bytes_per_sector as u64 / 4;
        data.min(fat_entries.saturating_sub(2).min(u32::MAX as u64) as u32)
    }

    /// Plus grand numéro de cluster valide
    pub fn max_cluster(&self) -> u32 {
        self.cluster_count() + 1
    }

    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        (2..=self.max_cluster()).contains(&cluster)
    }

    /// Premier secteur d'un cluster. L'appelant vérifie le numéro.
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        self.first_data_sector() + (cluster - 2) * self.sectors_per_cluster as u32
    }

    pub fn oem_name(&self) -> String {
        trimmed(&self.oem_name)
    }

    /// Nom du volume dans le boot sector, vide si absent
    pub fn label(&self) -> String {
        let label = trimmed(&self.label);
        if label == "NO NAME" { String::new() } else { label }
    }
}

fn trimmed(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().into()
}

/// Lire et valider le premier secteur d'un volume FAT32
pub fn parse_boot_sector(first_sector: &[u8]) -> Result<Volume> {
    let bs = BootSector::from_bytes(first_sector)?;
    bs.validate()?;
    let volume = Volume::from_boot_sector(&bs);
    debug!(
        "boot sector: {} octets/secteur, {} secteurs/cluster, {} réservés, {} FATs de {} secteurs, cluster racine {}, {} clusters",
        volume.bytes_per_sector,
        volume.sectors_per_cluster,
        volume.reserved_sectors,
        volume.fat_count,
        volume.sectors_per_fat,
        volume.root_cluster,
        volume.cluster_count(),
    );
    Ok(volume)
}

/// Indications d'allocation du secteur FSInfo
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsInfo {
    /// Dernier nombre connu de clusters libres, `None` si jamais calculé
    pub free_clusters: Option<u32>,
    /// Où chercher le prochain cluster libre, `None` si inconnu
    pub next_free: Option<u32>,
}

impl FsInfo {
    /// `None` si l'une des trois signatures est fausse
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 512
            || u32_at(data, 0) != FS_INFO_LEAD_SIGNATURE
            || u32_at(data, 484) != FS_INFO_STRUCT_SIGNATURE
            || u32_at(data, 508) != FS_INFO_TRAIL_SIGNATURE
        {
            return None;
        }
        let known = |value| (value != u32::MAX).then_some(value);
        Some(Self {
            free_clusters: known(u32_at(data, 488)),
            next_free: known(u32_at(data, 492)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_boot_sector() -> [u8; 512] {
        let mut data = [0u8; 512];
        data[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        data[3..11].copy_from_slice(b"MSWIN4.1");
        data[11..13].copy_from_slice(&1024u16.to_le_bytes());
        data[13] = 4;
        data[14..16].copy_from_slice(&32u16.to_le_bytes());
        data[16] = 2;
        data[32..36].copy_from_slice(&20_000u32.to_le_bytes());
        data[36..40].copy_from_slice(&40u32.to_le_bytes());
        data[44..48].copy_from_slice(&5u32.to_le_bytes());
        data[48..50].copy_from_slice(&1u16.to_le_bytes());
        data[66] = 0x29;
        data[67..71].copy_from_slice(&0xCAFE_F00Du32.to_le_bytes());
        data[71..82].copy_from_slice(b"BACKUP     ");
        data[510..512].copy_from_slice(&BOOT_SIGNATURE.to_le_bytes());
        data
    }

    #[test]
    fn test_geometry_round_trip() {
        let volume = parse_boot_sector(&sample_boot_sector()).unwrap();
        assert_eq!(volume.bytes_per_sector, 1024);
        assert_eq!(volume.sectors_per_cluster, 4);
        assert_eq!(volume.reserved_sectors, 32);
        assert_eq!(volume.fat_count, 2);
        assert_eq!(volume.sectors_per_fat, 40);
        assert_eq!(volume.root_cluster, 5);
        assert_eq!(volume.total_sectors, 20_000);
        assert_eq!(volume.fs_info_sector, 1);
        assert_eq!(volume.volume_id, 0xCAFE_F00D);
        assert_eq!(volume.oem_name(), "MSWIN4.1");
        assert_eq!(volume.label(), "BACKUP");
        assert_eq!(volume.first_data_sector(), 112);
        assert_eq!(volume.cluster_count(), (20_000 - 112) / 4);
        assert_eq!(volume.cluster_size(), 4096);
    }

    #[test]
    fn test_rejects_bad_jump() {
        let mut data = sample_boot_sector();
        data[0] = 0x00;
        assert!(matches!(
            parse_boot_sector(&data),
            Err(Fat32Error::InvalidBootSector { .. })
        ));
    }

    #[test]
    fn test_rejects_missing_signature() {
        let mut data = sample_boot_sector();
        data[510] = 0;
        assert_eq!(
            parse_boot_sector(&data),
            Err(Fat32Error::InvalidBootSector {
                reason: "signature 0xAA55 absente"
            })
        );
    }

    #[test]
    fn test_rejects_odd_geometry() {
        let mut data = sample_boot_sector();
        data[11..13].copy_from_slice(&768u16.to_le_bytes());
        assert!(parse_boot_sector(&data).is_err());

        let mut data = sample_boot_sector();
        data[13] = 3;
        assert!(parse_boot_sector(&data).is_err());

        let mut data = sample_boot_sector();
        data[13] = 0;
        assert!(parse_boot_sector(&data).is_err());

        let mut data = sample_boot_sector();
        data[16] = 0;
        assert!(parse_boot_sector(&data).is_err());

        let mut data = sample_boot_sector();
        data[44..48].copy_from_slice(&1u32.to_le_bytes());
        assert!(parse_boot_sector(&data).is_err());
    }

    #[test]
    fn test_rejects_fat_region_past_u32() {
        let mut data = sample_boot_sector();
        data[36..40].copy_from_slice(&0x8000_0000u32.to_le_bytes());
        assert_eq!(
            parse_boot_sector(&data),
            Err(Fat32Error::InvalidBootSector {
                reason: "pas de zone de données"
            })
        );

        let mut data = sample_boot_sector();
        data[16] = 255;
        data[32..36].copy_from_slice(&u32::MAX.to_le_bytes());
        data[36..40].copy_from_slice(&0x0200_0000u32.to_le_bytes());
        assert_eq!(
            parse_boot_sector(&data),
            Err(Fat32Error::InvalidBootSector {
                reason: "pas de zone de données"
            })
        );
    }

    #[test]
    fn test_rejects_fat16_layout() {
        let mut data = sample_boot_sector();
        data[22..24].copy_from_slice(&9u16.to_le_bytes());
        assert_eq!(
            parse_boot_sector(&data),
            Err(Fat32Error::InvalidBootSector {
                reason: "pas un volume FAT32"
            })
        );
    }

    #[test]
    fn test_active_fat_when_mirroring_disabled() {
        let mut data = sample_boot_sector();
        data[40..42].copy_from_slice(&0x0081u16.to_le_bytes());
        let volume = parse_boot_sector(&data).unwrap();
        assert_eq!(volume.active_fat, 1);
        assert_eq!(volume.fat_start_sector(), 32 + 40);
    }

    #[test]
    fn test_fs_info() {
        let mut data = [0u8; 512];
        data[0..4].copy_from_slice(&FS_INFO_LEAD_SIGNATURE.to_le_bytes());
        data[484..488].copy_from_slice(&FS_INFO_STRUCT_SIGNATURE.to_le_bytes());
        data[488..492].copy_from_slice(&42u32.to_le_bytes());
        data[492..496].copy_from_slice(&u32::MAX.to_le_bytes());
        data[508..512].copy_from_slice(&FS_INFO_TRAIL_SIGNATURE.to_le_bytes());
        let info = FsInfo::parse(&data).unwrap();
        assert_eq!(info.free_clusters, Some(42));
        assert_eq!(info.next_free, None);

        data[0] = 0;
        assert!(FsInfo::parse(&data).is_none());
    }
}
