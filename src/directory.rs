//! Gestion des entrées de répertoire, noms longs compris

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use log::{trace, warn};

pub const ENTRY_SIZE: usize = 32;

const END_MARKER: u8 = 0x00;
const DELETED_MARKER: u8 = 0xE5;
/// Remplace un vrai premier octet 0xE5 dans un nom court
const KANJI_ESCAPE: u8 = 0x05;
const LAST_LONG_ENTRY: u8 = 0x40;
const LONG_NAME_UNITS: usize = 13;
/// 255 unités UTF-16, 13 par fragment
const MAX_LONG_FRAGMENTS: u8 = 20;

bitflags! {
    /// Attributs d'une entrée de répertoire
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        const LONG_NAME = Self::READ_ONLY.bits()
            | Self::HIDDEN.bits()
            | Self::SYSTEM.bits()
            | Self::VOLUME_ID.bits();
    }
}

impl FileAttributes {
    pub fn is_directory(&self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    /// Les deux bits de poids fort sont réservés et ignorés pour les noms longs
    pub fn is_long_name(&self) -> bool {
        self.bits() & 0x3F == Self::LONG_NAME.bits()
    }

    pub fn is_volume_id(&self) -> bool {
        !self.is_long_name() && self.contains(Self::VOLUME_ID)
    }
}

impl fmt::Debug for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Attributes(0x{:02x})", self.bits())
    }
}

/// Somme de contrôle d'un nom 8.3, stockée dans chacun de ses fragments longs
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    short_name
        .iter()
        .fold(0u8, |sum, &b| sum.rotate_right(1).wrapping_add(b))
}

/// Entrée de répertoire (fichier ou dossier)
#[derive(Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Nom long s'il est présent et valide, sinon le nom 8.3
    pub name: String,
    pub short_name: String,
    pub attributes: FileAttributes,
    /// Zéro pour les dossiers
    pub size: u32,
    pub first_cluster: u32,
}

impl DirectoryEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes.is_volume_id()
    }

    /// `.` ou `..`
    pub fn is_dot(&self) -> bool {
        self.short_name == "." || self.short_name == ".."
    }

    /// Compare avec un élément de chemin, sans tenir compte de la casse ASCII
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.short_name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("cluster", &self.first_cluster)
            .field("size", &self.size)
            .finish()
    }
}

/// Champs d'une entrée courte (8.3)
struct ShortSlot {
    name: [u8; 11],
    attributes: FileAttributes,
    first_cluster: u32,
    size: u32,
}

impl ShortSlot {
    fn parse(slot: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&slot[0..11]);
        let high = u16::from_le_bytes([slot[20], slot[21]]);
        let low = u16::from_le_bytes([slot[26], slot[27]]);
        Self {
            name,
            attributes: FileAttributes::from_bits_retain(slot[11]),
            first_cluster: ((high as u32) << 16) | low as u32,
            size: u32::from_le_bytes([slot[28], slot[29], slot[30], slot[31]]),
        }
    }

    /// `NOM.EXT` en majuscules ; un nom de volume garde ses onze octets
    fn display_name(&self) -> String {
        let mut bytes = self.name;
        if bytes[0] == KANJI_ESCAPE {
            bytes[0] = DELETED_MARKER;
        }
        let text = |part: &[u8]| -> String {
            let end = part.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
            part[..end]
                .iter()
                .map(|&b| char::from(b).to_ascii_uppercase())
                .collect()
        };
        if self.attributes.is_volume_id() {
            return text(&bytes);
        }
        let mut name = text(&bytes[..8]);
        let ext = text(&bytes[8..]);
        if !ext.is_empty() {
            name.push('.');
            name.push_str(&ext);
        }
        name
    }
}

/// Fragments d'un nom long en attente de leur entrée courte
struct PendingLongName {
    checksum: u8,
    fragments: Vec<Option<[u16; LONG_NAME_UNITS]>>,
}

impl PendingLongName {
    fn is_complete(&self) -> bool {
        self.fragments.iter().all(Option::is_some)
    }

    /// Concaténer les fragments dans l'ordre jusqu'au NUL final
    fn assemble(&self) -> String {
        let units = self
            .fragments
            .iter()
            .flatten()
            .flat_map(|fragment| fragment.iter().copied())
            .take_while(|&unit| unit != 0x0000)
            .filter(|&unit| unit != 0xFFFF);
        char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
}

fn long_name_units(slot: &[u8]) -> [u16; LONG_NAME_UNITS] {
    let mut units = [0u16; LONG_NAME_UNITS];
    let offsets = (1..11).step_by(2).chain((14..26).step_by(2)).chain((28..32).step_by(2));
    for (unit, offset) in units.iter_mut().zip(offsets) {
        *unit = u16::from_le_bytes([slot[offset], slot[offset + 1]]);
    }
    units
}

/// Décode les entrées d'un dossier, cluster par cluster.
///
/// Un nom long peut chevaucher deux clusters : les fragments en attente
/// sont gardés d'un appel à [`DirectoryDecoder::decode`] au suivant.
#[derive(Default)]
pub struct DirectoryDecoder {
    pending: Option<PendingLongName>,
    finished: bool,
}

impl DirectoryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vrai une fois le marqueur de fin de dossier lu
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Décoder chaque entrée de `bytes` dans `out`, dans l'ordre du disque
    pub fn decode(&mut self, bytes: &[u8], out: &mut Vec<DirectoryEntry>) {
        for slot in bytes.chunks_exact(ENTRY_SIZE) {
            if self.finished {
                return;
            }
            self.decode_slot(slot, out);
        }
    }

    fn decode_slot(&mut self, slot: &[u8], out: &mut Vec<DirectoryEntry>) {
        match slot[0] {
            END_MARKER => {
                self.finished = true;
                self.drop_pending("fin du dossier");
            }
            DELETED_MARKER => self.drop_pending("entrée supprimée"),
            _ if FileAttributes::from_bits_retain(slot[11]).is_long_name() => {
                self.push_fragment(slot)
            }
            _ => {
                let entry = self.finish_short(ShortSlot::parse(slot));
                trace!("décodé {:?}", entry);
                out.push(entry);
            }
        }
    }

    fn push_fragment(&mut self, slot: &[u8]) {
        let order = slot[0];
        let sequence = order & 0x1F;
        let checksum = slot[13];
        let units = long_name_units(slot);

        if order & LAST_LONG_ENTRY != 0 {
            self.drop_pending("nouveau nom long commencé");
            if sequence == 0 || sequence > MAX_LONG_FRAGMENTS {
                warn!("fragment de nom long avec séquence invalide {:#04x}", order);
                return;
            }
            let mut fragments = vec![None; sequence as usize];
            fragments[sequence as usize - 1] = Some(units);
            self.pending = Some(PendingLongName {
                checksum,
                fragments,
            });
            return;
        }

        let index = (sequence as usize).wrapping_sub(1);
        let accepted = match self.pending.as_mut() {
            Some(pending) if pending.checksum == checksum => match pending.fragments.get_mut(index) {
                Some(fragment) if fragment.is_none() => {
                    *fragment = Some(units);
                    true
                }
                _ => false,
            },
            _ => false,
        };
        if !accepted {
            warn!("fragment de nom long isolé {:#04x}", order);
            self.pending = None;
        }
    }

    fn finish_short(&mut self, short: ShortSlot) -> DirectoryEntry {
        let short_name = short.display_name();
        let mut name = short_name.clone();
        if let Some(pending) = self.pending.take() {
            let expected = lfn_checksum(&short.name);
            if !pending.is_complete() {
                warn!("nom long incomplet pour {}, nom court utilisé", short_name);
            } else if pending.checksum != expected {
                warn!(
                    "somme de contrôle {:#04x} du nom long ne correspond pas à {} ({:#04x}), nom court utilisé",
                    pending.checksum, short_name, expected
                );
            } else {
                let long = pending.assemble();
                if !long.is_empty() {
                    name = long;
                }
            }
        }
        DirectoryEntry {
            name,
            short_name,
            attributes: short.attributes,
            size: short.size,
            first_cluster: short.first_cluster,
        }
    }

    fn drop_pending(&mut self, why: &str) {
        if self.pending.take().is_some() {
            warn!("fragments de nom long orphelins ignorés: {}", why);
        }
    }
}

/// Décoder un buffer d'entrées de répertoire. S'arrête au marqueur de fin.
pub fn decode_directory_cluster(bytes: &[u8]) -> Vec<DirectoryEntry> {
    let mut entries = Vec::new();
    DirectoryDecoder::new().decode(bytes, &mut entries);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_slot(name: &[u8; 11], attributes: u8, cluster: u32, size: u32) -> [u8; 32] {
        let mut slot = [0u8; 32];
        slot[0..11].copy_from_slice(name);
        slot[11] = attributes;
        slot[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        slot[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        slot[28..32].copy_from_slice(&size.to_le_bytes());
        slot
    }

    /// Entrées de nom long dans l'ordre du disque, dernier fragment en premier
    fn long_slots(long: &str, short: &[u8; 11]) -> Vec<[u8; 32]> {
        let mut units: Vec<u16> = long.encode_utf16().collect();
        if units.len() % LONG_NAME_UNITS != 0 {
            units.push(0);
        }
        while units.len() % LONG_NAME_UNITS != 0 {
            units.push(0xFFFF);
        }
        let checksum = lfn_checksum(short);
        let count = units.len() / LONG_NAME_UNITS;
        let mut slots = Vec::new();
        for (i, chunk) in units.chunks(LONG_NAME_UNITS).enumerate() {
            let mut slot = [0u8; 32];
            slot[0] = (i + 1) as u8 | if i + 1 == count { LAST_LONG_ENTRY } else { 0 };
            slot[11] = FileAttributes::LONG_NAME.bits();
            slot[13] = checksum;
            let offsets = (1..11).step_by(2).chain((14..26).step_by(2)).chain((28..32).step_by(2));
            for (unit, offset) in chunk.iter().zip(offsets) {
                slot[offset..offset + 2].copy_from_slice(&unit.to_le_bytes());
            }
            slots.push(slot);
        }
        slots.reverse();
        slots
    }

    fn concat(slots: &[[u8; 32]]) -> Vec<u8> {
        slots.iter().flatten().copied().collect()
    }

    #[test]
    fn test_deleted_and_end_only() {
        let mut deleted = short_slot(b"GONE    TXT", 0x20, 3, 1);
        deleted[0] = DELETED_MARKER;
        let bytes = concat(&[deleted, [0u8; 32], short_slot(b"LATER   TXT", 0x20, 4, 1)]);
        assert!(decode_directory_cluster(&bytes).is_empty());
    }

    #[test]
    fn test_short_entry_fields() {
        let bytes = concat(&[short_slot(b"readme  txt", 0x21, 0x0003_0010, 1234)]);
        let entries = decode_directory_cluster(&bytes);
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.name, "README.TXT");
        assert_eq!(entry.size, 1234);
        assert_eq!(entry.first_cluster, 0x0003_0010);
        assert!(entry.attributes.contains(FileAttributes::READ_ONLY | FileAttributes::ARCHIVE));
        assert!(!entry.is_directory());
    }

    #[test]
    fn test_name_without_extension_and_escape() {
        let escaped = short_slot(&[0x05, b'A', b'B', b'C', b' ', b' ', b' ', b' ', b' ', b' ', b' '], 0x10, 9, 0);
        let bytes = concat(&[short_slot(b"MAKEFILE   ", 0x20, 5, 7), escaped]);
        let entries = decode_directory_cluster(&bytes);
        assert_eq!(entries[0].name, "MAKEFILE");
        assert_eq!(entries[1].name, "\u{e5}ABC");
        assert!(entries[1].is_directory());
    }

    #[test]
    fn test_dot_entries() {
        let bytes = concat(&[
            short_slot(b".          ", 0x10, 5, 0),
            short_slot(b"..         ", 0x10, 0, 0),
        ]);
        let entries = decode_directory_cluster(&bytes);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(DirectoryEntry::is_dot));
        assert_eq!(entries[1].name, "..");
    }

    #[test]
    fn test_three_fragment_long_name() {
        let short = *b"AMUCHL~1TXT";
        let long = "a much longer file name for you.txt";
        let mut slots = long_slots(long, &short);
        assert_eq!(slots.len(), 3);
        slots.push(short_slot(&short, 0x20, 8, 99));
        let entries = decode_directory_cluster(&concat(&slots));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, long);
        assert_eq!(entries[0].short_name, "AMUCHL~1.TXT");
    }

    #[test]
    fn test_long_name_exact() {
        let short = *b"LONGFI~1TXT";
        let mut slots = long_slots("longfilename.txt", &short);
        slots.push(short_slot(&short, 0x20, 8, 99));
        let entries = decode_directory_cluster(&concat(&slots));
        assert_eq!(entries[0].name, "longfilename.txt");
    }

    #[test]
    fn test_bad_checksum_falls_back_to_short_name() {
        let short = *b"AMUCHL~1TXT";
        let mut slots = long_slots("a much longer file name for you.txt", &short);
        for slot in slots.iter_mut() {
            slot[13] = slot[13].wrapping_add(1);
        }
        slots.push(short_slot(&short, 0x20, 8, 99));
        let entries = decode_directory_cluster(&concat(&slots));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "AMUCHL~1.TXT");
    }

    #[test]
    fn test_missing_fragment_falls_back() {
        let short = *b"AMUCHL~1TXT";
        let mut slots = long_slots("a much longer file name for you.txt", &short);
        slots.remove(1);
        slots.push(short_slot(&short, 0x20, 8, 99));
        let entries = decode_directory_cluster(&concat(&slots));
        assert_eq!(entries[0].name, "AMUCHL~1.TXT");
    }

    #[test]
    fn test_long_name_across_buffers() {
        let short = *b"LONGFI~1TXT";
        let mut slots = long_slots("longfilename.txt", &short);
        slots.push(short_slot(&short, 0x20, 8, 99));
        let bytes = concat(&slots);
        let mut decoder = DirectoryDecoder::new();
        let mut entries = Vec::new();
        decoder.decode(&bytes[..32], &mut entries);
        decoder.decode(&bytes[32..], &mut entries);
        assert!(!decoder.is_finished());
        assert_eq!(entries[0].name, "longfilename.txt");
    }

    #[test]
    fn test_volume_label() {
        let bytes = concat(&[short_slot(b"MY DISK    ", 0x08, 0, 0)]);
        let entries = decode_directory_cluster(&bytes);
        assert!(entries[0].is_volume_label());
        assert_eq!(entries[0].name, "MY DISK");
    }

    #[test]
    fn test_checksum_known_value() {
        // formule de référence : ((sum & 1) << 7) + (sum >> 1) + octet
        let mut sum = 0u8;
        for &b in b"FOO     BAR" {
            sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b);
        }
        assert_eq!(lfn_checksum(b"FOO     BAR"), sum);
    }
}
