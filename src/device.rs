//! Devices de blocs prêts à l'emploi

use alloc::vec::Vec;
use spin::Mutex;

use crate::{BlockDevice, Fat32Error, IoFault, Result};

/// Image entière en mémoire. Lectures positionnelles, pas de verrou.
pub struct MemoryDevice {
    data: Vec<u8>,
    sector_size: usize,
}

impl MemoryDevice {
    /// Les octets de fin qui ne remplissent pas un secteur sont ignorés.
    pub fn new(data: Vec<u8>, sector_size: usize) -> Self {
        Self { data, sector_size }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl BlockDevice for MemoryDevice {
    fn read_sector(&self, sector: u64, buffer: &mut [u8]) -> Result<()> {
        check_request(self, sector, buffer.len())?;
        let offset = sector as usize * self.sector_size;
        buffer.copy_from_slice(&self.data[offset..offset + self.sector_size]);
        Ok(())
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        (self.data.len() / self.sector_size) as u64
    }
}

/// Flux d'octets avec un seul curseur, comme un fichier ouvert.
pub trait SectorStream {
    /// Remplir `buffer` depuis l'offset absolu `offset`
    fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> core::result::Result<(), IoFault>;

    fn byte_len(&self) -> u64;
}

/// Sérialise les lectures sur un flux à curseur derrière un verrou.
pub struct SharedDevice<S: SectorStream> {
    stream: Mutex<S>,
    sector_size: usize,
    sector_count: u64,
}

impl<S: SectorStream> SharedDevice<S> {
    pub fn new(stream: S, sector_size: usize) -> Self {
        let sector_count = stream.byte_len() / sector_size as u64;
        Self {
            stream: Mutex::new(stream),
            sector_size,
            sector_count,
        }
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

impl<S: SectorStream> BlockDevice for SharedDevice<S> {
    fn read_sector(&self, sector: u64, buffer: &mut [u8]) -> Result<()> {
        check_request(self, sector, buffer.len())?;
        self.stream
            .lock()
            .read_at(sector * self.sector_size as u64, buffer)
            .map_err(|fault| Fat32Error::IoError { sector, fault })
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    // Un seul verrou et une seule lecture pour toute la plage
    fn read_sectors(&self, start: u64, count: usize, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() != count * self.sector_size {
            return Err(Fat32Error::IoError {
                sector: start,
                fault: IoFault::BufferSize,
            });
        }
        if count == 0 {
            return Ok(());
        }
        check_request(self, start + count as u64 - 1, self.sector_size)?;
        self.stream
            .lock()
            .read_at(start * self.sector_size as u64, buffer)
            .map_err(|fault| Fat32Error::IoError {
                sector: start,
                fault,
            })
    }
}

fn check_request<D: BlockDevice + ?Sized>(device: &D, sector: u64, len: usize) -> Result<()> {
    if sector >= device.sector_count() {
        return Err(Fat32Error::IoError {
            sector,
            fault: IoFault::OutOfRange,
        });
    }
    if len != device.sector_size() {
        return Err(Fat32Error::IoError {
            sector,
            fault: IoFault::BufferSize,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    struct Cursor {
        data: Vec<u8>,
        reads: usize,
    }

    impl SectorStream for Cursor {
        fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> core::result::Result<(), IoFault> {
            let start = offset as usize;
            let end = start + buffer.len();
            if end > self.data.len() {
                return Err(IoFault::Medium);
            }
            self.reads += 1;
            buffer.copy_from_slice(&self.data[start..end]);
            Ok(())
        }

        fn byte_len(&self) -> u64 {
            self.data.len() as u64
        }
    }

    #[test]
    fn test_memory_device_reads_sector() {
        let mut data = vec![0u8; 4 * 512];
        data[512] = 0xAB;
        let device = MemoryDevice::new(data, 512);
        let mut buffer = [0u8; 512];
        device.read_sector(1, &mut buffer).unwrap();
        assert_eq!(buffer[0], 0xAB);
        assert_eq!(device.sector_count(), 4);
    }

    #[test]
    fn test_out_of_range() {
        let device = MemoryDevice::new(vec![0u8; 2 * 512], 512);
        let mut buffer = [0u8; 512];
        assert_eq!(
            device.read_sector(2, &mut buffer),
            Err(Fat32Error::IoError {
                sector: 2,
                fault: IoFault::OutOfRange
            })
        );
    }

    #[test]
    fn test_shared_device_single_read_for_run() {
        let mut data = vec![0u8; 8 * 512];
        data[3 * 512] = 7;
        let device = SharedDevice::new(Cursor { data, reads: 0 }, 512);
        let mut buffer = vec![0u8; 3 * 512];
        device.read_sectors(2, 3, &mut buffer).unwrap();
        assert_eq!(buffer[512], 7);
        assert_eq!(device.into_inner().reads, 1);
    }

    #[test]
    fn test_shared_device_rejects_run_past_end() {
        let device = SharedDevice::new(Cursor { data: vec![0u8; 4 * 512], reads: 0 }, 512);
        let mut buffer = vec![0u8; 2 * 512];
        assert!(device.read_sectors(3, 2, &mut buffer).is_err());
    }
}
