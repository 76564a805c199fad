//! Firmware image loading
//!
//! The emulator boots from one of two inputs found in the working directory:
//!
//! - `flash.bin` — a raw FLASH dump. The first 4 bytes are the bootloader
//!   length (little-endian), the next 64 bytes are the reset-vector RAM
//!   contents, and the bootloader follows for the declared length, destined
//!   for RAM 0x3F0000. The whole file is mapped as FLASH at virtual
//!   address 0.
//! - `drc_fw.bin` — a packaged firmware container. Its partition table is
//!   located by the `INDX` tag (the 8-byte prelude before it marks the table
//!   origin); the `LVC_` entry's preceding 8 bytes give the ARM9 partition's
//!   (offset, length) as little-endian u32s. That partition is copied to RAM
//!   at 0 and mapped as FLASH at virtual address 0x100000, and the
//!   boot-completion byte is planted so the firmware believes the bootloader
//!   already ran.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::peripherals::spi::Spi;

/// RAM address the bootloader is copied to from a raw FLASH image.
const BOOTLOADER_ADDR: usize = 0x3F_0000;
/// RAM address of the boot-completion byte checked by container firmware.
const BOOT_DONE_ADDR: usize = 0x3F_FFFC;
/// Virtual FLASH address of the ARM9 partition inside a container.
const CONTAINER_FLASH_BASE: u32 = 0x10_0000;

/// Errors produced while parsing a firmware input.
#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("image too short: {0} bytes")]
    TooShort(usize),
    #[error("bootloader length {length:#x} exceeds image size {size:#x}")]
    TruncatedBootloader { length: usize, size: usize },
    #[error("container has no INDX partition table entry")]
    MissingIndex,
    #[error("container has no LVC_ partition entry")]
    MissingArm9,
    #[error("ARM9 partition {offset:#x}+{length:#x} exceeds container size {size:#x}")]
    TruncatedPartition { offset: usize, length: usize, size: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A validated firmware input, ready to map on reset.
#[derive(Debug, Clone)]
pub enum Firmware {
    /// Raw FLASH dump (`flash.bin`)
    RawFlash(Vec<u8>),
    /// Packaged container (`drc_fw.bin`) with the ARM9 partition located
    Container {
        data: Vec<u8>,
        arm9_offset: usize,
        arm9_length: usize,
    },
}

impl Firmware {
    /// Validate a raw FLASH dump.
    pub fn from_flash_image(data: Vec<u8>) -> Result<Self, FirmwareError> {
        if data.len() < 0x44 {
            return Err(FirmwareError::TooShort(data.len()));
        }
        let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if 0x44 + length > data.len() {
            return Err(FirmwareError::TruncatedBootloader { length, size: data.len() });
        }
        Ok(Self::RawFlash(data))
    }

    /// Locate the ARM9 partition inside a firmware container.
    pub fn from_container(data: Vec<u8>) -> Result<Self, FirmwareError> {
        let indx = find_tag(&data, b"INDX").ok_or(FirmwareError::MissingIndex)?;
        if indx < 8 {
            return Err(FirmwareError::MissingIndex);
        }
        let table = indx - 8;

        let lvc = find_tag(&data[table..], b"LVC_")
            .map(|pos| table + pos)
            .ok_or(FirmwareError::MissingArm9)?;
        if lvc < table + 8 {
            return Err(FirmwareError::MissingArm9);
        }
        let offset = read_u32(&data, lvc - 8) as usize;
        let length = read_u32(&data, lvc - 4) as usize;

        let arm9_offset = table + offset;
        if arm9_offset + length > data.len() {
            return Err(FirmwareError::TruncatedPartition {
                offset: arm9_offset,
                length,
                size: data.len(),
            });
        }
        Ok(Self::Container { data, arm9_offset, arm9_length: length })
    }

    /// Probe a directory for `flash.bin`, then `drc_fw.bin`. Returns `None`
    /// when neither exists; the emulator still resets and fetches zeroes.
    pub fn load(dir: &Path) -> Result<Option<Self>, FirmwareError> {
        let flash = dir.join("flash.bin");
        if flash.is_file() {
            return Self::from_flash_image(fs::read(flash)?).map(Some);
        }
        let container = dir.join("drc_fw.bin");
        if container.is_file() {
            return Self::from_container(fs::read(container)?).map(Some);
        }
        Ok(None)
    }

    /// Map the image: seed RAM with the boot contents and hand the FLASH
    /// mapping to the SPI device.
    pub fn apply(&self, ram: &mut [u8], spi: &mut Spi) {
        match self {
            Self::RawFlash(data) => {
                let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
                ram[..0x40].copy_from_slice(&data[0x4..0x44]);
                ram[BOOTLOADER_ADDR..BOOTLOADER_ADDR + length]
                    .copy_from_slice(&data[0x44..0x44 + length]);
                spi.map_flash(data.clone(), 0, 0);
            }
            Self::Container { data, arm9_offset, arm9_length } => {
                ram[..*arm9_length].copy_from_slice(&data[*arm9_offset..arm9_offset + arm9_length]);
                // Pretend the bootloader already finished
                ram[BOOT_DONE_ADDR] = 0x3F;
                spi.map_flash(data.clone(), *arm9_offset as u32, CONTAINER_FLASH_BASE);
            }
        }
    }
}

fn find_tag(data: &[u8], tag: &[u8; 4]) -> Option<usize> {
    data.windows(4).position(|window| window == tag)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_image() -> Vec<u8> {
        let mut data = vec![0u8; 0x44 + 8];
        data[..4].copy_from_slice(&8u32.to_le_bytes());
        // Reset vector bytes
        data[4] = 0xEA;
        data[5] = 0x00;
        // Bootloader bytes
        for (i, byte) in data[0x44..].iter_mut().enumerate() {
            *byte = 0xB0 + i as u8;
        }
        data
    }

    fn container_image() -> Vec<u8> {
        // Table origin at 0x10; INDX entry at 0x18, LVC_ entry at 0x30 with
        // (offset, length) in the 8 bytes before the tag. Partition at
        // table + 0x40.
        let mut data = vec![0u8; 0x100];
        data[0x18..0x1C].copy_from_slice(b"INDX");
        data[0x28..0x2C].copy_from_slice(&0x40u32.to_le_bytes());
        data[0x2C..0x30].copy_from_slice(&4u32.to_le_bytes());
        data[0x30..0x34].copy_from_slice(b"LVC_");
        data[0x50..0x54].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        data
    }

    #[test]
    fn test_raw_flash_applies_to_ram() {
        let firmware = Firmware::from_flash_image(raw_image()).unwrap();
        let mut ram = vec![0u8; 0x40_0000];
        let mut spi = Spi::new(Default::default());
        firmware.apply(&mut ram, &mut spi);

        assert_eq!(ram[0], 0xEA);
        assert_eq!(&ram[BOOTLOADER_ADDR..BOOTLOADER_ADDR + 8],
                   &[0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7]);
    }

    #[test]
    fn test_raw_flash_too_short() {
        assert!(matches!(
            Firmware::from_flash_image(vec![0; 0x10]),
            Err(FirmwareError::TooShort(0x10))
        ));
    }

    #[test]
    fn test_raw_flash_truncated_bootloader() {
        let mut data = vec![0u8; 0x44];
        data[..4].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            Firmware::from_flash_image(data),
            Err(FirmwareError::TruncatedBootloader { length: 100, .. })
        ));
    }

    #[test]
    fn test_container_partition_lookup() {
        let firmware = Firmware::from_container(container_image()).unwrap();
        match &firmware {
            Firmware::Container { arm9_offset, arm9_length, .. } => {
                assert_eq!(*arm9_offset, 0x50);
                assert_eq!(*arm9_length, 4);
            }
            _ => panic!("expected container"),
        }

        let mut ram = vec![0u8; 0x40_0000];
        let mut spi = Spi::new(Default::default());
        firmware.apply(&mut ram, &mut spi);
        assert_eq!(&ram[..4], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(ram[BOOT_DONE_ADDR], 0x3F);
    }

    #[test]
    fn test_container_missing_tags() {
        assert!(matches!(
            Firmware::from_container(vec![0; 0x100]),
            Err(FirmwareError::MissingIndex)
        ));

        let mut data = vec![0u8; 0x100];
        data[0x18..0x1C].copy_from_slice(b"INDX");
        assert!(matches!(
            Firmware::from_container(data),
            Err(FirmwareError::MissingArm9)
        ));
    }
}
