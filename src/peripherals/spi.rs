//! DRC SPI controller with the two devices behind it
//!
//! Memory-mapped at 0xF0004400, chip selects at 0xF0005000. One SPI bus
//! reaches a NOR FLASH chip holding the firmware and the UIC, the secondary
//! microcontroller that owns the EEPROM, input scanning and firmware-update
//! state. The firmware asserts one of two GPIO chip selects, streams a
//! command byte plus big-endian address bytes through the data register,
//! flips the direction bit and programs a read count, then reads the reply
//! one byte at a time.
//!
//! Every transferred byte can raise IRQ line 6 when the matching enable bit
//! (7 for writes, 6 for reads) is set.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::peripherals::interrupt::Interrupts;
use crate::scheduler::Scheduler;

/// UIC EEPROM size in bytes.
pub const EEPROM_SIZE: usize = 0x800;

/// Version byte reported by the UIC firmware-version command.
const UIC_VERSION: u8 = 0x40;

/// Control register bits
mod ctrl {
    /// Transfer direction: set = read
    pub const READ: u32 = 1 << 1;
    /// Deselect: resets the in-command write counter
    pub const DESELECT: u32 = 1 << 9;
}

/// IRQ enable/flag bits
mod irq {
    pub const READ: u32 = 1 << 6;
    pub const WRITE: u32 = 1 << 7;
}

/// Device reached through the chip-select GPIOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpiDevice {
    None,
    Flash,
    Uic,
}

/// SPI controller and device state.
#[derive(Debug)]
pub struct Spi {
    device: SpiDevice,
    /// Bytes written since the command byte
    write_count: u32,
    /// Command byte of the current transaction
    command: u8,
    /// Big-endian address accumulated from writes 2..=5
    address: u32,
    /// Bytes read since the command byte
    read_index: u32,
    /// FLASH status register (bit 1 = write enable latch)
    flash_status: u8,

    control: u32,
    read_count: u32,
    irq_enable: u32,
    irq_flags: u32,
    dev_select: u32,

    /// Mapped FLASH image
    flash: Vec<u8>,
    /// Offset of the mapped region within the image
    flash_offset: u32,
    /// Virtual FLASH address the mapped region starts at
    flash_base: u32,

    eeprom: [u8; EEPROM_SIZE],
    /// UIC firmware-update status byte
    uic_status: u8,
    /// Host key bitmap driving the input scan
    keys: Arc<AtomicU16>,
    /// Unknown commands already logged, so each logs once
    warned: [u32; 8],
}

impl Spi {
    pub fn new(keys: Arc<AtomicU16>) -> Self {
        Self {
            device: SpiDevice::None,
            write_count: 0,
            command: 0,
            address: 0,
            read_index: 0,
            flash_status: 0,
            control: 0,
            read_count: 0,
            irq_enable: 0,
            irq_flags: 0,
            dev_select: 0,
            flash: Vec::new(),
            flash_offset: 0,
            flash_base: 0,
            eeprom: [0; EEPROM_SIZE],
            uic_status: 0,
            keys,
            warned: [0; 8],
        }
    }

    /// Reset controller and device state. The FLASH image is dropped; the
    /// caller re-applies firmware afterwards.
    pub fn reset(&mut self) {
        self.device = SpiDevice::None;
        self.write_count = 0;
        self.command = 0;
        self.address = 0;
        self.read_index = 0;
        self.flash_status = 0;
        self.control = 0;
        self.read_count = 0;
        self.irq_enable = 0;
        self.irq_flags = 0;
        self.dev_select = 0;
        self.flash = Vec::new();
        self.flash_offset = 0;
        self.flash_base = 0;
        self.eeprom = synthesize_eeprom();
        self.uic_status = 0;
        self.warned = [0; 8];
    }

    /// Install the FLASH image mapping used by read command 0x03.
    pub fn map_flash(&mut self, image: Vec<u8>, offset: u32, base: u32) {
        self.flash = image;
        self.flash_offset = offset;
        self.flash_base = base;
    }

    pub fn read_control(&self) -> u32 {
        self.control
    }

    pub fn read_irq_enable(&self) -> u32 {
        self.irq_enable
    }

    pub fn read_irq_flags(&self) -> u32 {
        self.irq_flags
    }

    /// Report up to 16 words in the read FIFO and an always-empty write FIFO.
    pub fn read_fifo_stat(&self) -> u32 {
        (self.read_count.min(16) << 8) | 0x10
    }

    /// Read one byte from the selected device.
    pub fn read_data(&mut self, irqs: &mut Interrupts, sched: &mut Scheduler) -> u32 {
        // Ensure there's data to read and the direction is correct
        if self.read_count == 0 || self.control & ctrl::READ == 0 {
            return 0;
        }
        self.read_count -= 1;

        let value = match self.device {
            SpiDevice::Flash => self.read_flash(),
            SpiDevice::Uic => self.read_uic(),
            SpiDevice::None => {
                debug!("SPI read with no device selected");
                0
            }
        };

        if self.irq_enable & irq::READ != 0 {
            self.irq_flags |= irq::READ;
            irqs.request(6, sched);
        }
        self.read_index = self.read_index.wrapping_add(1);
        value as u32
    }

    fn read_flash(&mut self) -> u8 {
        match self.command {
            0x03 => {
                // Stream bytes from the mapped image
                let index = self
                    .address
                    .wrapping_sub(self.flash_base)
                    .wrapping_add(self.flash_offset);
                self.address = self.address.wrapping_add(1);
                self.flash.get(index as usize).copied().unwrap_or(0)
            }
            0x05 => self.flash_status,
            0x9F => {
                // JEDEC ID, one byte per read
                let id = match self.address {
                    0 => 0x20,
                    1 => 0xBA,
                    2 => 0x19,
                    _ => 0x00,
                };
                self.address = self.address.wrapping_add(1);
                id
            }
            command => {
                self.warn_once(command);
                0
            }
        }
    }

    fn read_uic(&mut self) -> u8 {
        match self.command {
            0x03 => {
                // EEPROM record addressed by the upper address bytes
                let base = (self.address >> 16).wrapping_sub(0x1101);
                let index = base.wrapping_add(self.read_index) & 0x7FF;
                self.eeprom[index as usize]
            }
            0x05 => 0, // No expansion device attached
            0x07 => self.scan_byte(),
            0x0B => match self.read_index {
                0 | 3 => UIC_VERSION,
                _ => 0,
            },
            0x7F => self.uic_status,
            command => {
                self.warn_once(command);
                0x79
            }
        }
    }

    /// One byte of the input-scan reply: a 4-byte header, the 16-bit key
    /// bitmap, zero padding, and an end marker that closes the scan once 128
    /// bytes have been transferred.
    fn scan_byte(&self) -> u8 {
        match self.read_index {
            0..=3 => 0,
            4 => (self.keys.load(Ordering::Relaxed) & 0xFF) as u8,
            5 => (self.keys.load(Ordering::Relaxed) >> 8) as u8,
            6..=126 => 0,
            _ => 0xFF,
        }
    }

    fn warn_once(&mut self, command: u8) {
        let word = command as usize >> 5;
        let bit = 1 << (command & 0x1F);
        if self.warned[word] & bit == 0 {
            self.warned[word] |= bit;
            warn!("Unknown SPI command for {:?}: 0x{command:02X}", self.device);
        }
    }

    pub fn write_control(&mut self, mask: u32, value: u32) {
        self.control = (self.control & !mask) | (value & mask);

        // Reset the transaction when the chip is deselected
        if self.control & ctrl::DESELECT != 0 {
            self.write_count = 0;
        }
    }

    pub fn write_irq_enable(&mut self, mask: u32, value: u32) {
        self.irq_enable = (self.irq_enable & !mask) | (value & mask);
    }

    /// Acknowledge IRQ flags by writing ones.
    pub fn write_irq_flags(&mut self, mask: u32, value: u32) {
        self.irq_flags &= !(value & mask);
    }

    pub fn write_read_count(&mut self, mask: u32, value: u32) {
        self.read_count = (self.read_count & !mask) | (value & mask);
    }

    pub fn write_dev_select(&mut self, mask: u32, value: u32) {
        self.dev_select = (self.dev_select & !mask) | (value & mask);
    }

    /// Write one byte to the selected device.
    pub fn write_data(&mut self, mask: u32, value: u32, irqs: &mut Interrupts, sched: &mut Scheduler) {
        // Ensure the transfer direction is correct
        if self.control & ctrl::READ != 0 {
            return;
        }
        let byte = (value & mask) as u8;

        self.write_count += 1;
        if self.write_count == 1 {
            // First byte selects the command and restarts the transaction
            self.command = byte;
            self.address = 0;
            self.read_index = 0;
        } else if self.write_count < 6 {
            // Bytes 2..=5 shift into the address, big-endian
            self.address |= (byte as u32) << ((5 - self.write_count) * 8);
        }

        match self.device {
            SpiDevice::Flash => match self.command {
                0x04 => self.flash_status &= !0x2, // Write disable
                0x06 => self.flash_status |= 0x2,  // Write enable
                _ => {}
            },
            SpiDevice::Uic => {
                if self.command == 0x09 && self.write_count == 1 {
                    // Begin firmware update
                    self.uic_status = 0x01;
                }
            }
            SpiDevice::None => debug!("SPI write with no device selected"),
        }

        if self.irq_enable & irq::WRITE != 0 {
            self.irq_flags |= irq::WRITE;
            irqs.request(6, sched);
        }
    }

    /// FLASH chip-select GPIO; bit 0 low asserts the select.
    pub fn write_gpio_flash(&mut self, mask: u32, value: u32) {
        if mask & 0x1 == 0 {
            return;
        }
        if value & 0x1 == 0 {
            self.device = SpiDevice::Flash;
        } else if self.device == SpiDevice::Flash {
            self.device = SpiDevice::None;
            self.write_count = 0;
        }
    }

    /// UIC chip-select GPIO; bit 0 low asserts the select.
    pub fn write_gpio_uic(&mut self, mask: u32, value: u32) {
        if mask & 0x1 == 0 {
            return;
        }
        if value & 0x1 == 0 {
            self.device = SpiDevice::Uic;
        } else if self.device == SpiDevice::Uic {
            self.device = SpiDevice::None;
            self.write_count = 0;
        }
    }
}

/// CRC-16 used by the UIC EEPROM record tails (poly 0x8408, init 0xFFFF,
/// LSB-first shift).
pub(crate) fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0xFFFFu16;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8408 } else { crc >> 1 };
        }
    }
    crc
}

/// Build the 2 KiB EEPROM image: zero-filled records with valid CRC tails so
/// the firmware's integrity checks pass.
fn synthesize_eeprom() -> [u8; EEPROM_SIZE] {
    let mut eeprom = [0u8; EEPROM_SIZE];
    for record in eeprom.chunks_exact_mut(0x100) {
        let crc = crc16(&record[..0xFE]);
        record[0xFE..].copy_from_slice(&crc.to_le_bytes());
    }
    eeprom
}
