//! DRC Wi-Fi module: SDIO host controller plus the first two functions of
//! the BCM43xx chip behind it
//!
//! Memory-mapped at 0xF000D000 with the usual SD-host register layout:
//! argument, command (upper half of the 0x0C slot), four response words, a
//! data port, clock control and interrupt flags/enables. Just enough of the
//! card responds to satisfy the firmware's probe sequence:
//!
//! - CMD5 reports two ready I/O functions, CMD7 selects the card.
//! - CMD52 reaches single function-1 registers: the three window-address
//!   bytes, and the clock CSR whose ready bits follow the request bits
//!   instantly.
//! - CMD53 sets up a multi-byte transfer streamed through the data port;
//!   function-1 reads go through the 32 KiB backplane window, which exposes
//!   the chip/capability/PMU constants and the enumeration ROM describing
//!   the on-chip cores.
//!
//! Latched interrupt flags request CPU IRQ line 9.

use log::warn;

use crate::peripherals::interrupt::Interrupts;
use crate::scheduler::Scheduler;

/// SDIO interrupt flag bits
mod irq {
    pub const CMD_COMPLETE: u32 = 1 << 0;
    pub const TRANSFER_COMPLETE: u32 = 1 << 1;
    pub const READ_READY: u32 = 1 << 5;
    pub const WRITE_READY: u32 = 1 << 6;
}

/// Backplane addresses probed by the firmware
mod backplane {
    pub const CHIP_ID: u32 = 0x1800_0000;
    pub const CAPABILITIES: u32 = 0x1800_0004;
    pub const EROM_PTR: u32 = 0x1800_00FC;
    pub const PMU_CAPS: u32 = 0x1800_0604;
    pub const SOCRAM_INFO: u32 = 0x1800_4000;
    pub const EROM_BASE: u32 = 0x1810_9000;
}

/// Enumeration ROM: component descriptors for the on-chip cores (chipcommon,
/// SOCRAM, SDIO device, D11 MAC, ARM core), terminated by the end marker.
const EROM: [u32; 64] = [
    0x4BF8_0001, 0x2A00_4211, 0x1800_0005, 0x0000_0000, // chipcommon
    0x4BF8_0E01, 0x0400_4211, 0x1800_4005, 0x0000_0000, // socram
    0x4BF8_2901, 0x1400_4211, 0x1800_2005, 0x0000_0000, // sdiod
    0x4BF8_1201, 0x2C00_4211, 0x1800_1005, 0x0000_0000, // d11
    0x4BF8_2A01, 0x0800_4211, 0x1800_3005, 0x0000_0000, // armcm3
    0x0000_0003, 0x1810_9035, 0x0000_0000, 0x0000_0000,
    0x0000_0000, 0x0000_0000, 0x0000_0000, 0x0000_0000,
    0x0000_0000, 0x0000_0000, 0x0000_0000, 0x0000_0000,
    0x0000_0000, 0x0000_0000, 0x0000_0000, 0x0000_0000,
    0x0000_0000, 0x0000_0000, 0x0000_0000, 0x0000_0000,
    0x0000_0000, 0x0000_0000, 0x0000_0000, 0x0000_0000,
    0x0000_0000, 0x0000_0000, 0x0000_0000, 0x0000_0000,
    0x0000_0000, 0x0000_0000, 0x0000_0000, 0x0000_0000,
    0x0000_0000, 0x0000_0000, 0x0000_0000, 0x0000_0000,
    0x0000_0000, 0x0000_0000, 0x0000_0000, 0x0000_0000,
    0x0000_0000, 0x0000_0000, 0x0000_0000, 0x0000_000F,
];

/// An in-flight CMD53 transfer streamed through the data port.
#[derive(Debug, Clone, Copy)]
struct Transfer {
    function: u32,
    address: u32,
    remaining: u32,
    write: bool,
    increment: bool,
}

/// SDIO host controller and card state.
#[derive(Debug)]
pub struct Wifi {
    response: [u32; 4],
    args: u32,
    irq_flags: u32,
    irq_enable: u32,
    clock_control: u16,
    /// Function-1 backplane window base
    window_base: u32,
    /// Chip clock CSR byte
    clock_csr: u8,
    transfer: Option<Transfer>,
}

impl Wifi {
    pub fn new() -> Self {
        Self {
            response: [0; 4],
            args: 0,
            irq_flags: 0,
            irq_enable: 0,
            clock_control: 0,
            window_base: 0,
            clock_csr: 0,
            transfer: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Latch an interrupt flag if its enable bit is set, requesting the CPU
    /// line on a rising edge.
    fn set_flag(&mut self, flag: u32, irqs: &mut Interrupts, sched: &mut Scheduler) {
        if self.irq_enable & flag == 0 {
            return;
        }
        self.irq_flags |= flag;
        irqs.request(9, sched);
    }

    pub fn read_response(&self, i: usize) -> u32 {
        self.response[i]
    }

    pub fn read_clock_ctrl(&self) -> u16 {
        self.clock_control
    }

    pub fn read_irq_flags(&self) -> u32 {
        self.irq_flags
    }

    pub fn read_irq_enable(&self) -> u32 {
        self.irq_enable
    }

    pub fn write_args(&mut self, mask: u32, value: u32) {
        self.args = (self.args & !mask) | (value & mask);
    }

    /// Execute an SDIO command. Completion is instant.
    pub fn write_command(&mut self, mask: u16, value: u16, irqs: &mut Interrupts, sched: &mut Scheduler) {
        self.set_flag(irq::CMD_COMPLETE, irqs, sched);

        let cmd = (((value & mask) >> 8) & 0x3F) as u8;
        match cmd {
            5 => {
                // Operation condition: two I/O functions, card ready
                self.response[0] = 0xA0FE_0000;
            }
            7 => {
                self.response[0] = 0x1E00;
            }
            52 => self.cmd52(),
            53 => self.cmd53(irqs, sched),
            _ => warn!("Unknown SDIO command: {cmd}"),
        }
    }

    /// Single-byte register access.
    fn cmd52(&mut self) {
        let function = (self.args >> 28) & 0x7;
        let address = (self.args >> 9) & 0x1_FFFF;
        let data = self.args & 0xFF;

        if function != 1 {
            warn!("SDIO CMD52 to unhandled function {function}");
            self.response[0] = 0;
            return;
        }

        if self.args & 0x8000_0000 != 0 {
            match address {
                // Window address bytes: bits 15, 23:16, 31:24
                0x1000A => self.window_base = (self.window_base & !0x0000_FF00) | (data << 8),
                0x1000B => self.window_base = (self.window_base & !0x00FF_0000) | (data << 16),
                0x1000C => self.window_base = (self.window_base & !0xFF00_0000) | (data << 24),
                0x1000E => {
                    // Clock CSR: ready bits follow the request bits instantly
                    self.clock_csr = (self.clock_csr & !0x3F) | (data as u8 & 0x3F);
                    self.clock_csr |= (self.clock_csr << 3) & 0xC0;
                }
                _ => {
                    warn!("Unknown SDIO register write: 0x{data:02X} @ 0x{address:05X}");
                    self.response[0] = 0;
                    return;
                }
            }
            self.response[0] = data;
        } else {
            self.response[0] = match address {
                0x1000A => (self.window_base >> 8) & 0xFF,
                0x1000B => (self.window_base >> 16) & 0xFF,
                0x1000C => (self.window_base >> 24) & 0xFF,
                0x1000E => self.clock_csr as u32,
                0x8000..=0xFFFF => self.backplane_byte(self.window(address)) as u32,
                _ => {
                    warn!("Unknown SDIO register read: 0x{address:05X}");
                    0
                }
            };
        }
    }

    /// Multi-byte transfer setup; data then streams through the data port.
    fn cmd53(&mut self, irqs: &mut Interrupts, sched: &mut Scheduler) {
        let write = self.args & 0x8000_0000 != 0;
        let count = match self.args & 0x1FF {
            0 => 0x200,
            n => n,
        };
        self.transfer = Some(Transfer {
            function: (self.args >> 28) & 0x7,
            address: (self.args >> 9) & 0x1_FFFF,
            remaining: count,
            write,
            increment: self.args & (1 << 26) != 0,
        });
        self.set_flag(if write { irq::WRITE_READY } else { irq::READ_READY }, irqs, sched);
    }

    /// Map a function-1 address through the backplane window.
    fn window(&self, address: u32) -> u32 {
        (self.window_base & 0xFFFF_8000) | (address & 0x7FFF)
    }

    /// One byte of the 32-bit backplane space.
    fn backplane_byte(&self, address: u32) -> u8 {
        let word = match address & !3 {
            backplane::CHIP_ID => 0x1691_4319,
            backplane::CAPABILITIES => 0x1048_0009,
            backplane::EROM_PTR => backplane::EROM_BASE,
            backplane::PMU_CAPS => 0x19CC_3607,
            backplane::SOCRAM_INFO => 0x0025_8033,
            addr if (backplane::EROM_BASE..backplane::EROM_BASE + 0x100).contains(&addr) => {
                EROM[((addr - backplane::EROM_BASE) >> 2) as usize]
            }
            addr => {
                warn!("Unknown SDIO backplane read: 0x{addr:08X}");
                0
            }
        };
        (word >> ((address & 3) * 8)) as u8
    }

    /// Read up to four bytes of an in-flight CMD53 transfer.
    pub fn read_data(&mut self, irqs: &mut Interrupts, sched: &mut Scheduler) -> u32 {
        let mut transfer = match self.transfer {
            Some(t) if !t.write => t,
            _ => return 0,
        };

        let mut value = 0u32;
        for i in 0..4 {
            if transfer.remaining == 0 {
                break;
            }
            let byte = if transfer.function == 1 {
                self.backplane_byte(self.window(transfer.address))
            } else {
                0
            };
            value |= (byte as u32) << (i * 8);
            if transfer.increment {
                transfer.address = transfer.address.wrapping_add(1);
            }
            transfer.remaining -= 1;
        }

        if transfer.remaining == 0 {
            self.transfer = None;
            self.set_flag(irq::TRANSFER_COMPLETE, irqs, sched);
        } else {
            self.transfer = Some(transfer);
        }
        value
    }

    /// Consume up to four bytes of an in-flight CMD53 write.
    pub fn write_data(&mut self, mask: u32, _value: u32, irqs: &mut Interrupts, sched: &mut Scheduler) {
        let mut transfer = match self.transfer {
            Some(t) if t.write => t,
            _ => return,
        };

        // Writes toward the card are accepted and dropped
        let bytes = (mask.count_ones() / 8).max(1);
        for _ in 0..bytes {
            if transfer.remaining == 0 {
                break;
            }
            if transfer.increment {
                transfer.address = transfer.address.wrapping_add(1);
            }
            transfer.remaining -= 1;
        }

        if transfer.remaining == 0 {
            self.transfer = None;
            self.set_flag(irq::TRANSFER_COMPLETE, irqs, sched);
        } else {
            self.transfer = Some(transfer);
        }
    }

    /// Clock control, low 16 bits of the 0x2C slot; the stable bit reports
    /// instantly when the clock is enabled.
    pub fn write_clock_ctrl(&mut self, mask: u16, value: u16) {
        self.clock_control = (self.clock_control & !mask) | (value & mask);
        self.clock_control |= (self.clock_control << 1) & 0x2;
    }

    /// Acknowledge interrupt flags by writing ones.
    pub fn write_irq_flags(&mut self, mask: u32, value: u32) {
        self.irq_flags &= !(value & mask);
    }

    pub fn write_irq_enable(&mut self, mask: u32, value: u32) {
        self.irq_enable = (self.irq_enable & !mask) | (value & mask);
    }
}

impl Default for Wifi {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Wifi, Interrupts, Scheduler) {
        (Wifi::new(), Interrupts::new(), Scheduler::new())
    }

    fn command(wifi: &mut Wifi, irqs: &mut Interrupts, sched: &mut Scheduler, cmd: u16, args: u32) {
        wifi.write_args(0xFFFF_FFFF, args);
        wifi.write_command(0xFFFF, cmd << 8, irqs, sched);
    }

    fn cmd52_write(address: u32, data: u8) -> u32 {
        0x8000_0000 | (1 << 28) | (address << 9) | data as u32
    }

    fn cmd52_read(address: u32) -> u32 {
        (1 << 28) | (address << 9)
    }

    #[test]
    fn test_op_cond_and_select() {
        let (mut wifi, mut irqs, mut sched) = setup();
        command(&mut wifi, &mut irqs, &mut sched, 5, 0);
        assert_eq!(wifi.read_response(0), 0xA0FE_0000);

        command(&mut wifi, &mut irqs, &mut sched, 7, 0);
        assert_eq!(wifi.read_response(0), 0x1E00);
    }

    #[test]
    fn test_command_complete_flag_gated() {
        let (mut wifi, mut irqs, mut sched) = setup();
        command(&mut wifi, &mut irqs, &mut sched, 5, 0);
        assert_eq!(wifi.read_irq_flags(), 0);

        wifi.write_irq_enable(0xFFFF_FFFF, 0x1);
        command(&mut wifi, &mut irqs, &mut sched, 5, 0);
        assert_eq!(wifi.read_irq_flags(), 0x1);
        assert_eq!(irqs.pending() & (1 << 9), 1 << 9);

        wifi.write_irq_flags(0xFFFF_FFFF, 0x1);
        assert_eq!(wifi.read_irq_flags(), 0);
    }

    #[test]
    fn test_clock_csr_ready_bits() {
        let (mut wifi, mut irqs, mut sched) = setup();
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_write(0x1000E, 0x18));
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_read(0x1000E));
        // Request bits 3/4 are mirrored into ready bits 6/7
        assert_eq!(wifi.read_response(0), 0xD8);
    }

    #[test]
    fn test_window_and_chip_id() {
        let (mut wifi, mut irqs, mut sched) = setup();
        // Point the window at 0x18000000
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_write(0x1000A, 0x00));
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_write(0x1000B, 0x00));
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_write(0x1000C, 0x18));

        // Chip id, byte by byte through the window
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_read(0x8000));
        assert_eq!(wifi.read_response(0), 0x19);
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_read(0x8001));
        assert_eq!(wifi.read_response(0), 0x43);
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_read(0x8002));
        assert_eq!(wifi.read_response(0), 0x91);
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_read(0x8003));
        assert_eq!(wifi.read_response(0), 0x16);
    }

    #[test]
    fn test_cmd53_streams_erom() {
        let (mut wifi, mut irqs, mut sched) = setup();
        wifi.write_irq_enable(0xFFFF_FFFF, 0xFFFF_FFFF);

        // Window at the EROM, read 8 bytes from its start
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_write(0x1000A, 0x90));
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_write(0x1000B, 0x10));
        command(&mut wifi, &mut irqs, &mut sched, 52, cmd52_write(0x1000C, 0x18));
        command(&mut wifi, &mut irqs, &mut sched, 53, (1 << 28) | (1 << 26) | (0x9000 << 9) | 8);
        assert_eq!(wifi.read_irq_flags() & (1 << 5), 1 << 5);

        assert_eq!(wifi.read_data(&mut irqs, &mut sched), EROM[0]);
        assert_eq!(wifi.read_data(&mut irqs, &mut sched), EROM[1]);
        assert_eq!(wifi.read_irq_flags() & (1 << 1), 1 << 1);
        // Transfer exhausted
        assert_eq!(wifi.read_data(&mut irqs, &mut sched), 0);
    }

    #[test]
    fn test_cmd53_write_completes() {
        let (mut wifi, mut irqs, mut sched) = setup();
        wifi.write_irq_enable(0xFFFF_FFFF, 0xFFFF_FFFF);

        command(&mut wifi, &mut irqs, &mut sched, 53, 0x8000_0000 | (1 << 28) | (1 << 26) | (0x9000 << 9) | 4);
        assert_eq!(wifi.read_irq_flags() & (1 << 6), 1 << 6);

        wifi.write_data(0xFFFF_FFFF, 0x1234_5678, &mut irqs, &mut sched);
        assert_eq!(wifi.read_irq_flags() & (1 << 1), 1 << 1);
    }

    #[test]
    fn test_clock_control_stable_bit() {
        let (mut wifi, _irqs, _sched) = setup();
        wifi.write_clock_ctrl(0xFFFF, 0x1);
        assert_eq!(wifi.read_clock_ctrl(), 0x3);
    }
}
