//! System bus for the DRC
//!
//! A flat 32-bit address space routing aligned accesses to RAM or the MMIO
//! register file:
//!
//! ```text
//! 0x00000000 - 0x3FFFFFFF : RAM, 4MB array mirrored throughout
//! 0xF0000000 - 0xFFFFFFFF : Memory-mapped I/O
//! everything else         : Unmapped (reads 0, writes dropped)
//! ```
//!
//! MMIO registers live in 4-byte slots. An access of any width is split into
//! per-slot pieces: each recognized slot's handler is invoked once with a
//! byte mask and the data shifted into register position, bytes that miss
//! every slot are dropped (after a log on the first byte). This keeps the
//! firmware's byte, halfword and word accesses to the same register all
//! behaving identically.

use std::collections::VecDeque;
use std::sync::atomic::AtomicU16;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::peripherals::display::{Display, FrameQueue, SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::peripherals::dma::{ctrl as dma_ctrl, Dma};
use crate::peripherals::i2c::I2c;
use crate::peripherals::interrupt::Interrupts;
use crate::peripherals::spi::Spi;
use crate::peripherals::timer::Timers;
use crate::peripherals::wifi::Wifi;
use crate::scheduler::{Event, Scheduler, REBASE_INTERVAL};

/// RAM size; the whole low range mirrors this array.
pub const RAM_SIZE: usize = 0x40_0000;

/// Cycles between display frames (108 MHz clock, 60 Hz refresh).
pub const FRAME_CYCLES: u64 = 108_000_000 / 60;

/// MMIO register addresses (4-byte slot bases).
pub mod regs {
    pub const TIMER_SCALE: u32 = 0xF000_0400;
    pub const COUNT_SCALE: u32 = 0xF000_0404;
    pub const COUNTER: u32 = 0xF000_0408;
    pub const TIMER0_VALUE: u32 = 0xF000_0410;
    pub const TIMER0_TARGET: u32 = 0xF000_0414;
    pub const TIMER0_CONTROL: u32 = 0xF000_0418;
    pub const TIMER1_VALUE: u32 = 0xF000_0420;
    pub const TIMER1_TARGET: u32 = 0xF000_0424;
    pub const TIMER1_CONTROL: u32 = 0xF000_0428;

    pub const IRQ_CONFIG_BASE: u32 = 0xF000_0440;
    pub const IRQ_CONFIG_END: u32 = 0xF000_04BC;
    pub const IRQ_INDEX: u32 = 0xF000_04C0;
    pub const IRQ_PRIO_MASK: u32 = 0xF000_04C4;
    /// Mirror of [`IRQ_PRIO_MASK`]
    pub const IRQ_PRIO_MIRROR: u32 = 0xF000_04C8;
    pub const IRQ_PRIO_CLEAR: u32 = 0xF000_04CC;

    pub const SPI_IRQ_ENABLE: u32 = 0xF000_4400;
    pub const SPI_CONTROL: u32 = 0xF000_4404;
    pub const SPI_IRQ_FLAGS: u32 = 0xF000_4408;
    pub const SPI_FIFO_STAT: u32 = 0xF000_440C;
    pub const SPI_DATA: u32 = 0xF000_4410;
    pub const SPI_READ_COUNT: u32 = 0xF000_4420;
    pub const SPI_DEV_SELECT: u32 = 0xF000_4424;

    pub const SPI_DMA_ENABLE: u32 = 0xF000_4C00;
    pub const SPI_DMA_CONTROL: u32 = 0xF000_4C04;
    pub const SPI_DMA_COUNT: u32 = 0xF000_4C08;
    pub const SPI_DMA_ADDRESS: u32 = 0xF000_4C0C;

    pub const GPIO_FLASH_CS: u32 = 0xF000_5000;
    pub const GPIO_UIC_CS: u32 = 0xF000_5004;

    /// Three general channels, 0x40 apart; offsets 0x00 enable, 0x04
    /// control, 0x08 count, 0x0C src, 0x10 dst, 0x14 chunk size, 0x18 src
    /// stride, 0x1C dst stride, 0x20 fill
    pub const DMA_BASE: u32 = 0xF000_5800;
    pub const DMA_END: u32 = 0xF000_58BF;

    /// Four buses, 0x100 apart; offsets 0x00 control, 0x04 status, 0x08 data
    pub const I2C_BASE: u32 = 0xF000_8400;
    pub const I2C_END: u32 = 0xF000_87FF;
    pub const I2C_IRQ_ENABLE: u32 = 0xF000_8800;
    pub const I2C_IRQ_FLAGS: u32 = 0xF000_8804;

    pub const FB_X_OFFSET: u32 = 0xF000_9464;
    pub const FB_WIDTH: u32 = 0xF000_9468;
    pub const FB_Y_OFFSET: u32 = 0xF000_946C;
    pub const FB_HEIGHT: u32 = 0xF000_9470;
    pub const FB_ADDRESS: u32 = 0xF000_9474;
    pub const FB_STRIDE: u32 = 0xF000_9478;
    pub const PIXEL_FORMAT: u32 = 0xF000_947C;
    pub const PAL_ADDRESS: u32 = 0xF000_9500;
    pub const PAL_DATA: u32 = 0xF000_9504;

    pub const SDIO_ARGS: u32 = 0xF000_D008;
    /// Command register in bits 31:16 of the slot
    pub const SDIO_COMMAND: u32 = 0xF000_D00C;
    pub const SDIO_RESPONSE0: u32 = 0xF000_D010;
    pub const SDIO_RESPONSE1: u32 = 0xF000_D014;
    pub const SDIO_RESPONSE2: u32 = 0xF000_D018;
    pub const SDIO_RESPONSE3: u32 = 0xF000_D01C;
    pub const SDIO_DATA: u32 = 0xF000_D020;
    /// Clock control in bits 15:0 of the slot
    pub const SDIO_CLOCK: u32 = 0xF000_D02C;
    pub const SDIO_IRQ_FLAGS: u32 = 0xF000_D030;
    pub const SDIO_IRQ_ENABLE: u32 = 0xF000_D034;
}

/// The bus: RAM, every peripheral, and the scheduler that sequences them.
pub struct Bus {
    ram: Vec<u8>,
    pub scheduler: Scheduler,
    pub irq: Interrupts,
    pub timers: Timers,
    pub display: Display,
    pub spi: Spi,
    pub dma: Dma,
    pub i2c: I2c,
    pub wifi: Wifi,
}

impl Bus {
    pub fn new(frames: FrameQueue, keys: Arc<AtomicU16>) -> Self {
        Self {
            ram: vec![0; RAM_SIZE],
            scheduler: Scheduler::new(),
            irq: Interrupts::new(),
            timers: Timers::new(),
            display: Display::new(frames),
            spi: Spi::new(keys),
            dma: Dma::new(),
            i2c: I2c::new(),
            wifi: Wifi::new(),
        }
    }

    /// Zero RAM and peripheral state, then queue the initial events.
    pub fn reset(&mut self) {
        self.ram.fill(0);
        self.scheduler.reset();
        self.irq.reset();
        self.display.reset();
        self.spi.reset();
        self.dma.reset();
        self.i2c.reset();
        self.wifi.reset();
        self.timers.reset(&mut self.scheduler);
        self.scheduler.schedule(Event::DrawFrame, FRAME_CYCLES);
        self.scheduler.schedule(Event::ResetCycles, REBASE_INTERVAL);
    }

    /// Seed RAM and the SPI FLASH mapping from a firmware image.
    pub fn apply_firmware(&mut self, firmware: &crate::firmware::Firmware) {
        firmware.apply(&mut self.ram, &mut self.spi);
    }

    pub fn read8(&mut self, address: u32) -> u8 {
        self.read(address, 1) as u8
    }

    pub fn read16(&mut self, address: u32) -> u16 {
        self.read(address & !1, 2) as u16
    }

    pub fn read32(&mut self, address: u32) -> u32 {
        self.read(address & !3, 4)
    }

    pub fn write8(&mut self, address: u32, value: u8) {
        self.write(address, 1, value as u32);
    }

    pub fn write16(&mut self, address: u32, value: u16) {
        self.write(address & !1, 2, value as u32);
    }

    pub fn write32(&mut self, address: u32, value: u32) {
        self.write(address & !3, 4, value);
    }

    /// Read an LSB-first value from RAM or the I/O register file.
    fn read(&mut self, address: u32, size: u32) -> u32 {
        if address < 0x4000_0000 {
            let base = address as usize & (RAM_SIZE - 1);
            let mut value = 0;
            for i in 0..size as usize {
                value |= (self.ram[base + i] as u32) << (i * 8);
            }
            return value;
        }
        if address >> 28 == 0xF {
            return self.io_read(address, size);
        }

        warn!("Unmapped memory read: 0x{address:08X}");
        0
    }

    /// Write an LSB-first value to RAM or the I/O register file.
    fn write(&mut self, address: u32, size: u32, value: u32) {
        if address < 0x4000_0000 {
            let base = address as usize & (RAM_SIZE - 1);
            for i in 0..size as usize {
                self.ram[base + i] = (value >> (i * 8)) as u8;
            }
            return;
        }
        if address >> 28 == 0xF {
            return self.io_write(address, size, value);
        }

        warn!("Unmapped memory write: 0x{address:08X}");
    }

    /// Read a value spanning one or more I/O registers.
    fn io_read(&mut self, address: u32, size: u32) -> u32 {
        let mut value = 0;
        let mut i = 0;
        while i < size {
            let slot = (address + i) & !3;
            let off = (address + i) & 3;
            let data = match slot {
                regs::COUNTER => self.timers.read_counter(),
                regs::TIMER0_VALUE => self.timers.read_timer(0),
                regs::TIMER0_CONTROL => self.timers.read_control(0),
                regs::TIMER1_VALUE => self.timers.read_timer(1),
                regs::TIMER1_CONTROL => self.timers.read_control(1),
                regs::IRQ_CONFIG_BASE..=regs::IRQ_CONFIG_END => {
                    self.irq.read_config(((slot - regs::IRQ_CONFIG_BASE) >> 2) as usize)
                }
                regs::IRQ_INDEX => self.irq.read_index(),
                regs::IRQ_PRIO_MASK | regs::IRQ_PRIO_MIRROR => self.irq.read_prio_mask(),
                regs::IRQ_PRIO_CLEAR => self.irq.read_prio_clear(),
                regs::SPI_IRQ_ENABLE => self.spi.read_irq_enable(),
                regs::SPI_CONTROL => self.spi.read_control(),
                regs::SPI_IRQ_FLAGS => self.spi.read_irq_flags(),
                regs::SPI_FIFO_STAT => self.spi.read_fifo_stat(),
                regs::SPI_DATA => self.spi.read_data(&mut self.irq, &mut self.scheduler),
                regs::SPI_DMA_CONTROL => self.dma.read_spi_control(),
                regs::SPI_DMA_COUNT => self.dma.read_spi_count(),
                s if (regs::DMA_BASE..=regs::DMA_END).contains(&s) => {
                    let ch = ((s - regs::DMA_BASE) >> 6) as usize;
                    match s & 0x3F {
                        0x04 => self.dma.read_control(ch),
                        0x08 => self.dma.read_count(ch),
                        0x0C => self.dma.read_src_addr(ch),
                        0x10 => self.dma.read_dst_addr(ch),
                        _ => {
                            if i == 0 {
                                warn!("Unknown I/O register read: 0x{address:08X}");
                                return 0;
                            }
                            i += 1;
                            continue;
                        }
                    }
                }
                s if (regs::I2C_BASE..=regs::I2C_END).contains(&s) => {
                    let bus = ((s - regs::I2C_BASE) >> 8) as usize;
                    match s & 0xFF {
                        0x04 => self.i2c.read_status(bus),
                        0x08 => self.i2c.read_data(bus, &mut self.irq, &mut self.scheduler),
                        _ => {
                            if i == 0 {
                                warn!("Unknown I/O register read: 0x{address:08X}");
                                return 0;
                            }
                            i += 1;
                            continue;
                        }
                    }
                }
                regs::I2C_IRQ_ENABLE => self.i2c.read_irq_enable(),
                regs::I2C_IRQ_FLAGS => self.i2c.read_irq_flags(),
                regs::FB_X_OFFSET => self.display.read_fb_x_offset(),
                regs::FB_WIDTH => self.display.read_fb_width(),
                regs::FB_Y_OFFSET => self.display.read_fb_y_offset(),
                regs::FB_HEIGHT => self.display.read_fb_height(),
                regs::FB_ADDRESS => self.display.read_fb_address(),
                regs::SDIO_ARGS => 0,
                regs::SDIO_RESPONSE0 => self.wifi.read_response(0),
                regs::SDIO_RESPONSE1 => self.wifi.read_response(1),
                regs::SDIO_RESPONSE2 => self.wifi.read_response(2),
                regs::SDIO_RESPONSE3 => self.wifi.read_response(3),
                regs::SDIO_DATA => self.wifi.read_data(&mut self.irq, &mut self.scheduler),
                regs::SDIO_CLOCK => self.wifi.read_clock_ctrl() as u32,
                regs::SDIO_IRQ_FLAGS => self.wifi.read_irq_flags(),
                regs::SDIO_IRQ_ENABLE => self.wifi.read_irq_enable(),
                _ => {
                    if i == 0 {
                        warn!("Unknown I/O register read: 0x{address:08X}");
                        return 0;
                    }
                    i += 1;
                    continue;
                }
            };
            value |= (data >> (off * 8)) << (i * 8);
            i += 4 - off;
        }
        value
    }

    /// Write a value spanning one or more I/O registers.
    fn io_write(&mut self, address: u32, size: u32, value: u32) {
        let mut i = 0;
        while i < size {
            let slot = (address + i) & !3;
            let off = (address + i) & 3;
            let data = (value >> (i * 8)) << (off * 8);
            let mask = (((1u64 << ((size - i) * 8)) - 1) as u32) << (off * 8);
            match slot {
                regs::TIMER_SCALE => self.timers.write_timer_scale(mask, data, &mut self.scheduler),
                regs::COUNT_SCALE => self.timers.write_count_scale(mask, data, &mut self.scheduler),
                regs::COUNTER => self.timers.write_counter(mask, data),
                regs::TIMER0_VALUE => self.timers.write_timer(0, mask, data),
                regs::TIMER0_TARGET => self.timers.write_target(0, mask, data),
                regs::TIMER0_CONTROL => self.timers.write_control(0, mask, data),
                regs::TIMER1_VALUE => self.timers.write_timer(1, mask, data),
                regs::TIMER1_TARGET => self.timers.write_target(1, mask, data),
                regs::TIMER1_CONTROL => self.timers.write_control(1, mask, data),
                regs::IRQ_CONFIG_BASE..=regs::IRQ_CONFIG_END => {
                    let n = ((slot - regs::IRQ_CONFIG_BASE) >> 2) as usize;
                    self.irq.write_config(n, mask, data, &mut self.scheduler);
                }
                regs::IRQ_PRIO_MASK | regs::IRQ_PRIO_MIRROR => {
                    self.irq.write_prio_mask(mask, data, &mut self.scheduler)
                }
                regs::SPI_IRQ_ENABLE => self.spi.write_irq_enable(mask, data),
                regs::SPI_CONTROL => self.spi.write_control(mask, data),
                regs::SPI_IRQ_FLAGS => self.spi.write_irq_flags(mask, data),
                regs::SPI_DATA => self.spi.write_data(mask, data, &mut self.irq, &mut self.scheduler),
                regs::SPI_READ_COUNT => self.spi.write_read_count(mask, data),
                regs::SPI_DEV_SELECT => self.spi.write_dev_select(mask, data),
                regs::SPI_DMA_ENABLE => self.dma_spi_enable(mask, data),
                regs::SPI_DMA_CONTROL => self.dma.write_spi_control(mask, data),
                regs::SPI_DMA_COUNT => self.dma.write_spi_count(mask, data),
                regs::SPI_DMA_ADDRESS => self.dma.write_spi_address(mask, data),
                regs::GPIO_FLASH_CS => self.spi.write_gpio_flash(mask, data),
                regs::GPIO_UIC_CS => self.spi.write_gpio_uic(mask, data),
                s if (regs::DMA_BASE..=regs::DMA_END).contains(&s) && s & 0x3F <= 0x20 => {
                    let ch = ((s - regs::DMA_BASE) >> 6) as usize;
                    match s & 0x3F {
                        0x00 => self.dma_enable(ch, mask, data),
                        0x04 => self.dma.write_control(ch, mask, data),
                        0x08 => self.dma.write_count(ch, mask, data),
                        0x0C => self.dma.write_src_addr(ch, mask, data),
                        0x10 => self.dma.write_dst_addr(ch, mask, data),
                        0x14 => self.dma.write_chunk_size(ch, mask, data),
                        0x18 => self.dma.write_src_stride(ch, mask, data),
                        0x1C => self.dma.write_dst_stride(ch, mask, data),
                        _ => self.dma.write_fill(ch, mask, data),
                    }
                }
                s if (regs::I2C_BASE..=regs::I2C_END).contains(&s) && s & 0xFF <= 0x08 => {
                    let bus = ((s - regs::I2C_BASE) >> 8) as usize;
                    match s & 0xFF {
                        0x00 => self.i2c.write_control(bus, mask, data, &mut self.irq, &mut self.scheduler),
                        0x08 => self.i2c.write_data(bus, mask, data, &mut self.irq, &mut self.scheduler),
                        _ => {}
                    }
                }
                regs::I2C_IRQ_ENABLE => self.i2c.write_irq_enable(mask, data),
                regs::I2C_IRQ_FLAGS => self.i2c.write_irq_ack(mask, data),
                regs::FB_X_OFFSET => self.display.write_fb_x_offset(mask, data),
                regs::FB_WIDTH => self.display.write_fb_width(mask, data),
                regs::FB_Y_OFFSET => self.display.write_fb_y_offset(mask, data),
                regs::FB_HEIGHT => self.display.write_fb_height(mask, data),
                regs::FB_ADDRESS => self.display.write_fb_address(mask, data),
                regs::FB_STRIDE => self.display.write_fb_stride(mask, data),
                regs::PIXEL_FORMAT => self.display.write_pixel_format(mask, data),
                regs::PAL_ADDRESS => self.display.write_pal_address(mask, data),
                regs::PAL_DATA => self.display.write_pal_data(mask, data),
                regs::SDIO_ARGS => self.wifi.write_args(mask, data),
                regs::SDIO_COMMAND => {
                    if mask >> 16 != 0 {
                        self.wifi.write_command(
                            (mask >> 16) as u16,
                            (data >> 16) as u16,
                            &mut self.irq,
                            &mut self.scheduler,
                        );
                    }
                }
                regs::SDIO_DATA => self.wifi.write_data(mask, data, &mut self.irq, &mut self.scheduler),
                regs::SDIO_CLOCK => {
                    if mask & 0xFFFF != 0 {
                        self.wifi.write_clock_ctrl(mask as u16, data as u16);
                    }
                }
                regs::SDIO_IRQ_FLAGS => self.wifi.write_irq_flags(mask, data),
                regs::SDIO_IRQ_ENABLE => self.wifi.write_irq_enable(mask, data),
                _ => {
                    if i == 0 {
                        warn!("Unknown I/O register write: 0x{address:08X}");
                        return;
                    }
                    i += 1;
                    continue;
                }
            }
            i += 4 - off;
        }
    }

    /// Run the SPI DMA channel: `count + 1` bytes between RAM and the SPI
    /// data port, completing instantly and raising IRQ line 8.
    pub fn dma_spi_enable(&mut self, mask: u32, value: u32) {
        if mask & value & 0x1 == 0 {
            return;
        }

        if self.dma.spi_control & dma_ctrl::SPI_WRITE != 0 {
            while self.dma.spi_count != u32::MAX {
                let address = self.dma.spi_address;
                let byte = self.read8(address) as u32;
                self.spi.write_data(0xFF, byte, &mut self.irq, &mut self.scheduler);
                self.dma.spi_address = address.wrapping_add(1);
                self.dma.spi_count = self.dma.spi_count.wrapping_sub(1);
            }
        } else {
            while self.dma.spi_count != u32::MAX {
                let byte = self.spi.read_data(&mut self.irq, &mut self.scheduler) as u8;
                let address = self.dma.spi_address;
                self.write8(address, byte);
                self.dma.spi_address = address.wrapping_add(1);
                self.dma.spi_count = self.dma.spi_count.wrapping_sub(1);
            }
        }
        self.irq.request(8, &mut self.scheduler);
    }

    /// Run a general DMA channel: `count + 1` bytes copied (or filled), with
    /// the source/destination strides applied after every chunk.
    pub fn dma_enable(&mut self, ch: usize, mask: u32, value: u32) {
        if mask & value & 0x1 == 0 {
            return;
        }

        let fill = self.dma.controls[ch] & dma_ctrl::SIMPLE_FILL != 0;
        let chunk_size = self.dma.chunk_sizes[ch];
        let mut chunk_pos = 0;
        while self.dma.counts[ch] != u32::MAX {
            let byte = if fill {
                self.dma.fills[ch] as u8
            } else {
                let src = self.dma.src_addrs[ch];
                self.read8(src)
            };
            let dst = self.dma.dst_addrs[ch];
            self.write8(dst, byte);

            self.dma.src_addrs[ch] = self.dma.src_addrs[ch].wrapping_add(1);
            self.dma.dst_addrs[ch] = self.dma.dst_addrs[ch].wrapping_add(1);
            self.dma.counts[ch] = self.dma.counts[ch].wrapping_sub(1);

            chunk_pos += 1;
            if chunk_size != 0 && chunk_pos == chunk_size {
                self.dma.src_addrs[ch] = self.dma.src_addrs[ch].wrapping_add(self.dma.src_strides[ch]);
                self.dma.dst_addrs[ch] = self.dma.dst_addrs[ch].wrapping_add(self.dma.dst_strides[ch]);
                chunk_pos = 0;
            }
        }

        let line = if ch == 2 { 12 } else { 13 + ch as u32 };
        self.irq.request(line, &mut self.scheduler);
    }

    /// Render one frame from the firmware's framebuffer into an 854x480 ABGR
    /// buffer, queue it for the host, raise V-blank, and re-arm the event.
    pub fn draw_frame(&mut self) {
        let address = self.display.fb_address;
        let width = self.display.fb_width;
        let height = self.display.fb_height;
        let stride = self.display.fb_stride;
        let x_offset = self.display.fb_x_offset as i64 - 96;
        let y_offset = self.display.fb_y_offset as i64 - 8;
        let format = self.display.pixel_format;

        let mut buffer = vec![0xFF00_0000u32; SCREEN_WIDTH * SCREEN_HEIGHT];
        if format == 0 || format == 2 {
            for y in 0..height {
                let dy = y as i64 + y_offset;
                if !(0..SCREEN_HEIGHT as i64).contains(&dy) {
                    continue;
                }
                let row = address.wrapping_add(y.wrapping_mul(stride));
                for x in 0..width {
                    let dx = x as i64 + x_offset;
                    if !(0..SCREEN_WIDTH as i64).contains(&dx) {
                        continue;
                    }
                    let color = if format == 0 {
                        let index = self.read8(row.wrapping_add(x));
                        self.display.palette[index as usize]
                    } else {
                        let pixel = self.read16(row.wrapping_add(x * 2));
                        Display::expand_1555(pixel)
                    };
                    buffer[dy as usize * SCREEN_WIDTH + dx as usize] = color;
                }
            }
        } else {
            warn!("Skipping frame with unhandled pixel format: {format}");
        }

        self.display.push_frame(buffer);
        self.irq.request(22, &mut self.scheduler);
        self.scheduler.schedule(Event::DrawFrame, FRAME_CYCLES);
    }

    /// Dispatch the timer tick event.
    pub fn timer_tick(&mut self, stamp: u64) {
        self.timers.timer_tick(stamp, &mut self.scheduler, &mut self.irq);
    }

    /// Dispatch the counter tick event.
    pub fn count_tick(&mut self, stamp: u64) {
        self.timers.count_tick(stamp, &mut self.scheduler);
    }

    /// Rebase every cycle stamp and re-arm the rebase event.
    pub fn reset_cycles(&mut self) {
        let amount = self.scheduler.rebase();
        self.timers.rebase(amount);
        self.scheduler.schedule(Event::ResetCycles, REBASE_INTERVAL);
    }
}

/// A bus wired to fresh frame/key handles, for tests.
impl Default for Bus {
    fn default() -> Self {
        Self::new(Arc::new(Mutex::new(VecDeque::new())), Arc::new(AtomicU16::new(0)))
    }
}
