//! Wii U GamePad (DRC) emulator core
//!
//! Emulates the ARM9 microcontroller inside the GamePad accessory far enough
//! for its firmware to boot, draw frames and poll inputs. The crate is
//! host-agnostic: it produces 854x480 ABGR framebuffers through a bounded
//! queue and takes key state through a shared bitmap, and leaves windowing
//! and drawing to the embedder.
//!
//! # Architecture
//!
//! - `cpu`: ARMv5TE interpreter (ARM + THUMB), banked registers, exceptions
//! - `bus`: address decoding, RAM and the MMIO register file
//! - `scheduler`: cycle-keyed event queue driving timers and display
//! - `peripherals`: interrupt controller, timers, display, SPI FLASH/UIC,
//!   DMA, I2C and the SDIO Wi-Fi module
//! - `firmware`: `flash.bin` / `drc_fw.bin` image loading
//! - `emu`: the `System` run loop and the threaded `Core` host handle
//!
//! # Memory map (32-bit address space)
//!
//! | Address range           | Region                     |
//! |-------------------------|----------------------------|
//! | 0x00000000 - 0x3FFFFFFF | RAM (4MB, mirrored)        |
//! | 0xF0000000 - 0xFFFFFFFF | Memory-mapped I/O          |
//! | everything else         | Unmapped                   |
//!
//! # Booting
//!
//! ```no_run
//! use std::path::Path;
//! use drc_core::{Core, Firmware};
//!
//! let firmware = Firmware::load(Path::new(".")).unwrap();
//! let mut core = match firmware {
//!     Some(fw) => Core::with_firmware(fw),
//!     None => Core::new(),
//! };
//! core.start();
//! while let Some(frame) = core.get_buffer() {
//!     // hand the 854x480 ABGR buffer to the window
//!     drop(frame);
//! }
//! core.stop();
//! ```

pub mod bus;
pub mod cpu;
mod emu;
pub mod firmware;
pub mod peripherals;
pub mod scheduler;

pub use emu::{Core, System};
pub use firmware::{Firmware, FirmwareError};
pub use peripherals::display::{SCREEN_HEIGHT, SCREEN_WIDTH};
