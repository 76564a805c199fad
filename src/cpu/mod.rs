//! ARM9 (ARMv5TE) interpreter
//!
//! The DRC's CPU, executing both ARM and THUMB instruction streams. One call
//! to [`Cpu::run_opcode`] retires exactly one architectural instruction and
//! returns its cycle cost.
//!
//! # Module organization
//!
//! - `dispatch`: the 4096-entry ARM and 1024-entry THUMB handler tables and
//!   the 256-entry condition table, built once at startup
//! - `alu`: data processing, multiplies, saturated arithmetic
//! - `branch`: branches, exchanges, software interrupts
//! - `transfer`: loads/stores, block transfers, PSR access, CP15 stubs
//!
//! # Register file
//!
//! Sixteen logical registers are a view onto 31 physical words selected by
//! the CPU mode: a full user/system bank, seven FIQ words (R8-R14) and two
//! words each for SVC/ABT/IRQ/UND (R13-R14). The view is an index map rather
//! than pointers; map slots 16..31 permanently alias the user bank, which is
//! what the user-bank LDM/STM variants index through.
//!
//! R15 reads as "current instruction + 8" in ARM state and "+ 4" in THUMB
//! state, maintained by a two-slot prefetch pipeline that refills on every
//! non-sequential change to R15.

mod alu;
mod branch;
mod dispatch;
mod transfer;

#[cfg(test)]
mod tests;

use log::warn;

use crate::bus::Bus;

// Physical register file layout
const FIQ_BASE: usize = 16; // R8-R14
const SVC_BASE: usize = 23; // R13-R14
const ABT_BASE: usize = 25;
const IRQ_BASE: usize = 27;
const UND_BASE: usize = 29;
const PHYS_REGS: usize = 31;

// Saved status register slots
const SPSR_FIQ: usize = 0;
const SPSR_SVC: usize = 1;
const SPSR_ABT: usize = 2;
const SPSR_IRQ: usize = 3;
const SPSR_UND: usize = 4;

/// Exception-entry mode for each vector (indexed by vector >> 2).
const VECTOR_MODES: [u32; 8] = [0x13, 0x1B, 0x13, 0x17, 0x17, 0x13, 0x12, 0x11];

/// ARM9 CPU state.
pub struct Cpu {
    /// Physical register words: user bank R0-R15, then the banked copies
    phys: [u32; PHYS_REGS],
    /// Logical slot to physical index; slots 16..31 always view the user bank
    map: [usize; 32],
    /// Two prefetched instruction words (halfwords in THUMB state)
    pipeline: [u32; 2],
    /// Current program status register
    pub cpsr: u32,
    /// Saved status slot for the current mode, none in user/system
    spsr: Option<usize>,
    spsrs: [u32; 5],
}

impl Cpu {
    pub fn new() -> Self {
        let mut map = [0; 32];
        for (i, entry) in map.iter_mut().enumerate() {
            *entry = i & 0xF;
        }
        Self {
            phys: [0; PHYS_REGS],
            map,
            pipeline: [0; 2],
            cpsr: 0,
            spsr: None,
            spsrs: [0; 5],
        }
    }

    /// Reset into supervisor mode with interrupts off and refill the
    /// pipeline from address 0.
    pub fn reset(&mut self, bus: &mut Bus) {
        self.phys = [0; PHYS_REGS];
        for (i, entry) in self.map.iter_mut().enumerate() {
            *entry = i & 0xF;
        }
        self.pipeline = [0; 2];
        self.cpsr = 0;
        self.spsr = None;
        self.spsrs = [0; 5];

        self.set_cpsr(0xD3);
        self.flush_pipeline(bus);
    }

    // ========== Register access ==========

    /// Read a logical slot. Slots 0..16 follow the current mode; 16..31 are
    /// the permanent user-bank view used by the `^` block transfers.
    #[inline]
    pub(crate) fn slot(&self, slot: usize) -> u32 {
        self.phys[self.map[slot]]
    }

    #[inline]
    pub(crate) fn set_slot(&mut self, slot: usize, value: u32) {
        self.phys[self.map[slot]] = value;
    }

    /// Read register `r` (0..16) through the current mode's view.
    #[inline]
    pub fn reg(&self, r: u32) -> u32 {
        self.phys[self.map[(r & 0xF) as usize]]
    }

    #[inline]
    pub fn set_reg(&mut self, r: u32, value: u32) {
        self.phys[self.map[(r & 0xF) as usize]] = value;
    }

    /// The current mode's saved status register, if it has one.
    pub fn spsr(&self) -> Option<u32> {
        self.spsr.map(|i| self.spsrs[i])
    }

    pub(crate) fn set_spsr(&mut self, value: u32) {
        if let Some(i) = self.spsr {
            self.spsrs[i] = value;
        }
    }

    // ========== Mode switching ==========

    /// Point the banked slots (R8-R14) and SPSR at the storage for `mode`.
    pub(crate) fn swap_registers(&mut self, value: u32) {
        let mode = value & 0x1F;
        match mode {
            0x10 | 0x1F => {
                // User/System
                for r in 8..15 {
                    self.map[r] = r;
                }
                self.spsr = None;
            }
            0x11 => {
                // FIQ
                for r in 8..15 {
                    self.map[r] = FIQ_BASE + r - 8;
                }
                self.spsr = Some(SPSR_FIQ);
            }
            0x12 => {
                // IRQ
                self.map_common_bank(IRQ_BASE);
                self.spsr = Some(SPSR_IRQ);
            }
            0x13 => {
                // Supervisor
                self.map_common_bank(SVC_BASE);
                self.spsr = Some(SPSR_SVC);
            }
            0x17 => {
                // Abort
                self.map_common_bank(ABT_BASE);
                self.spsr = Some(SPSR_ABT);
            }
            0x1B => {
                // Undefined
                self.map_common_bank(UND_BASE);
                self.spsr = Some(SPSR_UND);
            }
            _ => warn!("Unknown ARM9 mode: 0x{mode:X}"),
        }
    }

    fn map_common_bank(&mut self, base: usize) {
        for r in 8..13 {
            self.map[r] = r;
        }
        self.map[13] = base;
        self.map[14] = base + 1;
    }

    /// Set the CPSR, swapping banks if the mode changed.
    pub fn set_cpsr(&mut self, value: u32) {
        if value & 0x1F != self.cpsr & 0x1F {
            self.swap_registers(value);
        }
        self.cpsr = value;
    }

    /// Set the CPSR and save the previous value into the new mode's SPSR,
    /// as exception entry does.
    fn set_cpsr_save(&mut self, value: u32) {
        if value & 0x1F != self.cpsr & 0x1F {
            self.swap_registers(value);
        }
        if let Some(i) = self.spsr {
            self.spsrs[i] = self.cpsr;
        }
        self.cpsr = value;
    }

    // ========== Pipeline ==========

    /// Refill the two-slot pipeline after a non-sequential change to R15,
    /// leaving R15 two fetches ahead of the next instruction.
    pub fn flush_pipeline(&mut self, bus: &mut Bus) {
        if self.cpsr & 0x20 != 0 {
            // THUMB
            let pc = (self.reg(15) & !0x1).wrapping_add(2);
            self.set_reg(15, pc);
            self.pipeline[0] = bus.read16(pc.wrapping_sub(2)) as u32;
            self.pipeline[1] = bus.read16(pc) as u32;
        } else {
            // ARM
            let pc = (self.reg(15) & !0x3).wrapping_add(4);
            self.set_reg(15, pc);
            self.pipeline[0] = bus.read32(pc.wrapping_sub(4));
            self.pipeline[1] = bus.read32(pc);
        }
    }

    // ========== Execution ==========

    /// Execute one instruction, returning its cycle cost.
    pub fn run_opcode(&mut self, bus: &mut Bus) -> u32 {
        // Push the next opcode through the pipeline
        let opcode = self.pipeline[0];
        self.pipeline[0] = self.pipeline[1];

        if self.cpsr & 0x20 != 0 {
            // Fill the pipeline, incrementing the program counter
            let pc = self.reg(15).wrapping_add(2);
            self.set_reg(15, pc);
            self.pipeline[1] = bus.read16(pc) as u32;

            let handler = dispatch::thumb_handler(((opcode >> 6) & 0x3FF) as usize);
            handler(self, bus, opcode as u16)
        } else {
            // Fill the pipeline, incrementing the program counter
            let pc = self.reg(15).wrapping_add(4);
            self.set_reg(15, pc);
            self.pipeline[1] = bus.read32(pc);

            // Execute based on the opcode's condition
            let index = (((opcode >> 24) & 0xF0) | (self.cpsr >> 28)) as usize;
            match dispatch::condition(index) {
                dispatch::Cond::False => 1,
                dispatch::Cond::Escape => {
                    if opcode & 0xE00_0000 == 0xA00_0000 {
                        branch::blx_imm(self, bus, opcode)
                    } else {
                        1
                    }
                }
                dispatch::Cond::True => {
                    let index = (((opcode >> 16) & 0xFF0) | ((opcode >> 4) & 0xF)) as usize;
                    dispatch::arm_handler(index)(self, bus, opcode)
                }
            }
        }
    }

    /// Enter an exception vector: switch mode, save the return state, jump.
    pub fn exception(&mut self, vector: u8, bus: &mut Bus) -> u32 {
        let mode = VECTOR_MODES[(vector >> 2) as usize];
        self.set_cpsr_save((self.cpsr & !0x3F) | 0x80 | mode);

        // LR points past the faulting instruction; THUMB entry adds 2
        let spsr = self.spsr().unwrap_or(0);
        self.set_reg(14, self.reg(15).wrapping_add((spsr & 0x20) >> 4));
        self.set_reg(15, vector as u32);
        self.flush_pipeline(bus);
        3
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
