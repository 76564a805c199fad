//! CPU test harness
//!
//! Tests hand-assemble opcodes into RAM, point the pipeline at them and step
//! the interpreter, asserting on registers, flags and cycle costs through
//! the public interface only.

mod instructions;
mod modes;
mod transfer;

use super::Cpu;
use crate::bus::Bus;

/// Base address test programs are assembled at.
pub(super) const CODE_BASE: u32 = 0x100;

pub(super) fn setup() -> (Cpu, Bus) {
    let mut bus = Bus::default();
    let mut cpu = Cpu::new();
    cpu.reset(&mut bus);
    (cpu, bus)
}

/// Write ARM opcodes at [`CODE_BASE`] and refill the pipeline there.
pub(super) fn load_arm(cpu: &mut Cpu, bus: &mut Bus, opcodes: &[u32]) {
    for (i, &op) in opcodes.iter().enumerate() {
        bus.write32(CODE_BASE + (i as u32) * 4, op);
    }
    cpu.set_reg(15, CODE_BASE);
    cpu.flush_pipeline(bus);
}

/// Write THUMB opcodes at [`CODE_BASE`] and refill the pipeline there.
pub(super) fn load_thumb(cpu: &mut Cpu, bus: &mut Bus, opcodes: &[u16]) {
    for (i, &op) in opcodes.iter().enumerate() {
        bus.write16(CODE_BASE + (i as u32) * 2, op);
    }
    cpu.set_cpsr(cpu.cpsr | 0x20);
    cpu.set_reg(15, CODE_BASE);
    cpu.flush_pipeline(bus);
}

/// Execute one ARM opcode in isolation.
pub(super) fn exec_arm(cpu: &mut Cpu, bus: &mut Bus, opcode: u32) -> u32 {
    load_arm(cpu, bus, &[opcode]);
    cpu.run_opcode(bus)
}

#[cfg(test)]
mod pipeline {
    use super::*;

    #[test]
    fn test_flush_alignment_arm() {
        let (mut cpu, mut bus) = setup();
        cpu.set_reg(15, 0x203);
        cpu.flush_pipeline(&mut bus);
        assert_eq!(cpu.reg(15) % 4, 0);
        // R15 sits two fetches ahead of the next instruction
        assert_eq!(cpu.reg(15), 0x204);
    }

    #[test]
    fn test_flush_alignment_thumb() {
        let (mut cpu, mut bus) = setup();
        cpu.set_cpsr(cpu.cpsr | 0x20);
        cpu.set_reg(15, 0x201);
        cpu.flush_pipeline(&mut bus);
        assert_eq!(cpu.reg(15) % 2, 0);
        assert_eq!(cpu.reg(15), 0x202);
    }

    #[test]
    fn test_pc_reads_plus_8_in_arm() {
        let (mut cpu, mut bus) = setup();
        // MOV R0, R15
        load_arm(&mut cpu, &mut bus, &[0xE1A0000F]);
        cpu.run_opcode(&mut bus);
        assert_eq!(cpu.reg(0), CODE_BASE + 8);
    }

    #[test]
    fn test_reset_state() {
        let (cpu, _bus) = setup();
        // Supervisor mode, IRQ and FIQ masked
        assert_eq!(cpu.cpsr, 0xD3);
        assert_eq!(cpu.reg(0), 0);
        assert_eq!(cpu.reg(15), 4);
    }
}
