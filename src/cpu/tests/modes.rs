//! Banked-register mode switching, CPSR/SPSR handling and exception entry.

use super::*;

#[test]
fn test_banked_sp_per_mode() {
    let (mut cpu, _bus) = setup();

    // Reset leaves the CPU in supervisor mode
    cpu.set_reg(13, 0x1000);
    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x12); // IRQ
    cpu.set_reg(13, 0x2000);
    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x1F); // System
    cpu.set_reg(13, 0x3000);

    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x13);
    assert_eq!(cpu.reg(13), 0x1000);
    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x12);
    assert_eq!(cpu.reg(13), 0x2000);
    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x10);
    assert_eq!(cpu.reg(13), 0x3000);
}

#[test]
fn test_swap_round_trip_identity() {
    let (mut cpu, _bus) = setup();

    // Populate every visible register in system mode
    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x1F);
    for r in 0..15 {
        cpu.set_reg(r, 0x100 + r);
    }

    // Any round trip through another mode preserves the visible values
    for mode in [0x11u32, 0x12, 0x13, 0x17, 0x1B] {
        cpu.set_cpsr((cpu.cpsr & !0x1F) | mode);
        cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x1F);
        for r in 0..15 {
            assert_eq!(cpu.reg(r), 0x100 + r, "mode 0x{mode:02X}, R{r}");
        }
    }
}

#[test]
fn test_fiq_banks_r8_to_r14() {
    let (mut cpu, _bus) = setup();
    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x1F);
    for r in 8..15 {
        cpu.set_reg(r, r);
    }

    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x11);
    for r in 8..15 {
        cpu.set_reg(r, 0xF00 + r);
    }

    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x1F);
    for r in 8..15 {
        assert_eq!(cpu.reg(r), r);
    }
}

#[test]
fn test_spsr_only_in_privileged_modes() {
    let (mut cpu, _bus) = setup();
    assert!(cpu.spsr().is_some()); // supervisor after reset

    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x10);
    assert!(cpu.spsr().is_none());
    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x1F);
    assert!(cpu.spsr().is_none());
}

#[test]
fn test_mrs_reads_cpsr() {
    let (mut cpu, mut bus) = setup();
    // MRS R0, CPSR
    exec_arm(&mut cpu, &mut bus, 0xE10F0000);
    assert_eq!(cpu.reg(0), cpu.cpsr);
}

#[test]
fn test_msr_user_mode_cannot_escape() {
    let (mut cpu, mut bus) = setup();
    cpu.set_cpsr((cpu.cpsr & !0xFF) | 0x10);

    // MSR CPSR_c, R0 attempting to enter supervisor mode
    cpu.set_reg(0, 0x13);
    exec_arm(&mut cpu, &mut bus, 0xE121F000);
    assert_eq!(cpu.cpsr & 0x1F, 0x10);
}

#[test]
fn test_msr_privileged_switches_mode() {
    let (mut cpu, mut bus) = setup();
    // MSR CPSR_c, R0 from supervisor into IRQ mode
    cpu.set_reg(0, 0xD2);
    exec_arm(&mut cpu, &mut bus, 0xE121F000);
    assert_eq!(cpu.cpsr & 0x1F, 0x12);
    // Banked registers followed the switch
    cpu.set_reg(13, 0xABC);
    cpu.set_reg(0, 0xD3);
    exec_arm(&mut cpu, &mut bus, 0xE121F000);
    assert_ne!(cpu.reg(13), 0xABC);
}

#[test]
fn test_msr_flag_field_only() {
    let (mut cpu, mut bus) = setup();
    let mode_before = cpu.cpsr & 0x1F;
    // MSR CPSR_f, R0: only the flag byte changes
    cpu.set_reg(0, 0xF000_001F);
    exec_arm(&mut cpu, &mut bus, 0xE128F000);
    assert_eq!(cpu.cpsr & 0xF000_0000, 0xF000_0000);
    assert_eq!(cpu.cpsr & 0x1F, mode_before);
}

#[test]
fn test_msr_spsr_round_trip() {
    let (mut cpu, mut bus) = setup();
    // MSR SPSR_fc, R0 then MRS R1, SPSR in supervisor mode
    cpu.set_reg(0, 0x4000_0010);
    exec_arm(&mut cpu, &mut bus, 0xE169F000);
    exec_arm(&mut cpu, &mut bus, 0xE14F1000);
    assert_eq!(cpu.reg(1), 0x4000_0010);
}

#[test]
fn test_swi_entry() {
    let (mut cpu, mut bus) = setup();
    // Drop to user mode with clean flags, then SWI #0
    cpu.set_cpsr(0x10);
    load_arm(&mut cpu, &mut bus, &[0xEF000000]);
    let cost = cpu.run_opcode(&mut bus);

    assert_eq!(cost, 3);
    assert_eq!(cpu.cpsr & 0x1F, 0x13); // supervisor
    assert_eq!(cpu.cpsr & 0x80, 0x80); // IRQs off
    assert_eq!(cpu.cpsr & 0x20, 0); // ARM state
    assert_eq!(cpu.spsr(), Some(0x10));
    // Execution resumes at the SWI vector
    assert_eq!(cpu.reg(15), 0x08 + 4);
    // LR points at the instruction after the SWI
    assert_eq!(cpu.reg(14), CODE_BASE + 4);
}

#[test]
fn test_irq_entry() {
    let (mut cpu, mut bus) = setup();
    cpu.set_cpsr(0x10);
    load_arm(&mut cpu, &mut bus, &[0xE3A00001]);

    let cost = cpu.exception(0x18, &mut bus);
    assert_eq!(cost, 3);
    assert_eq!(cpu.cpsr & 0x1F, 0x12);
    assert_eq!(cpu.cpsr & 0x80, 0x80);
    assert_eq!(cpu.spsr(), Some(0x10));
    assert_eq!(cpu.reg(15), 0x18 + 4);
}

#[test]
fn test_exception_from_thumb_adjusts_lr() {
    let (mut cpu, mut bus) = setup();
    cpu.set_cpsr(0x30); // user mode, THUMB
    cpu.set_reg(15, 0x200);
    cpu.flush_pipeline(&mut bus);

    let pc = cpu.reg(15);
    cpu.exception(0x18, &mut bus);
    // THUMB entry biases LR by 2 and returns to ARM state
    assert_eq!(cpu.reg(14), pc.wrapping_add(2));
    assert_eq!(cpu.cpsr & 0x20, 0);
}

#[test]
fn test_subs_pc_restores_spsr() {
    let (mut cpu, mut bus) = setup();
    // Enter supervisor with a user-mode SPSR, then SUBS PC, LR, #4
    cpu.set_cpsr(0x10);
    cpu.exception(0x18, &mut bus);
    cpu.set_spsr(0x10);
    cpu.set_reg(14, 0x204);

    // SUBS R15, R14, #4
    exec_arm(&mut cpu, &mut bus, 0xE25EF004);
    assert_eq!(cpu.cpsr & 0x1F, 0x10);
    assert_eq!(cpu.reg(15), 0x200 + 4);
}

#[test]
fn test_cpsr_write_read_round_trip() {
    let (mut cpu, _bus) = setup();
    for value in [0xD3u32, 0x600000D2, 0x9000001F, 0x10] {
        cpu.set_cpsr(value);
        assert_eq!(cpu.cpsr, value);
    }
}

#[test]
fn test_ldm_user_bank_stores_user_registers() {
    let (mut cpu, mut bus) = setup();

    // Fill the user bank from system mode, then store from IRQ mode
    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x1F);
    cpu.set_reg(13, 0x1111);
    cpu.set_reg(14, 0x2222);
    cpu.set_cpsr((cpu.cpsr & !0x1F) | 0x12);
    cpu.set_reg(13, 0x9999);
    cpu.set_reg(14, 0x8888);
    cpu.set_reg(0, 0x400);

    // STMIA R0, {R13,R14}^
    exec_arm(&mut cpu, &mut bus, 0xE8C06000);
    assert_eq!(bus.read32(0x400), 0x1111);
    assert_eq!(bus.read32(0x404), 0x2222);
}

#[test]
fn test_ldm_pc_user_restores_cpsr() {
    let (mut cpu, mut bus) = setup();
    // Supervisor with SPSR describing user mode
    cpu.set_spsr(0x10);
    cpu.set_reg(0, 0x400);
    bus.write32(0x400, 0x300);

    // LDMIA R0, {R15}^
    exec_arm(&mut cpu, &mut bus, 0xE8D08000);
    assert_eq!(cpu.cpsr & 0x1F, 0x10);
    assert_eq!(cpu.reg(15), 0x300 + 4);
}
