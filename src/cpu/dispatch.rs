//! Instruction dispatch tables
//!
//! ARM opcodes dispatch through a 4096-entry table indexed by bits [27:20]
//! and [7:4]; THUMB opcodes through a 1024-entry table indexed by bits
//! [15:6]. Conditions evaluate through a 256-entry table indexed by the
//! condition nibble and the NZCV flags. All three tables are decoded once at
//! startup from the index bits alone.

use std::sync::OnceLock;

use log::warn;

use super::{alu, branch, transfer, Cpu};
use crate::bus::Bus;

pub(super) type ArmHandler = fn(&mut Cpu, &mut Bus, u32) -> u32;
pub(super) type ThumbHandler = fn(&mut Cpu, &mut Bus, u16) -> u32;

/// Outcome of a condition-table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Cond {
    False,
    True,
    /// The 0b1111 escape encoding (BLX immediate)
    Escape,
}

pub(super) fn unk_arm(_cpu: &mut Cpu, _bus: &mut Bus, opcode: u32) -> u32 {
    warn!("Unknown ARM opcode: 0x{opcode:08X}");
    1
}

pub(super) fn unk_thumb(_cpu: &mut Cpu, _bus: &mut Bus, opcode: u16) -> u32 {
    warn!("Unknown THUMB opcode: 0x{opcode:04X}");
    1
}

/// Look up the handler for ARM table index `[27:20]||[7:4]`.
pub(super) fn arm_handler(index: usize) -> ArmHandler {
    static TABLE: OnceLock<Vec<ArmHandler>> = OnceLock::new();
    TABLE.get_or_init(|| (0..0x1000).map(decode_arm).collect())[index]
}

/// Look up the handler for THUMB table index `[15:6]`.
pub(super) fn thumb_handler(index: usize) -> ThumbHandler {
    static TABLE: OnceLock<Vec<ThumbHandler>> = OnceLock::new();
    TABLE.get_or_init(|| (0..0x400).map(decode_thumb).collect())[index]
}

/// Look up a condition outcome for index `cond||NZCV`.
pub(super) fn condition(index: usize) -> Cond {
    static TABLE: OnceLock<Vec<Cond>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..0x100)
            .map(|i| {
                let cond = (i >> 4) as u32;
                let flags = (i & 0xF) as u32;
                if cond == 0xF {
                    Cond::Escape
                } else if eval_condition(cond, flags) {
                    Cond::True
                } else {
                    Cond::False
                }
            })
            .collect()
    })[index]
}

fn eval_condition(cond: u32, flags: u32) -> bool {
    let n = flags & 0x8 != 0;
    let z = flags & 0x4 != 0;
    let c = flags & 0x2 != 0;
    let v = flags & 0x1 != 0;
    match cond {
        0x0 => z,
        0x1 => !z,
        0x2 => c,
        0x3 => !c,
        0x4 => n,
        0x5 => !n,
        0x6 => v,
        0x7 => !v,
        0x8 => c && !z,
        0x9 => !c || z,
        0xA => n == v,
        0xB => n != v,
        0xC => !z && n == v,
        0xD => z || n != v,
        _ => true,
    }
}

// ========== ARM decode ==========

fn decode_arm(index: usize) -> ArmHandler {
    match (index >> 9) & 0x7 {
        0b000 => decode_arm_misc(index),
        0b001 => decode_arm_dp_imm(index),
        0b010 => decode_arm_transfer_imm(index),
        0b011 => {
            if index & 1 == 0 {
                decode_arm_transfer_reg(index)
            } else {
                unk_arm
            }
        }
        0b100 => decode_arm_block(index),
        0b101 => {
            if index & 0x100 != 0 {
                branch::bl
            } else {
                branch::b
            }
        }
        0b110 => unk_arm, // coprocessor data transfers
        _ => {
            if index & 0x100 != 0 {
                branch::swi
            } else if index & 1 != 0 {
                if index & 0x10 != 0 {
                    transfer::mrc
                } else {
                    transfer::mcr
                }
            } else {
                unk_arm // CDP
            }
        }
    }
}

/// Bits [27:25] = 000: data processing with register operand, multiplies,
/// halfword transfers, swaps, and the PSR/branch-exchange/saturation zone.
fn decode_arm_misc(index: usize) -> ArmHandler {
    let op20 = (index >> 4) & 0x1F; // opcode bits [24:20]
    let low = index & 0xF; // opcode bits [7:4]

    if low == 0x9 {
        return match op20 {
            0x00 => alu::mul,
            0x01 => alu::muls,
            0x02 => alu::mla,
            0x03 => alu::mlas,
            0x08 => alu::umull,
            0x09 => alu::umulls,
            0x0A => alu::umlal,
            0x0B => alu::umlals,
            0x0C => alu::smull,
            0x0D => alu::smulls,
            0x0E => alu::smlal,
            0x0F => alu::smlals,
            0x10 => transfer::swp,
            0x14 => transfer::swpb,
            _ => unk_arm,
        };
    }

    if low & 0x9 == 0x9 {
        return decode_arm_half(index);
    }

    if op20 & 0x19 == 0x10 {
        return decode_arm_psr(index);
    }

    decode_arm_dp_reg(index)
}

/// The S=0 comparison zone: PSR access, BX/BLX, CLZ, saturated arithmetic
/// and the halfword multiplies.
fn decode_arm_psr(index: usize) -> ArmHandler {
    let op20 = (index >> 4) & 0x1F;
    match index & 0xF {
        0x0 => match op20 {
            0x10 => transfer::mrs_rc,
            0x12 => transfer::msr_rc,
            0x14 => transfer::mrs_rs,
            0x16 => transfer::msr_rs,
            _ => unk_arm,
        },
        0x1 => match op20 {
            0x12 => branch::bx,
            0x16 => alu::clz,
            _ => unk_arm,
        },
        0x3 => match op20 {
            0x12 => branch::blx_reg,
            _ => unk_arm,
        },
        0x5 => match op20 {
            0x10 => alu::qadd,
            0x12 => alu::qsub,
            0x14 => alu::qdadd,
            0x16 => alu::qdsub,
            _ => unk_arm,
        },
        0x8 => match op20 {
            0x10 => alu::smlabb,
            0x12 => alu::smlawb,
            0x14 => alu::smlalbb,
            0x16 => alu::smulbb,
            _ => unk_arm,
        },
        0xA => match op20 {
            0x10 => alu::smlatb,
            0x12 => alu::smulwb,
            0x14 => alu::smlaltb,
            0x16 => alu::smultb,
            _ => unk_arm,
        },
        0xC => match op20 {
            0x10 => alu::smlabt,
            0x12 => alu::smlawt,
            0x14 => alu::smlalbt,
            0x16 => alu::smulbt,
            _ => unk_arm,
        },
        0xE => match op20 {
            0x10 => alu::smlatt,
            0x12 => alu::smulwt,
            0x14 => alu::smlaltt,
            0x16 => alu::smultt,
            _ => unk_arm,
        },
        _ => unk_arm,
    }
}

/// Data processing, register operand. Forms in column order:
/// LSL #i, LSL Rs, LSR #i, LSR Rs, ASR #i, ASR Rs, ROR #i, ROR Rs.
fn decode_arm_dp_reg(index: usize) -> ArmHandler {
    const AND: [ArmHandler; 8] = [alu::and_lli, alu::and_llr, alu::and_lri, alu::and_lrr, alu::and_ari, alu::and_arr, alu::and_rri, alu::and_rrr];
    const ANDS: [ArmHandler; 8] = [alu::ands_lli, alu::ands_llr, alu::ands_lri, alu::ands_lrr, alu::ands_ari, alu::ands_arr, alu::ands_rri, alu::ands_rrr];
    const EOR: [ArmHandler; 8] = [alu::eor_lli, alu::eor_llr, alu::eor_lri, alu::eor_lrr, alu::eor_ari, alu::eor_arr, alu::eor_rri, alu::eor_rrr];
    const EORS: [ArmHandler; 8] = [alu::eors_lli, alu::eors_llr, alu::eors_lri, alu::eors_lrr, alu::eors_ari, alu::eors_arr, alu::eors_rri, alu::eors_rrr];
    const SUB: [ArmHandler; 8] = [alu::sub_lli, alu::sub_llr, alu::sub_lri, alu::sub_lrr, alu::sub_ari, alu::sub_arr, alu::sub_rri, alu::sub_rrr];
    const SUBS: [ArmHandler; 8] = [alu::subs_lli, alu::subs_llr, alu::subs_lri, alu::subs_lrr, alu::subs_ari, alu::subs_arr, alu::subs_rri, alu::subs_rrr];
    const RSB: [ArmHandler; 8] = [alu::rsb_lli, alu::rsb_llr, alu::rsb_lri, alu::rsb_lrr, alu::rsb_ari, alu::rsb_arr, alu::rsb_rri, alu::rsb_rrr];
    const RSBS: [ArmHandler; 8] = [alu::rsbs_lli, alu::rsbs_llr, alu::rsbs_lri, alu::rsbs_lrr, alu::rsbs_ari, alu::rsbs_arr, alu::rsbs_rri, alu::rsbs_rrr];
    const ADD: [ArmHandler; 8] = [alu::add_lli, alu::add_llr, alu::add_lri, alu::add_lrr, alu::add_ari, alu::add_arr, alu::add_rri, alu::add_rrr];
    const ADDS: [ArmHandler; 8] = [alu::adds_lli, alu::adds_llr, alu::adds_lri, alu::adds_lrr, alu::adds_ari, alu::adds_arr, alu::adds_rri, alu::adds_rrr];
    const ADC: [ArmHandler; 8] = [alu::adc_lli, alu::adc_llr, alu::adc_lri, alu::adc_lrr, alu::adc_ari, alu::adc_arr, alu::adc_rri, alu::adc_rrr];
    const ADCS: [ArmHandler; 8] = [alu::adcs_lli, alu::adcs_llr, alu::adcs_lri, alu::adcs_lrr, alu::adcs_ari, alu::adcs_arr, alu::adcs_rri, alu::adcs_rrr];
    const SBC: [ArmHandler; 8] = [alu::sbc_lli, alu::sbc_llr, alu::sbc_lri, alu::sbc_lrr, alu::sbc_ari, alu::sbc_arr, alu::sbc_rri, alu::sbc_rrr];
    const SBCS: [ArmHandler; 8] = [alu::sbcs_lli, alu::sbcs_llr, alu::sbcs_lri, alu::sbcs_lrr, alu::sbcs_ari, alu::sbcs_arr, alu::sbcs_rri, alu::sbcs_rrr];
    const RSC: [ArmHandler; 8] = [alu::rsc_lli, alu::rsc_llr, alu::rsc_lri, alu::rsc_lrr, alu::rsc_ari, alu::rsc_arr, alu::rsc_rri, alu::rsc_rrr];
    const RSCS: [ArmHandler; 8] = [alu::rscs_lli, alu::rscs_llr, alu::rscs_lri, alu::rscs_lrr, alu::rscs_ari, alu::rscs_arr, alu::rscs_rri, alu::rscs_rrr];
    const TST: [ArmHandler; 8] = [alu::tst_lli, alu::tst_llr, alu::tst_lri, alu::tst_lrr, alu::tst_ari, alu::tst_arr, alu::tst_rri, alu::tst_rrr];
    const TEQ: [ArmHandler; 8] = [alu::teq_lli, alu::teq_llr, alu::teq_lri, alu::teq_lrr, alu::teq_ari, alu::teq_arr, alu::teq_rri, alu::teq_rrr];
    const CMP: [ArmHandler; 8] = [alu::cmp_lli, alu::cmp_llr, alu::cmp_lri, alu::cmp_lrr, alu::cmp_ari, alu::cmp_arr, alu::cmp_rri, alu::cmp_rrr];
    const CMN: [ArmHandler; 8] = [alu::cmn_lli, alu::cmn_llr, alu::cmn_lri, alu::cmn_lrr, alu::cmn_ari, alu::cmn_arr, alu::cmn_rri, alu::cmn_rrr];
    const ORR: [ArmHandler; 8] = [alu::orr_lli, alu::orr_llr, alu::orr_lri, alu::orr_lrr, alu::orr_ari, alu::orr_arr, alu::orr_rri, alu::orr_rrr];
    const ORRS: [ArmHandler; 8] = [alu::orrs_lli, alu::orrs_llr, alu::orrs_lri, alu::orrs_lrr, alu::orrs_ari, alu::orrs_arr, alu::orrs_rri, alu::orrs_rrr];
    const MOV: [ArmHandler; 8] = [alu::mov_lli, alu::mov_llr, alu::mov_lri, alu::mov_lrr, alu::mov_ari, alu::mov_arr, alu::mov_rri, alu::mov_rrr];
    const MOVS: [ArmHandler; 8] = [alu::movs_lli, alu::movs_llr, alu::movs_lri, alu::movs_lrr, alu::movs_ari, alu::movs_arr, alu::movs_rri, alu::movs_rrr];
    const BIC: [ArmHandler; 8] = [alu::bic_lli, alu::bic_llr, alu::bic_lri, alu::bic_lrr, alu::bic_ari, alu::bic_arr, alu::bic_rri, alu::bic_rrr];
    const BICS: [ArmHandler; 8] = [alu::bics_lli, alu::bics_llr, alu::bics_lri, alu::bics_lrr, alu::bics_ari, alu::bics_arr, alu::bics_rri, alu::bics_rrr];
    const MVN: [ArmHandler; 8] = [alu::mvn_lli, alu::mvn_llr, alu::mvn_lri, alu::mvn_lrr, alu::mvn_ari, alu::mvn_arr, alu::mvn_rri, alu::mvn_rrr];
    const MVNS: [ArmHandler; 8] = [alu::mvns_lli, alu::mvns_llr, alu::mvns_lri, alu::mvns_lrr, alu::mvns_ari, alu::mvns_arr, alu::mvns_rri, alu::mvns_rrr];

    let op = (index >> 5) & 0xF;
    let s = index & 0x10 != 0;
    let low = index & 0xF;
    let form = ((low >> 1) & 0x3) * 2 + (low & 0x1);

    let table: &[ArmHandler; 8] = match (op, s) {
        (0x0, false) => &AND,
        (0x0, true) => &ANDS,
        (0x1, false) => &EOR,
        (0x1, true) => &EORS,
        (0x2, false) => &SUB,
        (0x2, true) => &SUBS,
        (0x3, false) => &RSB,
        (0x3, true) => &RSBS,
        (0x4, false) => &ADD,
        (0x4, true) => &ADDS,
        (0x5, false) => &ADC,
        (0x5, true) => &ADCS,
        (0x6, false) => &SBC,
        (0x6, true) => &SBCS,
        (0x7, false) => &RSC,
        (0x7, true) => &RSCS,
        (0x8, _) => &TST,
        (0x9, _) => &TEQ,
        (0xA, _) => &CMP,
        (0xB, _) => &CMN,
        (0xC, false) => &ORR,
        (0xC, true) => &ORRS,
        (0xD, false) => &MOV,
        (0xD, true) => &MOVS,
        (0xE, false) => &BIC,
        (0xE, true) => &BICS,
        (0xF, false) => &MVN,
        _ => &MVNS,
    };
    table[form]
}

/// Data processing, rotated-immediate operand (bits [27:25] = 001).
fn decode_arm_dp_imm(index: usize) -> ArmHandler {
    let op = (index >> 5) & 0xF;
    let s = index & 0x10 != 0;

    if !s && (0x8..=0xB).contains(&op) {
        // Comparison encodings without S are MSR immediate
        return match op {
            0x9 => transfer::msr_ic,
            0xB => transfer::msr_is,
            _ => unk_arm,
        };
    }

    match (op, s) {
        (0x0, false) => alu::and_imm,
        (0x0, true) => alu::ands_imm,
        (0x1, false) => alu::eor_imm,
        (0x1, true) => alu::eors_imm,
        (0x2, false) => alu::sub_imm,
        (0x2, true) => alu::subs_imm,
        (0x3, false) => alu::rsb_imm,
        (0x3, true) => alu::rsbs_imm,
        (0x4, false) => alu::add_imm,
        (0x4, true) => alu::adds_imm,
        (0x5, false) => alu::adc_imm,
        (0x5, true) => alu::adcs_imm,
        (0x6, false) => alu::sbc_imm,
        (0x6, true) => alu::sbcs_imm,
        (0x7, false) => alu::rsc_imm,
        (0x7, true) => alu::rscs_imm,
        (0x8, _) => alu::tst_imm,
        (0x9, _) => alu::teq_imm,
        (0xA, _) => alu::cmp_imm,
        (0xB, _) => alu::cmn_imm,
        (0xC, false) => alu::orr_imm,
        (0xC, true) => alu::orrs_imm,
        (0xD, false) => alu::mov_imm,
        (0xD, true) => alu::movs_imm,
        (0xE, false) => alu::bic_imm,
        (0xE, true) => alu::bics_imm,
        (0xF, false) => alu::mvn_imm,
        _ => alu::mvns_imm,
    }
}

/// Addressing mode row for the load/store variants: offset (pre, no
/// writeback), pre with writeback, or post.
fn addr_mode(index: usize) -> usize {
    if index & 0x100 == 0 {
        2 // post-adjust
    } else if index & 0x20 != 0 {
        1 // pre-adjust with writeback
    } else {
        0 // pre-adjust without writeback
    }
}

/// Halfword, signed and doubleword transfers (bits [7:4] = 1011/1101/1111).
/// Columns: -Rm, -#i, +Rm, +#i.
fn decode_arm_half(index: usize) -> ArmHandler {
    const LDRH: [[ArmHandler; 4]; 3] = [
        [transfer::ldrh_ofrm, transfer::ldrh_ofim, transfer::ldrh_ofrp, transfer::ldrh_ofip],
        [transfer::ldrh_prrm, transfer::ldrh_prim, transfer::ldrh_prrp, transfer::ldrh_prip],
        [transfer::ldrh_ptrm, transfer::ldrh_ptim, transfer::ldrh_ptrp, transfer::ldrh_ptip],
    ];
    const STRH: [[ArmHandler; 4]; 3] = [
        [transfer::strh_ofrm, transfer::strh_ofim, transfer::strh_ofrp, transfer::strh_ofip],
        [transfer::strh_prrm, transfer::strh_prim, transfer::strh_prrp, transfer::strh_prip],
        [transfer::strh_ptrm, transfer::strh_ptim, transfer::strh_ptrp, transfer::strh_ptip],
    ];
    const LDRSB: [[ArmHandler; 4]; 3] = [
        [transfer::ldrsb_ofrm, transfer::ldrsb_ofim, transfer::ldrsb_ofrp, transfer::ldrsb_ofip],
        [transfer::ldrsb_prrm, transfer::ldrsb_prim, transfer::ldrsb_prrp, transfer::ldrsb_prip],
        [transfer::ldrsb_ptrm, transfer::ldrsb_ptim, transfer::ldrsb_ptrp, transfer::ldrsb_ptip],
    ];
    const LDRSH: [[ArmHandler; 4]; 3] = [
        [transfer::ldrsh_ofrm, transfer::ldrsh_ofim, transfer::ldrsh_ofrp, transfer::ldrsh_ofip],
        [transfer::ldrsh_prrm, transfer::ldrsh_prim, transfer::ldrsh_prrp, transfer::ldrsh_prip],
        [transfer::ldrsh_ptrm, transfer::ldrsh_ptim, transfer::ldrsh_ptrp, transfer::ldrsh_ptip],
    ];
    const LDRD: [[ArmHandler; 4]; 3] = [
        [transfer::ldrd_ofrm, transfer::ldrd_ofim, transfer::ldrd_ofrp, transfer::ldrd_ofip],
        [transfer::ldrd_prrm, transfer::ldrd_prim, transfer::ldrd_prrp, transfer::ldrd_prip],
        [transfer::ldrd_ptrm, transfer::ldrd_ptim, transfer::ldrd_ptrp, transfer::ldrd_ptip],
    ];
    const STRD: [[ArmHandler; 4]; 3] = [
        [transfer::strd_ofrm, transfer::strd_ofim, transfer::strd_ofrp, transfer::strd_ofip],
        [transfer::strd_prrm, transfer::strd_prim, transfer::strd_prrp, transfer::strd_prip],
        [transfer::strd_ptrm, transfer::strd_ptim, transfer::strd_ptrp, transfer::strd_ptip],
    ];

    let load = index & 0x10 != 0;
    let row = addr_mode(index);
    let col = (((index >> 7) & 0x1) << 1) | ((index >> 6) & 0x1); // +/- and #i/Rm

    let table: &[[ArmHandler; 4]; 3] = match (index & 0xF, load) {
        (0xB, true) => &LDRH,
        (0xB, false) => &STRH,
        (0xD, true) => &LDRSB,
        (0xD, false) => &LDRD,
        (0xF, true) => &LDRSH,
        (0xF, false) => &STRD,
        _ => return unk_arm,
    };
    table[row][col]
}

/// Byte/word transfers with immediate offset (bits [27:25] = 010).
fn decode_arm_transfer_imm(index: usize) -> ArmHandler {
    const LDR: [[ArmHandler; 2]; 3] = [
        [transfer::ldr_ofim, transfer::ldr_ofip],
        [transfer::ldr_prim, transfer::ldr_prip],
        [transfer::ldr_ptim, transfer::ldr_ptip],
    ];
    const STR: [[ArmHandler; 2]; 3] = [
        [transfer::str_ofim, transfer::str_ofip],
        [transfer::str_prim, transfer::str_prip],
        [transfer::str_ptim, transfer::str_ptip],
    ];
    const LDRB: [[ArmHandler; 2]; 3] = [
        [transfer::ldrb_ofim, transfer::ldrb_ofip],
        [transfer::ldrb_prim, transfer::ldrb_prip],
        [transfer::ldrb_ptim, transfer::ldrb_ptip],
    ];
    const STRB: [[ArmHandler; 2]; 3] = [
        [transfer::strb_ofim, transfer::strb_ofip],
        [transfer::strb_prim, transfer::strb_prip],
        [transfer::strb_ptim, transfer::strb_ptip],
    ];

    let load = index & 0x10 != 0;
    let byte = index & 0x40 != 0;
    let row = addr_mode(index);
    let col = (index >> 7) & 0x1; // sign

    match (load, byte) {
        (true, false) => LDR[row][col],
        (true, true) => LDRB[row][col],
        (false, false) => STR[row][col],
        (false, true) => STRB[row][col],
    }
}

/// Byte/word transfers with scaled register offset (bits [27:25] = 011).
/// Columns: -LSL, -LSR, -ASR, -ROR, +LSL, +LSR, +ASR, +ROR.
fn decode_arm_transfer_reg(index: usize) -> ArmHandler {
    const LDR: [[ArmHandler; 8]; 3] = [
        [transfer::ldr_ofrmll, transfer::ldr_ofrmlr, transfer::ldr_ofrmar, transfer::ldr_ofrmrr, transfer::ldr_ofrpll, transfer::ldr_ofrplr, transfer::ldr_ofrpar, transfer::ldr_ofrprr],
        [transfer::ldr_prrmll, transfer::ldr_prrmlr, transfer::ldr_prrmar, transfer::ldr_prrmrr, transfer::ldr_prrpll, transfer::ldr_prrplr, transfer::ldr_prrpar, transfer::ldr_prrprr],
        [transfer::ldr_ptrmll, transfer::ldr_ptrmlr, transfer::ldr_ptrmar, transfer::ldr_ptrmrr, transfer::ldr_ptrpll, transfer::ldr_ptrplr, transfer::ldr_ptrpar, transfer::ldr_ptrprr],
    ];
    const STR: [[ArmHandler; 8]; 3] = [
        [transfer::str_ofrmll, transfer::str_ofrmlr, transfer::str_ofrmar, transfer::str_ofrmrr, transfer::str_ofrpll, transfer::str_ofrplr, transfer::str_ofrpar, transfer::str_ofrprr],
        [transfer::str_prrmll, transfer::str_prrmlr, transfer::str_prrmar, transfer::str_prrmrr, transfer::str_prrpll, transfer::str_prrplr, transfer::str_prrpar, transfer::str_prrprr],
        [transfer::str_ptrmll, transfer::str_ptrmlr, transfer::str_ptrmar, transfer::str_ptrmrr, transfer::str_ptrpll, transfer::str_ptrplr, transfer::str_ptrpar, transfer::str_ptrprr],
    ];
    const LDRB: [[ArmHandler; 8]; 3] = [
        [transfer::ldrb_ofrmll, transfer::ldrb_ofrmlr, transfer::ldrb_ofrmar, transfer::ldrb_ofrmrr, transfer::ldrb_ofrpll, transfer::ldrb_ofrplr, transfer::ldrb_ofrpar, transfer::ldrb_ofrprr],
        [transfer::ldrb_prrmll, transfer::ldrb_prrmlr, transfer::ldrb_prrmar, transfer::ldrb_prrmrr, transfer::ldrb_prrpll, transfer::ldrb_prrplr, transfer::ldrb_prrpar, transfer::ldrb_prrprr],
        [transfer::ldrb_ptrmll, transfer::ldrb_ptrmlr, transfer::ldrb_ptrmar, transfer::ldrb_ptrmrr, transfer::ldrb_ptrpll, transfer::ldrb_ptrplr, transfer::ldrb_ptrpar, transfer::ldrb_ptrprr],
    ];
    const STRB: [[ArmHandler; 8]; 3] = [
        [transfer::strb_ofrmll, transfer::strb_ofrmlr, transfer::strb_ofrmar, transfer::strb_ofrmrr, transfer::strb_ofrpll, transfer::strb_ofrplr, transfer::strb_ofrpar, transfer::strb_ofrprr],
        [transfer::strb_prrmll, transfer::strb_prrmlr, transfer::strb_prrmar, transfer::strb_prrmrr, transfer::strb_prrpll, transfer::strb_prrplr, transfer::strb_prrpar, transfer::strb_prrprr],
        [transfer::strb_ptrmll, transfer::strb_ptrmlr, transfer::strb_ptrmar, transfer::strb_ptrmrr, transfer::strb_ptrpll, transfer::strb_ptrplr, transfer::strb_ptrpar, transfer::strb_ptrprr],
    ];

    let load = index & 0x10 != 0;
    let byte = index & 0x40 != 0;
    let row = addr_mode(index);
    let col = (((index >> 7) & 0x1) << 2) | ((index >> 1) & 0x3);

    match (load, byte) {
        (true, false) => LDR[row][col],
        (true, true) => LDRB[row][col],
        (false, false) => STR[row][col],
        (false, true) => STRB[row][col],
    }
}

/// Block transfers (bits [27:25] = 100), keyed on [24:20] = P/U/S/W/L.
fn decode_arm_block(index: usize) -> ArmHandler {
    match (index >> 4) & 0x1F {
        0b00000 => transfer::stmda,
        0b00001 => transfer::ldmda,
        0b00010 => transfer::stmda_w,
        0b00011 => transfer::ldmda_w,
        0b00100 => transfer::stmda_u,
        0b00101 => transfer::ldmda_u,
        0b00110 => transfer::stmda_uw,
        0b00111 => transfer::ldmda_uw,
        0b01000 => transfer::stmia,
        0b01001 => transfer::ldmia,
        0b01010 => transfer::stmia_w,
        0b01011 => transfer::ldmia_w,
        0b01100 => transfer::stmia_u,
        0b01101 => transfer::ldmia_u,
        0b01110 => transfer::stmia_uw,
        0b01111 => transfer::ldmia_uw,
        0b10000 => transfer::stmdb,
        0b10001 => transfer::ldmdb,
        0b10010 => transfer::stmdb_w,
        0b10011 => transfer::ldmdb_w,
        0b10100 => transfer::stmdb_u,
        0b10101 => transfer::ldmdb_u,
        0b10110 => transfer::stmdb_uw,
        0b10111 => transfer::ldmdb_uw,
        0b11000 => transfer::stmib,
        0b11001 => transfer::ldmib,
        0b11010 => transfer::stmib_w,
        0b11011 => transfer::ldmib_w,
        0b11100 => transfer::stmib_u,
        0b11101 => transfer::ldmib_u,
        0b11110 => transfer::stmib_uw,
        _ => transfer::ldmib_uw,
    }
}

// ========== THUMB decode ==========

fn decode_thumb(index: usize) -> ThumbHandler {
    // index = opcode bits [15:6]
    match index >> 5 {
        0b00000 => alu::lsl_imm_t,
        0b00001 => alu::lsr_imm_t,
        0b00010 => alu::asr_imm_t,
        0b00011 => match (index >> 3) & 0x3 {
            0 => alu::add_reg_t,
            1 => alu::sub_reg_t,
            2 => alu::add_imm3_t,
            _ => alu::sub_imm3_t,
        },
        0b00100 => alu::mov_imm8_t,
        0b00101 => alu::cmp_imm8_t,
        0b00110 => alu::add_imm8_t,
        0b00111 => alu::sub_imm8_t,
        0b01000 => match index & 0x1F {
            0b00000 => alu::and_dp_t,
            0b00001 => alu::eor_dp_t,
            0b00010 => alu::lsl_dp_t,
            0b00011 => alu::lsr_dp_t,
            0b00100 => alu::asr_dp_t,
            0b00101 => alu::adc_dp_t,
            0b00110 => alu::sbc_dp_t,
            0b00111 => alu::ror_dp_t,
            0b01000 => alu::tst_dp_t,
            0b01001 => alu::neg_dp_t,
            0b01010 => alu::cmp_dp_t,
            0b01011 => alu::cmn_dp_t,
            0b01100 => alu::orr_dp_t,
            0b01101 => alu::mul_dp_t,
            0b01110 => alu::bic_dp_t,
            0b01111 => alu::mvn_dp_t,
            0b10000..=0b10011 => alu::add_h_t,
            0b10100..=0b10111 => alu::cmp_h_t,
            0b11000..=0b11011 => alu::mov_h_t,
            i => {
                if i & 0x2 != 0 {
                    branch::blx_reg_t
                } else {
                    branch::bx_reg_t
                }
            }
        },
        0b01001 => transfer::ldr_pc_t,
        0b01010 | 0b01011 => match (index >> 3) & 0x7 {
            0 => transfer::str_reg_t,
            1 => transfer::strh_reg_t,
            2 => transfer::strb_reg_t,
            3 => transfer::ldrsb_reg_t,
            4 => transfer::ldr_reg_t,
            5 => transfer::ldrh_reg_t,
            6 => transfer::ldrb_reg_t,
            _ => transfer::ldrsh_reg_t,
        },
        0b01100 => transfer::str_imm5_t,
        0b01101 => transfer::ldr_imm5_t,
        0b01110 => transfer::strb_imm5_t,
        0b01111 => transfer::ldrb_imm5_t,
        0b10000 => transfer::strh_imm5_t,
        0b10001 => transfer::ldrh_imm5_t,
        0b10010 => transfer::str_sp_t,
        0b10011 => transfer::ldr_sp_t,
        0b10100 => alu::add_pc_t,
        0b10101 => alu::add_sp_t,
        0b10110 | 0b10111 => match index >> 2 {
            0xB0 => alu::add_sp_imm_t,
            0xB4 => transfer::push_t,
            0xB5 => transfer::push_lr_t,
            0xBC => transfer::pop_t,
            0xBD => transfer::pop_pc_t,
            _ => unk_thumb,
        },
        0b11000 => transfer::stmia_t,
        0b11001 => transfer::ldmia_t,
        0b11010 | 0b11011 => match index >> 2 {
            0xD0 => branch::beq_t,
            0xD1 => branch::bne_t,
            0xD2 => branch::bcs_t,
            0xD3 => branch::bcc_t,
            0xD4 => branch::bmi_t,
            0xD5 => branch::bpl_t,
            0xD6 => branch::bvs_t,
            0xD7 => branch::bvc_t,
            0xD8 => branch::bhi_t,
            0xD9 => branch::bls_t,
            0xDA => branch::bge_t,
            0xDB => branch::blt_t,
            0xDC => branch::bgt_t,
            0xDD => branch::ble_t,
            0xDF => branch::swi_t,
            _ => unk_thumb,
        },
        0b11100 => branch::b_t,
        0b11101 => branch::blx_off_t,
        0b11110 => branch::bl_setup_t,
        _ => branch::bl_off_t,
    }
}
