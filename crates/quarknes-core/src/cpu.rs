//! MOS 6502 CPU core.
//!
//! Instructions are described by a 256-entry table pairing an addressing
//! mode with an operation; both are enums dispatched through a match.
//! The engine is cycle-budgeted: executing an instruction charges its
//! base cycle count plus any page-cross/branch surcharges, and
//! subsequent `cycle()` calls burn the budget down before the next
//! opcode is fetched.

use bitflags::bitflags;

use crate::bus::{Bus, Signal};
use crate::util;

/// Reset vector location.
pub const VECTOR_RESET: u16 = 0xFFFC;
/// Maskable interrupt vector location.
pub const VECTOR_IRQ: u16 = 0xFFFE;
/// Non-maskable interrupt vector location.
pub const VECTOR_NMI: u16 = 0xFFFA;

bitflags! {
    /// Processor status register. Bit 5 (UNUSED) reads 1 whenever the
    /// register is observed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        const CARRY             = 0x01;
        const ZERO              = 0x02;
        const INTERRUPT_DISABLE = 0x04;
        const DECIMAL           = 0x08;
        const BREAK             = 0x10;
        const UNUSED            = 0x20;
        const OVERFLOW          = 0x40;
        const NEGATIVE          = 0x80;
    }
}

/// CPU register file.
#[derive(Debug, Clone, Copy)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub pc: u16,
    pub p: Status,
    pub s: u8,
}

/// Addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    Imp,
    Acc,
    Imm,
    Zp0,
    Zpx,
    Zpy,
    Rel,
    Abs,
    Abx,
    Aby,
    Ind,
    Izx,
    Izy,
}

/// Operations, including the `Xxx` handler for unassigned slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Xxx,
    Nop,
    Brk,
    Rti,
    Lda,
    Ldx,
    Ldy,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Txa,
    Tya,
    Tsx,
    Txs,
    Pha,
    Php,
    Pla,
    Plp,
    And,
    Eor,
    Ora,
    Bit,
    Adc,
    Sbc,
    Cmp,
    Cpx,
    Cpy,
    Inc,
    Inx,
    Iny,
    Dec,
    Dex,
    Dey,
    Asl,
    Lsr,
    Rol,
    Ror,
    Jmp,
    Jsr,
    Rts,
    Bcc,
    Bcs,
    Beq,
    Bmi,
    Bne,
    Bpl,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Sec,
    Sed,
    Sei,
}

/// One opcode table entry.
#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    pub mnemonic: &'static str,
    pub opcode: u8,
    pub base_cycles: u8,
    pub mode: AddrMode,
    pub op: Op,
}

const fn i(mnemonic: &'static str, opcode: u8, base_cycles: u8, mode: AddrMode, op: Op) -> Instruction {
    Instruction {
        mnemonic,
        opcode,
        base_cycles,
        mode,
        op,
    }
}

use AddrMode as M;
use Op as O;

/// The full 256-slot opcode map. Unassigned slots keep their measured
/// cycle counts and run as NOPs.
#[rustfmt::skip]
pub const OPCODE_TABLE: [Instruction; 256] = [
    i("BRK", 0x00, 7, M::Imm, O::Brk), i("ORA", 0x01, 6, M::Izx, O::Ora), i("XXX", 0x02, 2, M::Imp, O::Xxx), i("XXX", 0x03, 8, M::Imp, O::Xxx),
    i("XXX", 0x04, 3, M::Imp, O::Nop), i("ORA", 0x05, 3, M::Zp0, O::Ora), i("ASL", 0x06, 5, M::Zp0, O::Asl), i("XXX", 0x07, 5, M::Imp, O::Xxx),
    i("PHP", 0x08, 3, M::Imp, O::Php), i("ORA", 0x09, 2, M::Imm, O::Ora), i("ASL", 0x0A, 2, M::Acc, O::Asl), i("XXX", 0x0B, 2, M::Imp, O::Xxx),
    i("XXX", 0x0C, 4, M::Imp, O::Nop), i("ORA", 0x0D, 4, M::Abs, O::Ora), i("ASL", 0x0E, 6, M::Abs, O::Asl), i("XXX", 0x0F, 6, M::Imp, O::Xxx),
    i("BPL", 0x10, 2, M::Rel, O::Bpl), i("ORA", 0x11, 5, M::Izy, O::Ora), i("XXX", 0x12, 2, M::Imp, O::Xxx), i("XXX", 0x13, 8, M::Imp, O::Xxx),
    i("XXX", 0x14, 4, M::Imp, O::Nop), i("ORA", 0x15, 4, M::Zpx, O::Ora), i("ASL", 0x16, 6, M::Zpx, O::Asl), i("XXX", 0x17, 6, M::Imp, O::Xxx),
    i("CLC", 0x18, 2, M::Imp, O::Clc), i("ORA", 0x19, 4, M::Aby, O::Ora), i("XXX", 0x1A, 2, M::Imp, O::Nop), i("XXX", 0x1B, 7, M::Imp, O::Xxx),
    i("XXX", 0x1C, 4, M::Imp, O::Nop), i("ORA", 0x1D, 4, M::Abx, O::Ora), i("ASL", 0x1E, 7, M::Abx, O::Asl), i("XXX", 0x1F, 7, M::Imp, O::Xxx),
    i("JSR", 0x20, 6, M::Abs, O::Jsr), i("AND", 0x21, 6, M::Izx, O::And), i("XXX", 0x22, 2, M::Imp, O::Xxx), i("XXX", 0x23, 8, M::Imp, O::Xxx),
    i("BIT", 0x24, 3, M::Zp0, O::Bit), i("AND", 0x25, 3, M::Zp0, O::And), i("ROL", 0x26, 5, M::Zp0, O::Rol), i("XXX", 0x27, 5, M::Imp, O::Xxx),
    i("PLP", 0x28, 4, M::Imp, O::Plp), i("AND", 0x29, 2, M::Imm, O::And), i("ROL", 0x2A, 2, M::Acc, O::Rol), i("XXX", 0x2B, 2, M::Imp, O::Xxx),
    i("BIT", 0x2C, 4, M::Abs, O::Bit), i("AND", 0x2D, 4, M::Abs, O::And), i("ROL", 0x2E, 6, M::Abs, O::Rol), i("XXX", 0x2F, 6, M::Imp, O::Xxx),
    i("BMI", 0x30, 2, M::Rel, O::Bmi), i("AND", 0x31, 5, M::Izy, O::And), i("XXX", 0x32, 2, M::Imp, O::Xxx), i("XXX", 0x33, 8, M::Imp, O::Xxx),
    i("XXX", 0x34, 4, M::Imp, O::Nop), i("AND", 0x35, 4, M::Zpx, O::And), i("ROL", 0x36, 6, M::Zpx, O::Rol), i("XXX", 0x37, 6, M::Imp, O::Xxx),
    i("SEC", 0x38, 2, M::Imp, O::Sec), i("AND", 0x39, 4, M::Aby, O::And), i("XXX", 0x3A, 2, M::Imp, O::Nop), i("XXX", 0x3B, 7, M::Imp, O::Xxx),
    i("XXX", 0x3C, 4, M::Imp, O::Nop), i("AND", 0x3D, 4, M::Abx, O::And), i("ROL", 0x3E, 7, M::Abx, O::Rol), i("XXX", 0x3F, 7, M::Imp, O::Xxx),
    i("RTI", 0x40, 6, M::Imp, O::Rti), i("EOR", 0x41, 6, M::Izx, O::Eor), i("XXX", 0x42, 2, M::Imp, O::Xxx), i("XXX", 0x43, 8, M::Imp, O::Xxx),
    i("XXX", 0x44, 3, M::Imp, O::Nop), i("EOR", 0x45, 3, M::Zp0, O::Eor), i("LSR", 0x46, 5, M::Zp0, O::Lsr), i("XXX", 0x47, 5, M::Imp, O::Xxx),
    i("PHA", 0x48, 3, M::Imp, O::Pha), i("EOR", 0x49, 2, M::Imm, O::Eor), i("LSR", 0x4A, 2, M::Acc, O::Lsr), i("XXX", 0x4B, 2, M::Imp, O::Xxx),
    i("JMP", 0x4C, 3, M::Abs, O::Jmp), i("EOR", 0x4D, 4, M::Abs, O::Eor), i("LSR", 0x4E, 6, M::Abs, O::Lsr), i("XXX", 0x4F, 6, M::Imp, O::Xxx),
    i("BVC", 0x50, 2, M::Rel, O::Bvc), i("EOR", 0x51, 5, M::Izy, O::Eor), i("XXX", 0x52, 2, M::Imp, O::Xxx), i("XXX", 0x53, 8, M::Imp, O::Xxx),
    i("XXX", 0x54, 4, M::Imp, O::Nop), i("EOR", 0x55, 4, M::Zpx, O::Eor), i("LSR", 0x56, 6, M::Zpx, O::Lsr), i("XXX", 0x57, 6, M::Imp, O::Xxx),
    i("CLI", 0x58, 2, M::Imp, O::Cli), i("EOR", 0x59, 4, M::Aby, O::Eor), i("XXX", 0x5A, 2, M::Imp, O::Nop), i("XXX", 0x5B, 7, M::Imp, O::Xxx),
    i("XXX", 0x5C, 4, M::Imp, O::Nop), i("EOR", 0x5D, 4, M::Abx, O::Eor), i("LSR", 0x5E, 7, M::Abx, O::Lsr), i("XXX", 0x5F, 7, M::Imp, O::Xxx),
    i("RTS", 0x60, 6, M::Imp, O::Rts), i("ADC", 0x61, 6, M::Izx, O::Adc), i("XXX", 0x62, 2, M::Imp, O::Xxx), i("XXX", 0x63, 8, M::Imp, O::Xxx),
    i("XXX", 0x64, 3, M::Imp, O::Nop), i("ADC", 0x65, 3, M::Zp0, O::Adc), i("ROR", 0x66, 5, M::Zp0, O::Ror), i("XXX", 0x67, 5, M::Imp, O::Xxx),
    i("PLA", 0x68, 4, M::Imp, O::Pla), i("ADC", 0x69, 2, M::Imm, O::Adc), i("ROR", 0x6A, 2, M::Acc, O::Ror), i("XXX", 0x6B, 2, M::Imp, O::Xxx),
    i("JMP", 0x6C, 5, M::Ind, O::Jmp), i("ADC", 0x6D, 4, M::Abs, O::Adc), i("ROR", 0x6E, 6, M::Abs, O::Ror), i("XXX", 0x6F, 6, M::Imp, O::Xxx),
    i("BVS", 0x70, 2, M::Rel, O::Bvs), i("ADC", 0x71, 5, M::Izy, O::Adc), i("XXX", 0x72, 2, M::Imp, O::Xxx), i("XXX", 0x73, 8, M::Imp, O::Xxx),
    i("XXX", 0x74, 4, M::Imp, O::Nop), i("ADC", 0x75, 4, M::Zpx, O::Adc), i("ROR", 0x76, 6, M::Zpx, O::Ror), i("XXX", 0x77, 6, M::Imp, O::Xxx),
    i("SEI", 0x78, 2, M::Imp, O::Sei), i("ADC", 0x79, 4, M::Aby, O::Adc), i("XXX", 0x7A, 2, M::Imp, O::Nop), i("XXX", 0x7B, 7, M::Imp, O::Xxx),
    i("XXX", 0x7C, 4, M::Imp, O::Nop), i("ADC", 0x7D, 4, M::Abx, O::Adc), i("ROR", 0x7E, 7, M::Abx, O::Ror), i("XXX", 0x7F, 7, M::Imp, O::Xxx),
    i("XXX", 0x80, 2, M::Imp, O::Nop), i("STA", 0x81, 6, M::Izx, O::Sta), i("XXX", 0x82, 2, M::Imp, O::Nop), i("XXX", 0x83, 6, M::Imp, O::Xxx),
    i("STY", 0x84, 3, M::Zp0, O::Sty), i("STA", 0x85, 3, M::Zp0, O::Sta), i("STX", 0x86, 3, M::Zp0, O::Stx), i("XXX", 0x87, 3, M::Imp, O::Xxx),
    i("DEY", 0x88, 2, M::Imp, O::Dey), i("XXX", 0x89, 2, M::Imp, O::Nop), i("TXA", 0x8A, 2, M::Imp, O::Txa), i("XXX", 0x8B, 2, M::Imp, O::Xxx),
    i("STY", 0x8C, 4, M::Abs, O::Sty), i("STA", 0x8D, 4, M::Abs, O::Sta), i("STX", 0x8E, 4, M::Abs, O::Stx), i("XXX", 0x8F, 4, M::Imp, O::Xxx),
    i("BCC", 0x90, 2, M::Rel, O::Bcc), i("STA", 0x91, 6, M::Izy, O::Sta), i("XXX", 0x92, 2, M::Imp, O::Xxx), i("XXX", 0x93, 6, M::Imp, O::Xxx),
    i("STY", 0x94, 4, M::Zpx, O::Sty), i("STA", 0x95, 4, M::Zpx, O::Sta), i("STX", 0x96, 4, M::Zpy, O::Stx), i("XXX", 0x97, 4, M::Imp, O::Xxx),
    i("TYA", 0x98, 2, M::Imp, O::Tya), i("STA", 0x99, 5, M::Aby, O::Sta), i("TXS", 0x9A, 2, M::Imp, O::Txs), i("XXX", 0x9B, 5, M::Imp, O::Xxx),
    i("XXX", 0x9C, 5, M::Imp, O::Nop), i("STA", 0x9D, 5, M::Abx, O::Sta), i("XXX", 0x9E, 5, M::Imp, O::Xxx), i("XXX", 0x9F, 5, M::Imp, O::Xxx),
    i("LDY", 0xA0, 2, M::Imm, O::Ldy), i("LDA", 0xA1, 6, M::Izx, O::Lda), i("LDX", 0xA2, 2, M::Imm, O::Ldx), i("XXX", 0xA3, 6, M::Imp, O::Xxx),
    i("LDY", 0xA4, 3, M::Zp0, O::Ldy), i("LDA", 0xA5, 3, M::Zp0, O::Lda), i("LDX", 0xA6, 3, M::Zp0, O::Ldx), i("XXX", 0xA7, 3, M::Imp, O::Xxx),
    i("TAY", 0xA8, 2, M::Imp, O::Tay), i("LDA", 0xA9, 2, M::Imm, O::Lda), i("TAX", 0xAA, 2, M::Imp, O::Tax), i("XXX", 0xAB, 2, M::Imp, O::Xxx),
    i("LDY", 0xAC, 4, M::Abs, O::Ldy), i("LDA", 0xAD, 4, M::Abs, O::Lda), i("LDX", 0xAE, 4, M::Abs, O::Ldx), i("XXX", 0xAF, 4, M::Imp, O::Xxx),
    i("BCS", 0xB0, 2, M::Rel, O::Bcs), i("LDA", 0xB1, 5, M::Izy, O::Lda), i("XXX", 0xB2, 2, M::Imp, O::Xxx), i("XXX", 0xB3, 5, M::Imp, O::Xxx),
    i("LDY", 0xB4, 4, M::Zpx, O::Ldy), i("LDA", 0xB5, 4, M::Zpx, O::Lda), i("LDX", 0xB6, 4, M::Zpy, O::Ldx), i("XXX", 0xB7, 4, M::Imp, O::Xxx),
    i("CLV", 0xB8, 2, M::Imp, O::Clv), i("LDA", 0xB9, 4, M::Aby, O::Lda), i("TSX", 0xBA, 2, M::Imp, O::Tsx), i("XXX", 0xBB, 4, M::Imp, O::Xxx),
    i("LDY", 0xBC, 4, M::Abx, O::Ldy), i("LDA", 0xBD, 4, M::Abx, O::Lda), i("LDX", 0xBE, 4, M::Aby, O::Ldx), i("XXX", 0xBF, 4, M::Imp, O::Xxx),
    i("CPY", 0xC0, 2, M::Imm, O::Cpy), i("CMP", 0xC1, 6, M::Izx, O::Cmp), i("XXX", 0xC2, 2, M::Imp, O::Nop), i("XXX", 0xC3, 8, M::Imp, O::Xxx),
    i("CPY", 0xC4, 3, M::Zp0, O::Cpy), i("CMP", 0xC5, 3, M::Zp0, O::Cmp), i("DEC", 0xC6, 5, M::Zp0, O::Dec), i("XXX", 0xC7, 5, M::Imp, O::Xxx),
    i("INY", 0xC8, 2, M::Imp, O::Iny), i("CMP", 0xC9, 2, M::Imm, O::Cmp), i("DEX", 0xCA, 2, M::Imp, O::Dex), i("XXX", 0xCB, 2, M::Imp, O::Xxx),
    i("CPY", 0xCC, 4, M::Abs, O::Cpy), i("CMP", 0xCD, 4, M::Abs, O::Cmp), i("DEC", 0xCE, 6, M::Abs, O::Dec), i("XXX", 0xCF, 6, M::Imp, O::Xxx),
    i("BNE", 0xD0, 2, M::Rel, O::Bne), i("CMP", 0xD1, 5, M::Izy, O::Cmp), i("XXX", 0xD2, 2, M::Imp, O::Xxx), i("XXX", 0xD3, 8, M::Imp, O::Xxx),
    i("XXX", 0xD4, 4, M::Imp, O::Nop), i("CMP", 0xD5, 4, M::Zpx, O::Cmp), i("DEC", 0xD6, 6, M::Zpx, O::Dec), i("XXX", 0xD7, 6, M::Imp, O::Xxx),
    i("CLD", 0xD8, 2, M::Imp, O::Cld), i("CMP", 0xD9, 4, M::Aby, O::Cmp), i("NOP", 0xDA, 2, M::Imp, O::Nop), i("XXX", 0xDB, 7, M::Imp, O::Xxx),
    i("XXX", 0xDC, 4, M::Imp, O::Nop), i("CMP", 0xDD, 4, M::Abx, O::Cmp), i("DEC", 0xDE, 7, M::Abx, O::Dec), i("XXX", 0xDF, 7, M::Imp, O::Xxx),
    i("CPX", 0xE0, 2, M::Imm, O::Cpx), i("SBC", 0xE1, 6, M::Izx, O::Sbc), i("XXX", 0xE2, 2, M::Imp, O::Nop), i("XXX", 0xE3, 8, M::Imp, O::Xxx),
    i("CPX", 0xE4, 3, M::Zp0, O::Cpx), i("SBC", 0xE5, 3, M::Zp0, O::Sbc), i("INC", 0xE6, 5, M::Zp0, O::Inc), i("XXX", 0xE7, 5, M::Imp, O::Xxx),
    i("INX", 0xE8, 2, M::Imp, O::Inx), i("SBC", 0xE9, 2, M::Imm, O::Sbc), i("NOP", 0xEA, 2, M::Imp, O::Nop), i("XXX", 0xEB, 2, M::Imp, O::Xxx),
    i("CPX", 0xEC, 4, M::Abs, O::Cpx), i("SBC", 0xED, 4, M::Abs, O::Sbc), i("INC", 0xEE, 6, M::Abs, O::Inc), i("XXX", 0xEF, 6, M::Imp, O::Xxx),
    i("BEQ", 0xF0, 2, M::Rel, O::Beq), i("SBC", 0xF1, 5, M::Izy, O::Sbc), i("XXX", 0xF2, 2, M::Imp, O::Xxx), i("XXX", 0xF3, 8, M::Imp, O::Xxx),
    i("XXX", 0xF4, 4, M::Imp, O::Nop), i("SBC", 0xF5, 4, M::Zpx, O::Sbc), i("INC", 0xF6, 6, M::Zpx, O::Inc), i("XXX", 0xF7, 6, M::Imp, O::Xxx),
    i("SED", 0xF8, 2, M::Imp, O::Sed), i("SBC", 0xF9, 4, M::Aby, O::Sbc), i("NOP", 0xFA, 2, M::Imp, O::Nop), i("XXX", 0xFB, 7, M::Imp, O::Xxx),
    i("XXX", 0xFC, 4, M::Imp, O::Nop), i("SBC", 0xFD, 4, M::Abx, O::Sbc), i("INC", 0xFE, 7, M::Abx, O::Inc), i("XXX", 0xFF, 7, M::Imp, O::Xxx),
];

/// The CPU device. Non-addressable; it initiates bus traffic but does
/// not answer to it.
#[derive(Debug)]
pub struct Mos6502 {
    pub regs: Registers,

    /// Cycles left before the next instruction may start.
    remaining_cycles: i32,
    cycle_count: u64,

    /// Pending interrupt latches, serviced at instruction boundaries.
    irq_pending: bool,
    nmi_pending: bool,
    halted: bool,

    /// NES parts omit the BCD circuitry.
    decimal_mode_available: bool,

    // Scratch shared by the addressing/operation halves of the current
    // instruction.
    opcode: u8,
    addr_abs: u16,
    fetched: u8,
    do_fetch: bool,
    extra_cycles: i32,
    did_irq: bool,
    did_nmi: bool,
}

impl Default for Mos6502 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mos6502 {
    pub fn new() -> Self {
        Self {
            regs: Registers {
                a: 0,
                x: 0,
                y: 0,
                pc: 0,
                p: Status::from_bits_truncate(0x24),
                s: 0xFD,
            },
            remaining_cycles: 0,
            cycle_count: 0,
            irq_pending: false,
            nmi_pending: false,
            halted: false,
            decimal_mode_available: true,
            opcode: 0xEA,
            addr_abs: 0,
            fetched: 0,
            do_fetch: true,
            extra_cycles: 0,
            did_irq: false,
            did_nmi: false,
        }
    }

    /// Load PC from the reset vector and reinitialize registers.
    pub fn reset(&mut self, bus: &mut Bus) {
        let lo = bus.read(VECTOR_RESET) as u16;
        let hi = bus.read(VECTOR_RESET + 1) as u16;
        self.reset_to((hi << 8) | lo);
    }

    /// Reinitialize registers with a forced PC.
    pub fn reset_to(&mut self, pc: u16) {
        self.regs.a = 0;
        self.regs.x = 0;
        self.regs.y = 0;
        self.regs.pc = pc;
        self.regs.p = Status::from_bits_truncate(0x24);
        self.regs.s = 0xFD;
        self.remaining_cycles = 0;
        self.irq_pending = false;
        self.nmi_pending = false;
        self.halted = false;
    }

    /// Gate the BCD path of ADC/SBC; the NES's 2A03 has it fused off.
    pub fn set_decimal_mode_available(&mut self, available: bool) {
        self.decimal_mode_available = available;
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// 16-bit address of the current stack slot (page 1).
    pub fn stack_address(&self) -> u16 {
        0x0100 | self.regs.s as u16
    }

    pub fn on_signal(&mut self, signal: Signal) {
        match signal {
            Signal::CpuIrq => self.irq_pending = true,
            Signal::CpuNmi => self.nmi_pending = true,
            Signal::CpuHalt => self.halted = true,
            Signal::CpuResume => self.halted = false,
            _ => {}
        }
    }

    /// Advance one CPU cycle. When the current instruction's budget is
    /// spent, service a pending interrupt or execute the next opcode.
    pub fn cycle(&mut self, bus: &mut Bus) {
        if self.halted {
            return;
        }

        if self.remaining_cycles <= 0 {
            self.did_irq = false;
            self.did_nmi = false;

            if self.nmi_pending {
                self.nmi_pending = false;
                self.interrupt(bus, VECTOR_NMI);
                self.did_nmi = true;
            } else if self.irq_pending && !self.regs.p.contains(Status::INTERRUPT_DISABLE) {
                self.irq_pending = false;
                self.interrupt(bus, VECTOR_IRQ);
                self.did_irq = true;
            } else {
                self.execute_next(bus);
            }

            self.remaining_cycles += self.last_instruction_cycles();
        }

        self.remaining_cycles -= 1;
        self.cycle_count += 1;
    }

    /// Cycle cost of whatever `cycle()` last started. Interrupt service
    /// has fixed budgets; instructions combine base cycles with the
    /// surcharge accumulator. A single tentative increment (REL's) is
    /// not enough to charge: read ops and taken branches add the second.
    fn last_instruction_cycles(&self) -> i32 {
        if self.did_nmi {
            return 8;
        }
        if self.did_irq {
            return 7;
        }

        let base = OPCODE_TABLE[self.opcode as usize].base_cycles as i32;
        if self.extra_cycles >= 2 {
            base + self.extra_cycles - 1
        } else {
            base
        }
    }

    fn execute_next(&mut self, bus: &mut Bus) {
        self.addr_abs = 0;
        self.fetched = 0;
        self.do_fetch = true;
        self.extra_cycles = 0;

        self.opcode = self.read_pc(bus);
        let instruction = OPCODE_TABLE[self.opcode as usize];

        self.resolve_address(bus, instruction.mode);
        self.perform(bus, instruction.op);
    }

    // -----------------------------
    // Bus and stack helpers
    // -----------------------------

    fn read_pc(&mut self, bus: &mut Bus) -> u8 {
        let value = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    fn push(&mut self, bus: &mut Bus, value: u8) {
        bus.write(self.stack_address(), value);
        self.regs.s = self.regs.s.wrapping_sub(1);
    }

    fn pull(&mut self, bus: &mut Bus) -> u8 {
        self.regs.s = self.regs.s.wrapping_add(1);
        bus.read(self.stack_address())
    }

    /// Read the operand lazily. Implied/accumulator modes pre-load
    /// `fetched` and clear `do_fetch`.
    fn fetch(&mut self, bus: &mut Bus) -> u8 {
        if self.do_fetch {
            self.fetched = bus.read(self.addr_abs);
        }
        self.fetched
    }

    fn set_flag(&mut self, flag: Status, state: bool) {
        self.regs.p.set(flag, state);
    }

    fn flag(&self, flag: Status) -> bool {
        self.regs.p.contains(flag)
    }

    fn set_zn(&mut self, value: u8) {
        self.set_flag(Status::ZERO, value == 0);
        self.set_flag(Status::NEGATIVE, value & 0x80 != 0);
    }

    // -----------------------------
    // Interrupt service
    // -----------------------------

    /// Shared IRQ/NMI skeleton: stack PC and P (with U forced), mask
    /// further IRQs, load the handler vector.
    fn interrupt(&mut self, bus: &mut Bus, vector: u16) {
        let pc = self.regs.pc;
        self.push(bus, (pc >> 8) as u8);
        self.push(bus, (pc & 0x00FF) as u8);

        self.set_flag(Status::BREAK, false);
        self.set_flag(Status::INTERRUPT_DISABLE, true);

        let p = self.regs.p | Status::UNUSED;
        self.push(bus, p.bits());

        let lo = bus.read(vector) as u16;
        let hi = bus.read(vector.wrapping_add(1)) as u16;
        self.regs.pc = (hi << 8) | lo;
    }

    // -----------------------------
    // Addressing modes
    // -----------------------------

    fn resolve_address(&mut self, bus: &mut Bus, mode: AddrMode) {
        match mode {
            AddrMode::Imp => {
                self.fetched = 0;
                self.do_fetch = false;
            }
            AddrMode::Acc => {
                self.fetched = self.regs.a;
                self.do_fetch = false;
            }
            AddrMode::Imm => {
                self.addr_abs = self.regs.pc;
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            AddrMode::Zp0 => {
                self.addr_abs = self.read_pc(bus) as u16;
            }
            AddrMode::Zpx => {
                let base = self.read_pc(bus);
                self.addr_abs = base.wrapping_add(self.regs.x) as u16;
            }
            AddrMode::Zpy => {
                let base = self.read_pc(bus);
                self.addr_abs = base.wrapping_add(self.regs.y) as u16;
            }
            AddrMode::Rel => {
                let offset = self.read_pc(bus) as i8;
                self.addr_abs = self.regs.pc.wrapping_add(offset as u16);
                // Tentative branch surcharge; charged only if taken.
                self.extra_cycles += 1;
            }
            AddrMode::Abs => {
                let lo = self.read_pc(bus) as u16;
                let hi = (self.read_pc(bus) as u16) << 8;
                self.addr_abs = hi | lo;
            }
            AddrMode::Abx => {
                let lo = self.read_pc(bus) as u16;
                let hi = (self.read_pc(bus) as u16) << 8;
                self.addr_abs = (hi | lo).wrapping_add(self.regs.x as u16);
                if (self.addr_abs & 0xFF00) != hi {
                    self.extra_cycles += 1;
                }
            }
            AddrMode::Aby => {
                let lo = self.read_pc(bus) as u16;
                let hi = (self.read_pc(bus) as u16) << 8;
                self.addr_abs = (hi | lo).wrapping_add(self.regs.y as u16);
                if (self.addr_abs & 0xFF00) != hi {
                    self.extra_cycles += 1;
                }
            }
            AddrMode::Ind => {
                let ptr_lo = self.read_pc(bus) as u16;
                let ptr_hi = (self.read_pc(bus) as u16) << 8;
                let ptr = ptr_hi | ptr_lo;

                // Hardware bug: a pointer ending in 0xFF wraps within
                // its page when fetching the target's high byte.
                let hi_addr = if ptr_lo == 0x00FF {
                    ptr & 0xFF00
                } else {
                    ptr.wrapping_add(1)
                };
                self.addr_abs = ((bus.read(hi_addr) as u16) << 8) | bus.read(ptr) as u16;
            }
            AddrMode::Izx => {
                let ptr = self.read_pc(bus).wrapping_add(self.regs.x) as u16;
                let lo = bus.read(ptr & 0x00FF) as u16;
                let hi = (bus.read(ptr.wrapping_add(1) & 0x00FF) as u16) << 8;
                self.addr_abs = hi | lo;
            }
            AddrMode::Izy => {
                let ptr = self.read_pc(bus) as u16;
                let lo = bus.read(ptr & 0x00FF) as u16;
                let hi = (bus.read(ptr.wrapping_add(1) & 0x00FF) as u16) << 8;
                self.addr_abs = (hi | lo).wrapping_add(self.regs.y as u16);
                if (self.addr_abs & 0xFF00) != hi {
                    self.extra_cycles += 1;
                }
            }
        }
    }

    // -----------------------------
    // Operations
    // -----------------------------

    fn perform(&mut self, bus: &mut Bus, op: Op) {
        match op {
            Op::Xxx => {}
            Op::Nop => {}
            Op::Brk => self.op_brk(bus),
            Op::Rti => self.op_rti(bus),
            Op::Lda => {
                self.regs.a = self.fetch(bus);
                self.set_zn(self.regs.a);
                self.extra_cycles += 1;
            }
            Op::Ldx => {
                self.regs.x = self.fetch(bus);
                self.set_zn(self.regs.x);
                self.extra_cycles += 1;
            }
            Op::Ldy => {
                self.regs.y = self.fetch(bus);
                self.set_zn(self.regs.y);
                self.extra_cycles += 1;
            }
            Op::Sta => bus.write(self.addr_abs, self.regs.a),
            Op::Stx => bus.write(self.addr_abs, self.regs.x),
            Op::Sty => bus.write(self.addr_abs, self.regs.y),
            Op::Tax => {
                self.regs.x = self.regs.a;
                self.set_zn(self.regs.x);
            }
            Op::Tay => {
                self.regs.y = self.regs.a;
                self.set_zn(self.regs.y);
            }
            Op::Txa => {
                self.regs.a = self.regs.x;
                self.set_zn(self.regs.a);
            }
            Op::Tya => {
                self.regs.a = self.regs.y;
                self.set_zn(self.regs.a);
            }
            Op::Tsx => {
                self.regs.x = self.regs.s;
                self.set_zn(self.regs.x);
            }
            Op::Txs => self.regs.s = self.regs.x,
            Op::Pha => {
                let a = self.regs.a;
                self.push(bus, a);
            }
            Op::Php => {
                // B and U read 1 in the pushed copy only.
                let p = self.regs.p | Status::BREAK | Status::UNUSED;
                self.push(bus, p.bits());
            }
            Op::Pla => {
                self.regs.a = self.pull(bus);
                self.set_zn(self.regs.a);
            }
            Op::Plp => {
                let p = self.pull(bus);
                self.restore_status(p);
            }
            Op::And => {
                self.regs.a &= self.fetch(bus);
                self.set_zn(self.regs.a);
                self.extra_cycles += 1;
            }
            Op::Eor => {
                self.regs.a ^= self.fetch(bus);
                self.set_zn(self.regs.a);
                self.extra_cycles += 1;
            }
            Op::Ora => {
                self.regs.a |= self.fetch(bus);
                self.set_zn(self.regs.a);
                self.extra_cycles += 1;
            }
            Op::Bit => {
                let data = self.fetch(bus);
                self.set_flag(Status::ZERO, data & self.regs.a == 0);
                self.set_flag(Status::OVERFLOW, data & 0x40 != 0);
                self.set_flag(Status::NEGATIVE, data & 0x80 != 0);
            }
            Op::Adc => self.op_adc(bus),
            Op::Sbc => self.op_sbc(bus),
            Op::Cmp => {
                let data = self.fetch(bus);
                let a = self.regs.a;
                self.set_flag(Status::CARRY, a >= data);
                self.set_flag(Status::ZERO, a == data);
                self.set_flag(Status::NEGATIVE, a.wrapping_sub(data) & 0x80 != 0);
                self.extra_cycles += 1;
            }
            Op::Cpx => {
                let data = self.fetch(bus);
                let x = self.regs.x;
                self.set_flag(Status::CARRY, x >= data);
                self.set_flag(Status::ZERO, x == data);
                self.set_flag(Status::NEGATIVE, x.wrapping_sub(data) & 0x80 != 0);
            }
            Op::Cpy => {
                let data = self.fetch(bus);
                let y = self.regs.y;
                self.set_flag(Status::CARRY, y >= data);
                self.set_flag(Status::ZERO, y == data);
                self.set_flag(Status::NEGATIVE, y.wrapping_sub(data) & 0x80 != 0);
            }
            Op::Inc => {
                let data = self.fetch(bus).wrapping_add(1);
                self.set_zn(data);
                bus.write(self.addr_abs, data);
            }
            Op::Inx => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.set_zn(self.regs.x);
            }
            Op::Iny => {
                self.regs.y = self.regs.y.wrapping_add(1);
                self.set_zn(self.regs.y);
            }
            Op::Dec => {
                let data = self.fetch(bus).wrapping_sub(1);
                self.set_zn(data);
                bus.write(self.addr_abs, data);
            }
            Op::Dex => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.set_zn(self.regs.x);
            }
            Op::Dey => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.set_zn(self.regs.y);
            }
            Op::Asl => {
                let data = self.fetch(bus);
                self.set_flag(Status::CARRY, data & 0x80 != 0);
                let result = data << 1;
                self.set_zn(result);
                self.write_shift_result(bus, result);
            }
            Op::Lsr => {
                let data = self.fetch(bus);
                self.set_flag(Status::CARRY, data & 0x01 != 0);
                let result = data >> 1;
                self.set_zn(result);
                self.write_shift_result(bus, result);
            }
            Op::Rol => {
                let data = self.fetch(bus);
                let carry_in = self.flag(Status::CARRY) as u8;
                self.set_flag(Status::CARRY, data & 0x80 != 0);
                let result = (data << 1) | carry_in;
                self.set_zn(result);
                self.write_shift_result(bus, result);
            }
            Op::Ror => {
                let data = self.fetch(bus);
                let carry_in = (self.flag(Status::CARRY) as u8) << 7;
                self.set_flag(Status::CARRY, data & 0x01 != 0);
                let result = (data >> 1) | carry_in;
                self.set_zn(result);
                self.write_shift_result(bus, result);
            }
            Op::Jmp => self.regs.pc = self.addr_abs,
            Op::Jsr => {
                self.regs.pc = self.regs.pc.wrapping_sub(1);
                let pc = self.regs.pc;
                self.push(bus, (pc >> 8) as u8);
                self.push(bus, (pc & 0x00FF) as u8);
                self.regs.pc = self.addr_abs;
            }
            Op::Rts => {
                let lo = self.pull(bus) as u16;
                let hi = self.pull(bus) as u16;
                self.regs.pc = ((hi << 8) | lo).wrapping_add(1);
            }
            Op::Bcc => self.branch_if(!self.flag(Status::CARRY)),
            Op::Bcs => self.branch_if(self.flag(Status::CARRY)),
            Op::Beq => self.branch_if(self.flag(Status::ZERO)),
            Op::Bmi => self.branch_if(self.flag(Status::NEGATIVE)),
            Op::Bne => self.branch_if(!self.flag(Status::ZERO)),
            Op::Bpl => self.branch_if(!self.flag(Status::NEGATIVE)),
            Op::Bvc => self.branch_if(!self.flag(Status::OVERFLOW)),
            Op::Bvs => self.branch_if(self.flag(Status::OVERFLOW)),
            Op::Clc => self.set_flag(Status::CARRY, false),
            Op::Cld => self.set_flag(Status::DECIMAL, false),
            Op::Cli => self.set_flag(Status::INTERRUPT_DISABLE, false),
            Op::Clv => self.set_flag(Status::OVERFLOW, false),
            Op::Sec => self.set_flag(Status::CARRY, true),
            Op::Sed => self.set_flag(Status::DECIMAL, true),
            Op::Sei => self.set_flag(Status::INTERRUPT_DISABLE, true),
        }
    }

    /// Shift results land in A under accumulator addressing, else at the
    /// resolved address. `do_fetch == false` identifies the former.
    fn write_shift_result(&mut self, bus: &mut Bus, result: u8) {
        if self.do_fetch {
            bus.write(self.addr_abs, result);
        } else {
            self.regs.a = result;
        }
    }

    fn branch_if(&mut self, condition: bool) {
        if condition {
            // Branch taken; another cycle on a page cross.
            self.extra_cycles += 1;
            if (self.regs.pc & 0xFF00) != (self.addr_abs & 0xFF00) {
                self.extra_cycles += 1;
            }
            self.regs.pc = self.addr_abs;
        }
    }

    /// Software interrupt. The padding byte was consumed by immediate
    /// addressing; the handler advances once more before stacking.
    fn op_brk(&mut self, bus: &mut Bus) {
        self.regs.pc = self.regs.pc.wrapping_add(1);

        self.set_flag(Status::BREAK, true);

        let pc = self.regs.pc;
        self.push(bus, (pc >> 8) as u8);
        self.push(bus, (pc & 0x00FF) as u8);

        let p = self.regs.p | Status::UNUSED;
        self.push(bus, p.bits());
        self.set_flag(Status::BREAK, false);

        let lo = bus.read(VECTOR_IRQ) as u16;
        let hi = bus.read(VECTOR_IRQ + 1) as u16;
        self.regs.pc = (hi << 8) | lo;
    }

    fn op_rti(&mut self, bus: &mut Bus) {
        let p = self.pull(bus);
        self.restore_status(p);

        let lo = self.pull(bus) as u16;
        let hi = self.pull(bus) as u16;
        self.regs.pc = (hi << 8) | lo;
    }

    /// Restore P from a stacked copy. The observable B flag keeps its
    /// current value and U reads 1.
    fn restore_status(&mut self, stacked: u8) {
        let keep_break = self.flag(Status::BREAK);
        self.regs.p = Status::from_bits_truncate(stacked);
        self.set_flag(Status::BREAK, keep_break);
        self.set_flag(Status::UNUSED, true);
    }

    fn op_adc(&mut self, bus: &mut Bus) {
        if !self.flag(Status::DECIMAL) || !self.decimal_mode_available {
            let a = self.regs.a as u16;
            let value = self.fetch(bus) as u16;
            let carry = self.flag(Status::CARRY) as u16;
            let temp = a + value + carry;

            self.set_flag(Status::CARRY, temp & 0xFF00 != 0);
            self.set_flag(Status::ZERO, temp & 0x00FF == 0);
            self.set_flag(Status::OVERFLOW, (!(a ^ value) & (a ^ temp)) & 0x0080 != 0);
            self.set_flag(Status::NEGATIVE, temp & 0x0080 != 0);

            self.regs.a = (temp & 0x00FF) as u8;
        } else {
            let value = self.fetch(bus);
            let carry = self.flag(Status::CARRY) as u8;
            let temp = util::bcd_to_bin(self.regs.a) + util::bcd_to_bin(value) + carry;

            // Valid range 0-99, wrap on overflow.
            let result = if temp > 99 {
                util::bin_to_bcd(temp - 100)
            } else {
                util::bin_to_bcd(temp)
            };

            self.set_flag(Status::CARRY, temp > 99);
            self.set_flag(Status::ZERO, result == 0);
            self.set_flag(Status::NEGATIVE, result & 0x80 != 0);
            // Overflow has no well defined meaning in decimal mode.
            self.set_flag(Status::OVERFLOW, false);

            self.regs.a = result;
        }

        self.extra_cycles += 1;
    }

    fn op_sbc(&mut self, bus: &mut Bus) {
        if !self.flag(Status::DECIMAL) || !self.decimal_mode_available {
            let a = self.regs.a as u16;
            let value = self.fetch(bus) as u16 ^ 0x00FF;
            let carry = self.flag(Status::CARRY) as u16;
            let temp = a + value + carry;

            self.set_flag(Status::CARRY, temp & 0xFF00 != 0);
            self.set_flag(Status::ZERO, temp & 0x00FF == 0);
            self.set_flag(Status::OVERFLOW, (!(a ^ value) & (a ^ temp)) & 0x0080 != 0);
            self.set_flag(Status::NEGATIVE, temp & 0x0080 != 0);

            self.regs.a = (temp & 0x00FF) as u8;
        } else {
            let value = self.fetch(bus);
            let borrow = !self.flag(Status::CARRY) as i16;
            let temp =
                util::bcd_to_bin(self.regs.a) as i16 - util::bcd_to_bin(value) as i16 - borrow;

            let result = if temp < 0 {
                util::bin_to_bcd(((99 + temp) & 0xFF) as u8)
            } else {
                util::bin_to_bcd((temp & 0xFF) as u8)
            };

            self.set_flag(Status::CARRY, temp < 0);
            self.set_flag(Status::ZERO, result == 0);
            self.set_flag(Status::NEGATIVE, result & 0x80 != 0);
            self.set_flag(Status::OVERFLOW, false);

            self.regs.a = result;
        }

        self.extra_cycles += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{AddressRange, DeviceKind};
    use crate::memory::Ram;

    /// A bus backed by flat RAM over the whole address space, with the
    /// given program at `org` and the reset vector pointing at it.
    fn program_bus(org: u16, program: &[u8]) -> (Bus, Mos6502) {
        let mut bus = Bus::new();
        bus.attach(DeviceKind::Ram(Ram::new(
            AddressRange::new(0x0000, 0xFFFF).unwrap(),
        )))
        .unwrap();

        for (offset, byte) in program.iter().enumerate() {
            bus.write(org + offset as u16, *byte);
        }
        bus.write(VECTOR_RESET, (org & 0xFF) as u8);
        bus.write(VECTOR_RESET + 1, (org >> 8) as u8);

        let mut cpu = Mos6502::new();
        cpu.reset(&mut bus);
        (bus, cpu)
    }

    fn step_instruction(cpu: &mut Mos6502, bus: &mut Bus) {
        // First cycle executes, the rest burn the budget down.
        cpu.cycle(bus);
        while cpu.remaining_cycles > 0 {
            cpu.cycle(bus);
        }
    }

    #[test]
    fn test_opcode_table_is_complete() {
        for k in 0..=255u8 {
            assert_eq!(OPCODE_TABLE[k as usize].opcode, k);
        }
    }

    #[test]
    fn test_unassigned_slots_are_no_ops() {
        // Unofficial opcodes run as NOPs; an XXX row must never reach a
        // state-changing operation.
        for entry in OPCODE_TABLE.iter() {
            if entry.mnemonic == "XXX" {
                assert!(
                    matches!(entry.op, Op::Xxx | Op::Nop),
                    "opcode {:#04X} dispatches to {:?}",
                    entry.opcode,
                    entry.op
                );
            }
        }
    }

    #[test]
    fn test_reset_state() {
        let (_bus, cpu) = program_bus(0x1234, &[0xEA]);
        assert_eq!(cpu.regs.pc, 0x1234);
        assert_eq!(cpu.regs.a, 0);
        assert_eq!(cpu.regs.x, 0);
        assert_eq!(cpu.regs.y, 0);
        assert_eq!(cpu.regs.s, 0xFD);
        assert_eq!(cpu.regs.p.bits(), 0x24);
    }

    #[test]
    fn test_unused_flag_always_observed_set() {
        let (mut bus, mut cpu) = program_bus(
            0x8000,
            // CLC, SEC, CLV, PLP (pulls 0x00), PHP
            &[0x18, 0x38, 0xB8, 0x28, 0x08],
        );
        bus.write(0x01FE, 0x00); // value PLP will pull

        for _ in 0..5 {
            step_instruction(&mut cpu, &mut bus);
            assert!(cpu.regs.p.contains(Status::UNUSED));
        }
    }

    #[test]
    fn test_lda_immediate_flags() {
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xA9, 0x00, 0xA9, 0x80]);

        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0x00);
        assert!(cpu.regs.p.contains(Status::ZERO));

        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0x80);
        assert!(cpu.regs.p.contains(Status::NEGATIVE));
        assert!(!cpu.regs.p.contains(Status::ZERO));
    }

    #[test]
    fn test_adc_carry_and_overflow() {
        // A = 0x50, ADC #$50 -> A = 0xA0, N=1 V=1 C=0 Z=0.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xA9, 0x50, 0x69, 0x50]);
        step_instruction(&mut cpu, &mut bus);
        step_instruction(&mut cpu, &mut bus);

        assert_eq!(cpu.regs.a, 0xA0);
        assert!(cpu.regs.p.contains(Status::NEGATIVE));
        assert!(cpu.regs.p.contains(Status::OVERFLOW));
        assert!(!cpu.regs.p.contains(Status::CARRY));
        assert!(!cpu.regs.p.contains(Status::ZERO));
    }

    #[test]
    fn test_sbc_borrow() {
        // SEC; LDA #$10; SBC #$08 -> A = 0x08, C=1.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0x38, 0xA9, 0x10, 0xE9, 0x08]);
        for _ in 0..3 {
            step_instruction(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.regs.a, 0x08);
        assert!(cpu.regs.p.contains(Status::CARRY));
    }

    #[test]
    fn test_jmp_indirect_page_wrap_bug() {
        let (mut bus, mut cpu) = program_bus(0x8000, &[0x6C, 0xFF, 0x02]);
        bus.write(0x02FF, 0x34);
        bus.write(0x0300, 0xCD); // must NOT be used
        bus.write(0x0200, 0x12); // high byte comes from $0200

        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.pc, 0x1234);
    }

    #[test]
    fn test_stack_wraps_within_page_one() {
        // LDX #$00; TXS; PHA
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xA2, 0x00, 0x9A, 0xA9, 0x42, 0x48]);
        for _ in 0..4 {
            step_instruction(&mut cpu, &mut bus);
        }

        assert_eq!(bus.read(0x0100), 0x42);
        assert_eq!(cpu.regs.s, 0xFF);
    }

    #[test]
    fn test_branch_cycle_surcharges() {
        // BNE taken, no page cross: 3 cycles.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xD0, 0x02]);
        let before = cpu.cycle_count();
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.cycle_count() - before, 3);

        // BEQ not taken: 2 cycles.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xF0, 0x02]);
        let before = cpu.cycle_count();
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.cycle_count() - before, 2);

        // BNE taken across a page: 4 cycles.
        let (mut bus, mut cpu) = program_bus(0x80F0, &[0xD0, 0x7F]);
        let before = cpu.cycle_count();
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.cycle_count() - before, 4);
    }

    #[test]
    fn test_page_cross_surcharge_only_for_reads() {
        // LDA $80FF,X with X=1 crosses a page: 5 cycles.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xA2, 0x01, 0xBD, 0xFF, 0x80]);
        step_instruction(&mut cpu, &mut bus);
        let before = cpu.cycle_count();
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.cycle_count() - before, 5);

        // STA $80FF,X with X=1 crosses a page but stays at 5 cycles.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xA2, 0x01, 0x9D, 0xFF, 0x80]);
        step_instruction(&mut cpu, &mut bus);
        let before = cpu.cycle_count();
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.cycle_count() - before, 5);

        // LDA absolute,X without page cross: 4 cycles.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xA2, 0x01, 0xBD, 0x00, 0x20]);
        step_instruction(&mut cpu, &mut bus);
        let before = cpu.cycle_count();
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.cycle_count() - before, 4);
    }

    #[test]
    fn test_asl_accumulator_and_memory() {
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xA9, 0x81, 0x0A, 0x06, 0x10]);
        bus.write(0x0010, 0x40);

        step_instruction(&mut cpu, &mut bus);
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0x02);
        assert!(cpu.regs.p.contains(Status::CARRY));

        step_instruction(&mut cpu, &mut bus);
        assert_eq!(bus.read(0x0010), 0x80);
        assert!(!cpu.regs.p.contains(Status::CARRY));
        assert!(cpu.regs.p.contains(Status::NEGATIVE));
    }

    #[test]
    fn test_ror_rotates_carry_in() {
        // SEC; LDA #$02; ROR A -> A = 0x81, C = 0.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0x38, 0xA9, 0x02, 0x6A]);
        for _ in 0..3 {
            step_instruction(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.regs.a, 0x81);
        assert!(!cpu.regs.p.contains(Status::CARRY));
    }

    #[test]
    fn test_jsr_rts_round_trip() {
        // JSR $9000 ... at $9000: RTS. Next instruction resumes at $8003.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0x20, 0x00, 0x90, 0xA9, 0x55]);
        bus.write(0x9000, 0x60);

        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.pc, 0x9000);

        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.pc, 0x8003);

        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0x55);
    }

    #[test]
    fn test_irq_respects_interrupt_disable() {
        // CLI; NOP; NOP with an IRQ handler at $9000 storing marker.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0x58, 0xEA, 0xEA, 0xEA]);
        bus.write(VECTOR_IRQ, 0x00);
        bus.write(VECTOR_IRQ + 1, 0x90);

        // While I is set (reset state), a pending IRQ stays pending.
        cpu.on_signal(Signal::CpuIrq);
        step_instruction(&mut cpu, &mut bus); // CLI
        step_instruction(&mut cpu, &mut bus); // services the IRQ now
        assert_eq!(cpu.regs.pc, 0x9000);
        assert!(cpu.regs.p.contains(Status::INTERRUPT_DISABLE));
    }

    #[test]
    fn test_nmi_ignores_interrupt_disable() {
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xEA, 0xEA]);
        bus.write(VECTOR_NMI, 0x00);
        bus.write(VECTOR_NMI + 1, 0xA0);

        cpu.on_signal(Signal::CpuNmi);
        let before = cpu.cycle_count();
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.pc, 0xA000);
        assert_eq!(cpu.cycle_count() - before, 8);
    }

    #[test]
    fn test_halt_suppresses_progress() {
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xA9, 0x11]);
        cpu.on_signal(Signal::CpuHalt);
        for _ in 0..20 {
            cpu.cycle(&mut bus);
        }
        assert_eq!(cpu.regs.a, 0);
        assert_eq!(cpu.cycle_count(), 0);

        cpu.on_signal(Signal::CpuResume);
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0x11);
    }

    #[test]
    fn test_plp_preserves_observed_break() {
        // LDA #$FF; PHA; PLP -> P restored from 0xFF but B keeps its
        // current (clear) value and U stays set.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xA9, 0xFF, 0x48, 0x28]);
        for _ in 0..3 {
            step_instruction(&mut cpu, &mut bus);
        }
        assert!(!cpu.regs.p.contains(Status::BREAK));
        assert!(cpu.regs.p.contains(Status::UNUSED));
        assert!(cpu.regs.p.contains(Status::NEGATIVE));
    }

    #[test]
    fn test_decimal_mode_gated_by_hardware_latch() {
        // SED; LDA #$15; ADC #$27 -> BCD 0x42 when hardware present.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xF8, 0xA9, 0x15, 0x69, 0x27]);
        for _ in 0..3 {
            step_instruction(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.regs.a, 0x42);

        // Same program with the latch forced off adds in binary.
        let (mut bus, mut cpu) = program_bus(0x8000, &[0xF8, 0xA9, 0x15, 0x69, 0x27]);
        cpu.set_decimal_mode_available(false);
        for _ in 0..3 {
            step_instruction(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.regs.a, 0x3C);
    }
}
