//! Canonical textual form of decoded μops.
//!
//! Used by tracing, the REPL `show rob` view, and test diagnostics. The
//! output is re-parseable: registers print as ABI names and resolved
//! branch/jump targets print as hex addresses, both of which the assembler
//! accepts. Pseudo-instructions are normalized away at parse time, so the
//! printed form is the canonical alias.

use std::fmt;

use super::{AluOp, BranchCond, Ext, MemWidth, Op, Src2};

impl AluOp {
    /// Mnemonic of the register-register form.
    fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Sll => "sll",
            Self::Slt => "slt",
            Self::Sltu => "sltu",
            Self::Xor => "xor",
            Self::Srl => "srl",
            Self::Sra => "sra",
            Self::Or => "or",
            Self::And => "and",
            Self::Mul => "mul",
            Self::Mulh => "mulh",
            Self::Mulhsu => "mulhsu",
            Self::Mulhu => "mulhu",
            Self::Div => "div",
            Self::Divu => "divu",
            Self::Rem => "rem",
            Self::Remu => "remu",
        }
    }

    /// Mnemonic of the immediate form, if the ISA has one.
    fn imm_mnemonic(self) -> Option<&'static str> {
        match self {
            Self::Add => Some("addi"),
            Self::Sll => Some("slli"),
            Self::Slt => Some("slti"),
            Self::Sltu => Some("sltiu"),
            Self::Xor => Some("xori"),
            Self::Srl => Some("srli"),
            Self::Sra => Some("srai"),
            Self::Or => Some("ori"),
            Self::And => Some("andi"),
            _ => None,
        }
    }
}

impl fmt::Display for BranchCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "beq",
            Self::Ne => "bne",
            Self::Lt => "blt",
            Self::Ge => "bge",
            Self::Ltu => "bltu",
            Self::Geu => "bgeu",
        })
    }
}

/// Load mnemonic for a width/extension pair.
fn load_mnemonic(width: MemWidth, ext: Ext) -> &'static str {
    match (width, ext) {
        (MemWidth::Byte, Ext::Sign) => "lb",
        (MemWidth::Byte, Ext::Zero) => "lbu",
        (MemWidth::Half, Ext::Sign) => "lh",
        (MemWidth::Half, Ext::Zero) => "lhu",
        (MemWidth::Word, _) => "lw",
    }
}

/// Store mnemonic for a width.
fn store_mnemonic(width: MemWidth) -> &'static str {
    match width {
        MemWidth::Byte => "sb",
        MemWidth::Half => "sh",
        MemWidth::Word => "sw",
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Alu { op, rd, rs1, src2 } => match src2 {
                Src2::Reg(rs2) => write!(f, "{} {rd}, {rs1}, {rs2}", op.mnemonic()),
                Src2::Imm(imm) => match op.imm_mnemonic() {
                    Some(m) => write!(f, "{m} {rd}, {rs1}, {imm}"),
                    // M-extension ops have no immediate encoding; this form
                    // only arises from pseudo-instruction expansion.
                    None => write!(f, "{} {rd}, {rs1}, {imm}", op.mnemonic()),
                },
            },
            Self::Lui { rd, imm } => write!(f, "lui {rd}, {}", (imm as u32) >> 12),
            Self::Auipc { rd, imm } => write!(f, "auipc {rd}, {}", (imm as u32) >> 12),
            Self::Load {
                rd,
                base,
                offset,
                width,
                ext,
            } => write!(f, "{} {rd}, {offset}({base})", load_mnemonic(width, ext)),
            Self::Store {
                src,
                base,
                offset,
                width,
            } => write!(f, "{} {src}, {offset}({base})", store_mnemonic(width)),
            Self::Branch {
                cond,
                rs1,
                rs2,
                target,
            } => write!(f, "{cond} {rs1}, {rs2}, {target:#x}"),
            Self::Jal { rd, target } => write!(f, "jal {rd}, {target:#x}"),
            Self::Jalr { rd, base, offset } => write!(f, "jalr {rd}, {offset}({base})"),
            Self::RdCycle { rd } => write!(f, "rdcycle {rd}"),
            Self::FenceI => f.write_str("fence.i"),
            Self::Ecall => f.write_str("ecall"),
            Self::Ebreak => f.write_str("ebreak"),
            Self::CboFlush { base, offset } => write!(f, "cbo.flush {offset}({base})"),
            Self::FlushAll => f.write_str("x.flushall"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Reg;

    #[test]
    fn test_alu_forms() {
        let op = Op::Alu {
            op: AluOp::Add,
            rd: Reg(5),
            rs1: Reg(6),
            src2: Src2::Imm(10),
        };
        assert_eq!(op.to_string(), "addi t0, t1, 10");

        let op = Op::Alu {
            op: AluOp::Sub,
            rd: Reg(10),
            rs1: Reg(11),
            src2: Src2::Reg(Reg(12)),
        };
        assert_eq!(op.to_string(), "sub a0, a1, a2");
    }

    #[test]
    fn test_memory_forms() {
        let op = Op::Load {
            rd: Reg(10),
            base: Reg(2),
            offset: -4,
            width: MemWidth::Word,
            ext: Ext::Sign,
        };
        assert_eq!(op.to_string(), "lw a0, -4(sp)");

        let op = Op::Store {
            src: Reg(10),
            base: Reg(2),
            offset: 8,
            width: MemWidth::Byte,
        };
        assert_eq!(op.to_string(), "sb a0, 8(sp)");
    }

    #[test]
    fn test_control_forms() {
        let op = Op::Branch {
            cond: BranchCond::Eq,
            rs1: Reg(10),
            rs2: Reg(11),
            target: 0x0040_0010,
        };
        assert_eq!(op.to_string(), "beq a0, a1, 0x400010");
        assert_eq!(Op::FlushAll.to_string(), "x.flushall");
    }
}
