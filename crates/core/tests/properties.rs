//! Property: for branch-free programs, the out-of-order engine's
//! architectural state after `exit` equals a straight in-order
//! interpretation, whatever mix of ALU work, stores, and loads (and thus
//! forwarding and memory speculation) the program contains.

mod common;

use proptest::prelude::*;

use common::{exit_code, run};
use teem_core::Config;
use teem_core::isa::{AluOp, Ext, MemWidth};
use teem_core::mem::Memory;
use teem_core::units::alu;

/// Registers the generator draws from (never `x0`).
const REGS: [&str; 9] = ["t0", "t1", "t2", "s2", "s3", "s4", "s5", "s6", "s7"];
const REG_IDX: [usize; 9] = [5, 6, 7, 18, 19, 20, 21, 22, 23];

const ALU3: [(AluOp, &str); 17] = [
    (AluOp::Add, "add"),
    (AluOp::Sub, "sub"),
    (AluOp::Sll, "sll"),
    (AluOp::Slt, "slt"),
    (AluOp::Sltu, "sltu"),
    (AluOp::Xor, "xor"),
    (AluOp::Srl, "srl"),
    (AluOp::Sra, "sra"),
    (AluOp::Or, "or"),
    (AluOp::And, "and"),
    (AluOp::Mul, "mul"),
    (AluOp::Mulh, "mulh"),
    (AluOp::Mulhu, "mulhu"),
    (AluOp::Div, "div"),
    (AluOp::Divu, "divu"),
    (AluOp::Rem, "rem"),
    (AluOp::Remu, "remu"),
];

const ALUI: [(AluOp, &str); 9] = [
    (AluOp::Add, "addi"),
    (AluOp::Slt, "slti"),
    (AluOp::Sltu, "sltiu"),
    (AluOp::Xor, "xori"),
    (AluOp::Or, "ori"),
    (AluOp::And, "andi"),
    (AluOp::Sll, "slli"),
    (AluOp::Srl, "srli"),
    (AluOp::Sra, "srai"),
];

const STORES: [(MemWidth, &str); 3] = [
    (MemWidth::Byte, "sb"),
    (MemWidth::Half, "sh"),
    (MemWidth::Word, "sw"),
];

const LOADS: [(MemWidth, Ext, &str); 5] = [
    (MemWidth::Byte, Ext::Sign, "lb"),
    (MemWidth::Byte, Ext::Zero, "lbu"),
    (MemWidth::Half, Ext::Sign, "lh"),
    (MemWidth::Half, Ext::Zero, "lhu"),
    (MemWidth::Word, Ext::Sign, "lw"),
];

#[derive(Clone, Debug)]
enum Inst {
    Alu(usize, usize, usize, usize),
    AluImm(usize, usize, usize, i32),
    Store(usize, usize, u32),
    Load(usize, usize, u32),
}

fn inst_strategy() -> impl Strategy<Value = Inst> {
    prop_oneof![
        (0..ALU3.len(), 0..REGS.len(), 0..REGS.len(), 0..REGS.len())
            .prop_map(|(op, rd, rs1, rs2)| Inst::Alu(op, rd, rs1, rs2)),
        (0..ALUI.len(), 0..REGS.len(), 0..REGS.len(), any::<i32>())
            .prop_map(|(op, rd, rs1, imm)| Inst::AluImm(op, rd, rs1, imm)),
        (0..STORES.len(), 0..REGS.len(), 0..248u32)
            .prop_map(|(w, src, off)| Inst::Store(w, src, off)),
        (0..LOADS.len(), 0..REGS.len(), 0..248u32)
            .prop_map(|(w, rd, off)| Inst::Load(w, rd, off)),
    ]
}

/// Renders the generated program; `s11` holds the scratch buffer base.
fn render(seeds: &[i32; 9], insts: &[Inst]) -> String {
    let mut src = String::from("    .bss\nbuf: .zero 256\n    .text\n_start:\n    la s11, buf\n");
    for (i, seed) in seeds.iter().enumerate() {
        src.push_str(&format!("    li {}, {}\n", REGS[i], seed));
    }
    for inst in insts {
        match *inst {
            Inst::Alu(op, rd, rs1, rs2) => src.push_str(&format!(
                "    {} {}, {}, {}\n",
                ALU3[op].1, REGS[rd], REGS[rs1], REGS[rs2]
            )),
            Inst::AluImm(op, rd, rs1, imm) => src.push_str(&format!(
                "    {} {}, {}, {}\n",
                ALUI[op].1, REGS[rd], REGS[rs1], imm
            )),
            Inst::Store(w, rs, off) => {
                src.push_str(&format!("    {} {}, {}(s11)\n", STORES[w].1, REGS[rs], off));
            }
            Inst::Load(w, rd, off) => {
                src.push_str(&format!("    {} {}, {}(s11)\n", LOADS[w].2, REGS[rd], off));
            }
        }
    }
    src.push_str("    li a0, 0\n    li a7, -1\n    ecall\n");
    src
}

/// Straight in-order interpretation over the same primitives.
fn interpret(seeds: &[i32; 9], insts: &[Inst], buf: u32) -> ([u32; 32], Memory) {
    let layout = Config::default().memory;
    let mut regs = [0u32; 32];
    let mut mem = Memory::new(layout.limit, layout.guard);
    for (i, seed) in seeds.iter().enumerate() {
        regs[REG_IDX[i]] = *seed as u32;
    }
    for inst in insts {
        match *inst {
            Inst::Alu(op, rd, rs1, rs2) => {
                regs[REG_IDX[rd]] =
                    alu::execute(ALU3[op].0, regs[REG_IDX[rs1]], regs[REG_IDX[rs2]]);
            }
            Inst::AluImm(op, rd, rs1, imm) => {
                regs[REG_IDX[rd]] = alu::execute(ALUI[op].0, regs[REG_IDX[rs1]], imm as u32);
            }
            Inst::Store(w, rs, off) => {
                mem.store(buf + off, STORES[w].0, regs[REG_IDX[rs]])
                    .expect("reference store in range");
            }
            Inst::Load(w, rd, off) => {
                let (width, ext, _) = LOADS[w];
                regs[REG_IDX[rd]] = mem.load(buf + off, width, ext).expect("reference load");
            }
        }
    }
    (regs, mem)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn branch_free_programs_match_in_order_interpretation(
        seeds in proptest::array::uniform9(any::<i32>()),
        insts in proptest::collection::vec(inst_strategy(), 1..60),
    ) {
        let src = render(&seeds, &insts);
        let (emu, _, state) = run(&src);
        prop_assert_eq!(exit_code(state), 0);

        let buf = emu.program().label("buf").expect("buffer label");
        let (ref_regs, ref_mem) = interpret(&seeds, &insts, buf);

        for idx in REG_IDX {
            prop_assert_eq!(
                emu.core().read_reg(idx),
                ref_regs[idx],
                "register x{} diverged",
                idx
            );
        }
        let got = emu.core().mem.read_bytes(buf, 256).expect("buffer readable");
        let want = ref_mem.read_bytes(buf, 256).expect("buffer readable");
        prop_assert_eq!(got, want, "scratch buffer diverged");
    }
}
