//! Two-pass assembler.
//!
//! Pass 1 walks the source line by line, tracking the active section:
//! instructions collect as statements with their text offsets, data
//! directives emit bytes (label references become fixups), `.bss` only
//! advances a counter. Pass 2 assigns the configured section bases, patches
//! fixups, and decodes every statement into one [`Op`], pseudo-instructions
//! included, since unchecked 32-bit immediates let `li`/`la` stay single
//! μops.

use std::collections::HashMap;

use crate::common::{EmuError, LoadError, ParseError, Reg};
use crate::config::MemoryConfig;
use crate::isa::{AluOp, BranchCond, Ext, MemWidth, Op, Src2};

use super::lexer::{SpannedTok, Tok, lex_line};
use super::program::{Program, Section};

/// A parsed instruction argument.
#[derive(Clone, Debug, PartialEq)]
enum Arg {
    Reg(Reg),
    Int(i64),
    Label(String),
    /// `off(rm)` with either part optional.
    Mem { offset: i64, base: Reg },
    Str(String),
}

/// An instruction statement collected in pass 1.
struct Statement {
    line: usize,
    col: usize,
    mnemonic: String,
    args: Vec<Arg>,
}

/// A word/quad-sized label reference inside `.data`.
struct Fixup {
    offset: usize,
    label: String,
    size: usize,
}

/// Directives accepted and ignored for compiler compatibility.
const IGNORED_DIRECTIVES: &[&str] = &[
    ".file",
    ".globl",
    ".weak",
    ".local",
    ".ident",
    ".type",
    ".size",
    ".attribute",
    ".addrsig",
    ".addrsig_sym",
];

/// Assembles source text into a decoded [`Program`] laid out at the
/// configured section bases.
pub fn assemble(src: &str, mem: &MemoryConfig) -> Result<Program, EmuError> {
    let mut asm = Assembler::default();
    for (idx, line) in src.lines().enumerate() {
        asm.line(line, idx + 1)?;
    }
    asm.finish(mem)
}

#[derive(Default)]
struct Assembler {
    section: Section,
    text: Vec<Statement>,
    data: Vec<u8>,
    fixups: Vec<Fixup>,
    bss_len: u32,
    /// label → (section, offset within section)
    labels: HashMap<String, (Section, u32)>,
}

impl Assembler {
    /// Processes one source line.
    fn line(&mut self, line: &str, line_no: usize) -> Result<(), EmuError> {
        let toks = lex_line(line, line_no)?;
        let mut pos = 0;

        // Leading `name:` labels, possibly several.
        while let (Some(SpannedTok { tok: Tok::Ident(name), .. }), Some(SpannedTok { tok: Tok::Colon, .. })) =
            (toks.get(pos), toks.get(pos + 1))
        {
            self.define_label(name.clone())?;
            pos += 2;
        }

        let Some(head) = toks.get(pos) else {
            return Ok(());
        };
        let Tok::Ident(name) = &head.tok else {
            return Err(ParseError::new(line_no, head.col, "expected mnemonic or directive").into());
        };
        let name = name.clone();
        let col = head.col;
        let args = parse_args(&toks[pos + 1..], line_no)?;

        if name.starts_with('.') {
            self.directive(&name, &args, line_no, col)
        } else {
            if self.section != Section::Text {
                return Err(ParseError::new(
                    line_no,
                    col,
                    format!("instruction `{name}` outside .text"),
                )
                .into());
            }
            self.text.push(Statement {
                line: line_no,
                col,
                mnemonic: name,
                args,
            });
            Ok(())
        }
    }

    /// Defines a label at the current offset of the active section.
    fn define_label(&mut self, name: String) -> Result<(), EmuError> {
        let offset = match self.section {
            Section::Text => 4 * self.text.len() as u32,
            Section::Data => self.data.len() as u32,
            Section::Bss => self.bss_len,
        };
        if self
            .labels
            .insert(name.clone(), (self.section, offset))
            .is_some()
        {
            return Err(LoadError::DuplicateLabel(name).into());
        }
        Ok(())
    }

    /// Handles a directive.
    fn directive(
        &mut self,
        name: &str,
        args: &[Arg],
        line: usize,
        col: usize,
    ) -> Result<(), EmuError> {
        match name {
            ".text" => self.section = Section::Text,
            ".data" => self.section = Section::Data,
            ".bss" => self.section = Section::Bss,
            ".section" => {
                let target = match args.first() {
                    Some(Arg::Label(s)) => s.clone(),
                    Some(Arg::Str(s)) => s.clone(),
                    _ => {
                        return Err(
                            ParseError::new(line, col, ".section expects a section name").into()
                        );
                    }
                };
                self.section = match target.as_str() {
                    ".text" | "text" => Section::Text,
                    ".data" | "data" | ".rodata" | "rodata" => Section::Data,
                    ".bss" | "bss" => Section::Bss,
                    other => {
                        return Err(ParseError::new(
                            line,
                            col,
                            format!("unknown section `{other}`"),
                        )
                        .into());
                    }
                };
            }
            ".asciz" | ".string" => self.emit_strings(args, true, name, line, col)?,
            ".ascii" => self.emit_strings(args, false, name, line, col)?,
            ".byte" => self.emit_ints(args, 1, name, line, col)?,
            ".short" | ".half" | ".2byte" => self.emit_ints(args, 2, name, line, col)?,
            ".long" | ".word" | ".4byte" => self.emit_ints(args, 4, name, line, col)?,
            ".quad" | ".dword" | ".8byte" => self.emit_ints(args, 8, name, line, col)?,
            ".zero" => {
                let n = expect_int(args.first(), line, col)? as u32;
                match self.section {
                    Section::Text => {
                        return Err(self.bad_directive(name));
                    }
                    Section::Data => {
                        let target = self.data.len() + n as usize;
                        self.data.resize(target, 0);
                    }
                    Section::Bss => self.bss_len += n,
                }
            }
            ".comm" => {
                // `.comm name, size[, align]` always allocates in .bss.
                let Some(Arg::Label(sym)) = args.first() else {
                    return Err(ParseError::new(line, col, ".comm expects a symbol name").into());
                };
                let size = expect_int(args.get(1), line, col)? as u32;
                let align = match args.get(2) {
                    Some(&Arg::Int(a)) if a > 0 => a as u32,
                    _ => 4,
                };
                self.bss_len = align_up(self.bss_len, align);
                let offset = self.bss_len;
                if self
                    .labels
                    .insert(sym.clone(), (Section::Bss, offset))
                    .is_some()
                {
                    return Err(LoadError::DuplicateLabel(sym.clone()).into());
                }
                self.bss_len += size;
            }
            ".p2align" => {
                let n = expect_int(args.first(), line, col)?;
                let align = 1u32 << n.clamp(0, 20);
                self.align_to(align);
            }
            ".balign" => {
                let n = expect_int(args.first(), line, col)? as u32;
                self.align_to(n.max(1));
            }
            _ if IGNORED_DIRECTIVES.contains(&name) => {}
            _ => {
                return Err(
                    ParseError::new(line, col, format!("unknown directive `{name}`")).into(),
                );
            }
        }
        Ok(())
    }

    /// Aligns the active section to `align` bytes. Text pads with `nop`.
    fn align_to(&mut self, align: u32) {
        match self.section {
            Section::Text => {
                let align = align.max(4);
                while (4 * self.text.len() as u32) % align != 0 {
                    self.text.push(Statement {
                        line: 0,
                        col: 0,
                        mnemonic: "nop".into(),
                        args: Vec::new(),
                    });
                }
            }
            Section::Data => {
                let target = align_up(self.data.len() as u32, align);
                self.data.resize(target as usize, 0);
            }
            Section::Bss => self.bss_len = align_up(self.bss_len, align),
        }
    }

    /// Emits string directives into `.data`.
    fn emit_strings(
        &mut self,
        args: &[Arg],
        nul: bool,
        name: &str,
        line: usize,
        col: usize,
    ) -> Result<(), EmuError> {
        if self.section != Section::Data {
            return Err(self.bad_directive(name));
        }
        if args.is_empty() {
            return Err(ParseError::new(line, col, format!("{name} expects a string")).into());
        }
        for arg in args {
            let text = match arg {
                Arg::Str(s) => s.as_str(),
                Arg::Label(s) => s.as_str(),
                _ => {
                    return Err(
                        ParseError::new(line, col, format!("{name} expects a string")).into(),
                    );
                }
            };
            self.data.extend_from_slice(text.as_bytes());
            if nul {
                self.data.push(0);
            }
        }
        Ok(())
    }

    /// Emits integer data of the given element size into `.data`.
    fn emit_ints(
        &mut self,
        args: &[Arg],
        size: usize,
        name: &str,
        line: usize,
        col: usize,
    ) -> Result<(), EmuError> {
        if self.section != Section::Data {
            return Err(self.bad_directive(name));
        }
        for arg in args {
            match arg {
                Arg::Int(v) => {
                    let bytes = (*v as u64).to_le_bytes();
                    self.data.extend_from_slice(&bytes[..size]);
                }
                Arg::Label(l) => {
                    if size < 4 {
                        return Err(ParseError::new(
                            line,
                            col,
                            format!("label reference needs at least word width, got {name}"),
                        )
                        .into());
                    }
                    self.fixups.push(Fixup {
                        offset: self.data.len(),
                        label: l.clone(),
                        size,
                    });
                    let target = self.data.len() + size;
                    self.data.resize(target, 0);
                }
                _ => {
                    return Err(ParseError::new(
                        line,
                        col,
                        format!("{name} expects integers or labels"),
                    )
                    .into());
                }
            }
        }
        Ok(())
    }

    fn bad_directive(&self, name: &str) -> EmuError {
        LoadError::InvalidDirective {
            directive: name.to_string(),
            section: self.section.name().to_string(),
        }
        .into()
    }

    /// Pass 2: lay out sections, resolve labels, decode instructions.
    fn finish(self, mem: &MemoryConfig) -> Result<Program, EmuError> {
        if self.text.is_empty() {
            return Err(LoadError::EmptyText.into());
        }

        let text_base = mem.text_base;
        let data_base = mem.data_base;
        let bss_base = align_up(data_base + self.data.len() as u32, 4);

        let mut labels: HashMap<String, u32> = HashMap::new();
        for (name, (section, offset)) in &self.labels {
            let base = match section {
                Section::Text => text_base,
                Section::Data => data_base,
                Section::Bss => bss_base,
            };
            labels.insert(name.clone(), base + offset);
        }

        let mut data = self.data;
        for fixup in &self.fixups {
            let addr = *labels
                .get(&fixup.label)
                .ok_or_else(|| LoadError::UnresolvedLabel(fixup.label.clone()))?;
            let bytes = u64::from(addr).to_le_bytes();
            data[fixup.offset..fixup.offset + fixup.size].copy_from_slice(&bytes[..fixup.size]);
        }

        let mut ops = Vec::with_capacity(self.text.len());
        let mut lines = Vec::with_capacity(self.text.len());
        for stmt in &self.text {
            ops.push(decode(stmt, &labels)?);
            lines.push(stmt.line);
        }

        let entry = labels
            .get("_start")
            .or_else(|| labels.get("main"))
            .copied()
            .unwrap_or(text_base);

        Ok(Program {
            text_base,
            ops,
            lines,
            data_base,
            data,
            bss_base,
            bss_size: self.bss_len,
            labels,
            entry,
        })
    }
}

/// Extracts a required integer directive argument.
fn expect_int(arg: Option<&Arg>, line: usize, col: usize) -> Result<i64, ParseError> {
    match arg {
        Some(Arg::Int(v)) => Ok(*v),
        _ => Err(ParseError::new(line, col, "expected integer argument")),
    }
}

/// Rounds `value` up to a multiple of `align` (power of two not required).
fn align_up(value: u32, align: u32) -> u32 {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Parses the comma-separated argument list after a mnemonic.
fn parse_args(toks: &[SpannedTok], line: usize) -> Result<Vec<Arg>, ParseError> {
    let mut args = Vec::new();
    let mut i = 0;

    while i < toks.len() {
        let t = &toks[i];
        let arg = match &t.tok {
            Tok::Ident(name) => {
                i += 1;
                Reg::parse(name).map_or_else(|| Arg::Label(name.clone()), Arg::Reg)
            }
            Tok::Str(s) => {
                i += 1;
                Arg::Str(s.clone())
            }
            Tok::Int(v) => {
                i += 1;
                if matches!(toks.get(i).map(|t| &t.tok), Some(Tok::LParen)) {
                    let (base, next) = parse_paren_reg(toks, i, line)?;
                    i = next;
                    Arg::Mem { offset: *v, base }
                } else {
                    Arg::Int(*v)
                }
            }
            Tok::LParen => {
                let (base, next) = parse_paren_reg(toks, i, line)?;
                i = next;
                Arg::Mem { offset: 0, base }
            }
            _ => return Err(ParseError::new(line, t.col, "unexpected token in argument list")),
        };
        args.push(arg);

        match toks.get(i).map(|t| &t.tok) {
            Some(Tok::Comma) => i += 1,
            None => break,
            Some(_) => {
                return Err(ParseError::new(
                    line,
                    toks[i].col,
                    "expected `,` between arguments",
                ));
            }
        }
    }

    Ok(args)
}

/// Parses `( reg )` starting at the opening paren.
fn parse_paren_reg(
    toks: &[SpannedTok],
    open: usize,
    line: usize,
) -> Result<(Reg, usize), ParseError> {
    let col = toks[open].col;
    let reg = match toks.get(open + 1).map(|t| &t.tok) {
        Some(Tok::Ident(name)) => Reg::parse(name)
            .ok_or_else(|| ParseError::new(line, col, format!("`{name}` is not a register")))?,
        _ => return Err(ParseError::new(line, col, "expected register after `(`")),
    };
    match toks.get(open + 2).map(|t| &t.tok) {
        Some(Tok::RParen) => Ok((reg, open + 3)),
        _ => Err(ParseError::new(line, col, "expected `)` after register")),
    }
}

// ---------------------------------------------------------------------------
// Statement decoding
// ---------------------------------------------------------------------------

/// Decodes one statement into a μop, resolving label references.
fn decode(stmt: &Statement, labels: &HashMap<String, u32>) -> Result<Op, EmuError> {
    let d = Decoder { stmt, labels };
    d.decode()
}

struct Decoder<'a> {
    stmt: &'a Statement,
    labels: &'a HashMap<String, u32>,
}

impl Decoder<'_> {
    fn decode(&self) -> Result<Op, EmuError> {
        let m = self.stmt.mnemonic.as_str();

        if let Some(op) = alu_rrr(m) {
            let (rd, rs1, rs2) = (self.reg(0)?, self.reg(1)?, self.reg(2)?);
            self.arity(3)?;
            return Ok(Op::Alu {
                op,
                rd,
                rs1,
                src2: Src2::Reg(rs2),
            });
        }
        if let Some(op) = alu_rri(m) {
            let (rd, rs1, imm) = (self.reg(0)?, self.reg(1)?, self.imm(2)?);
            self.arity(3)?;
            return Ok(Op::Alu {
                op,
                rd,
                rs1,
                src2: Src2::Imm(imm),
            });
        }
        if let Some((width, ext)) = load_width(m) {
            let rd = self.reg(0)?;
            let (offset, base) = self.mem(1)?;
            self.arity(2)?;
            return Ok(Op::Load {
                rd,
                base,
                offset,
                width,
                ext,
            });
        }
        if let Some(width) = store_width(m) {
            let src = self.reg(0)?;
            let (offset, base) = self.mem(1)?;
            self.arity(2)?;
            return Ok(Op::Store {
                src,
                base,
                offset,
                width,
            });
        }
        if let Some(cond) = branch_cond(m) {
            let (rs1, rs2, target) = (self.reg(0)?, self.reg(1)?, self.target(2)?);
            self.arity(3)?;
            return Ok(Op::Branch {
                cond,
                rs1,
                rs2,
                target,
            });
        }

        match m {
            "lui" | "auipc" => {
                let (rd, imm) = (self.reg(0)?, self.imm(1)?);
                self.arity(2)?;
                let imm = imm.wrapping_shl(12);
                Ok(if m == "lui" {
                    Op::Lui { rd, imm }
                } else {
                    Op::Auipc { rd, imm }
                })
            }
            "jal" => match self.stmt.args.len() {
                1 => Ok(Op::Jal {
                    rd: Reg::RA,
                    target: self.target(0)?,
                }),
                _ => {
                    let (rd, target) = (self.reg(0)?, self.target(1)?);
                    self.arity(2)?;
                    Ok(Op::Jal { rd, target })
                }
            },
            "jalr" => match self.stmt.args.len() {
                1 => {
                    let (offset, base) = self.mem(0)?;
                    Ok(Op::Jalr {
                        rd: Reg::RA,
                        base,
                        offset,
                    })
                }
                2 => {
                    let rd = self.reg(0)?;
                    let (offset, base) = self.mem(1)?;
                    Ok(Op::Jalr { rd, base, offset })
                }
                _ => {
                    let (rd, base, offset) = (self.reg(0)?, self.reg(1)?, self.imm(2)?);
                    self.arity(3)?;
                    Ok(Op::Jalr { rd, base, offset })
                }
            },
            "rdcycle" => {
                let rd = self.reg(0)?;
                self.arity(1)?;
                Ok(Op::RdCycle { rd })
            }
            "fence.i" => {
                self.arity(0)?;
                Ok(Op::FenceI)
            }
            "ecall" => {
                self.arity(0)?;
                Ok(Op::Ecall)
            }
            "ebreak" => {
                self.arity(0)?;
                Ok(Op::Ebreak)
            }
            "cbo.flush" => {
                let (offset, base) = self.mem(0)?;
                self.arity(1)?;
                Ok(Op::CboFlush { base, offset })
            }
            "x.flushall" | "th.dcache.ciall" => {
                self.arity(0)?;
                Ok(Op::FlushAll)
            }

            // Pseudo-instructions, normalized to single μops.
            "nop" => {
                self.arity(0)?;
                Ok(alu_imm(AluOp::Add, Reg::ZERO, Reg::ZERO, 0))
            }
            "li" | "la" => {
                let (rd, imm) = (self.reg(0)?, self.imm(1)?);
                self.arity(2)?;
                Ok(alu_imm(AluOp::Add, rd, Reg::ZERO, imm))
            }
            "mv" => {
                let (rd, rs) = (self.reg(0)?, self.reg(1)?);
                self.arity(2)?;
                Ok(alu_imm(AluOp::Add, rd, rs, 0))
            }
            "not" => {
                let (rd, rs) = (self.reg(0)?, self.reg(1)?);
                self.arity(2)?;
                Ok(alu_imm(AluOp::Xor, rd, rs, -1))
            }
            "neg" => {
                let (rd, rs) = (self.reg(0)?, self.reg(1)?);
                self.arity(2)?;
                Ok(Op::Alu {
                    op: AluOp::Sub,
                    rd,
                    rs1: Reg::ZERO,
                    src2: Src2::Reg(rs),
                })
            }
            "seqz" => {
                let (rd, rs) = (self.reg(0)?, self.reg(1)?);
                self.arity(2)?;
                Ok(alu_imm(AluOp::Sltu, rd, rs, 1))
            }
            "snez" => {
                let (rd, rs) = (self.reg(0)?, self.reg(1)?);
                self.arity(2)?;
                Ok(Op::Alu {
                    op: AluOp::Sltu,
                    rd,
                    rs1: Reg::ZERO,
                    src2: Src2::Reg(rs),
                })
            }
            "sltz" => {
                let (rd, rs) = (self.reg(0)?, self.reg(1)?);
                self.arity(2)?;
                Ok(Op::Alu {
                    op: AluOp::Slt,
                    rd,
                    rs1: rs,
                    src2: Src2::Reg(Reg::ZERO),
                })
            }
            "sgtz" => {
                let (rd, rs) = (self.reg(0)?, self.reg(1)?);
                self.arity(2)?;
                Ok(Op::Alu {
                    op: AluOp::Slt,
                    rd,
                    rs1: Reg::ZERO,
                    src2: Src2::Reg(rs),
                })
            }
            "beqz" | "bnez" | "blez" | "bgez" | "bltz" | "bgtz" => {
                let (rs, target) = (self.reg(0)?, self.target(1)?);
                self.arity(2)?;
                let (cond, rs1, rs2) = match m {
                    "beqz" => (BranchCond::Eq, rs, Reg::ZERO),
                    "bnez" => (BranchCond::Ne, rs, Reg::ZERO),
                    "blez" => (BranchCond::Ge, Reg::ZERO, rs),
                    "bgez" => (BranchCond::Ge, rs, Reg::ZERO),
                    "bltz" => (BranchCond::Lt, rs, Reg::ZERO),
                    _ => (BranchCond::Lt, Reg::ZERO, rs),
                };
                Ok(Op::Branch {
                    cond,
                    rs1,
                    rs2,
                    target,
                })
            }
            "bgt" | "ble" | "bgtu" | "bleu" => {
                // Swapped-operand aliases of blt/bge.
                let (a, b, target) = (self.reg(0)?, self.reg(1)?, self.target(2)?);
                self.arity(3)?;
                let cond = match m {
                    "bgt" => BranchCond::Lt,
                    "ble" => BranchCond::Ge,
                    "bgtu" => BranchCond::Ltu,
                    _ => BranchCond::Geu,
                };
                Ok(Op::Branch {
                    cond,
                    rs1: b,
                    rs2: a,
                    target,
                })
            }
            "j" => {
                let target = self.target(0)?;
                self.arity(1)?;
                Ok(Op::Jal {
                    rd: Reg::ZERO,
                    target,
                })
            }
            "jr" => {
                let (offset, base) = self.mem(0)?;
                self.arity(1)?;
                Ok(Op::Jalr {
                    rd: Reg::ZERO,
                    base,
                    offset,
                })
            }
            "ret" => {
                self.arity(0)?;
                Ok(Op::Jalr {
                    rd: Reg::ZERO,
                    base: Reg::RA,
                    offset: 0,
                })
            }
            "call" => {
                let target = self.target(0)?;
                self.arity(1)?;
                Ok(Op::Jal {
                    rd: Reg::RA,
                    target,
                })
            }

            other => Err(self.error(format!("unknown instruction `{other}`")).into()),
        }
    }

    fn error(&self, msg: String) -> ParseError {
        ParseError::new(self.stmt.line, self.stmt.col, msg)
    }

    fn arg(&self, idx: usize) -> Result<&Arg, ParseError> {
        self.stmt
            .args
            .get(idx)
            .ok_or_else(|| self.error(format!("missing operand {}", idx + 1)))
    }

    fn arity(&self, n: usize) -> Result<(), ParseError> {
        if self.stmt.args.len() == n {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {n} operands, found {}",
                self.stmt.args.len()
            )))
        }
    }

    fn reg(&self, idx: usize) -> Result<Reg, ParseError> {
        match self.arg(idx)? {
            Arg::Reg(r) => Ok(*r),
            other => Err(self.error(format!("expected register, found {other:?}"))),
        }
    }

    /// A 32-bit immediate: integer literal or label address.
    fn imm(&self, idx: usize) -> Result<i32, ParseError> {
        match self.arg(idx)? {
            Arg::Int(v) => self.narrow(*v),
            Arg::Label(name) => self.resolve(name).map(|a| a as i32),
            other => Err(self.error(format!("expected immediate, found {other:?}"))),
        }
    }

    /// A branch/jump target: label or absolute address.
    fn target(&self, idx: usize) -> Result<u32, ParseError> {
        match self.arg(idx)? {
            Arg::Int(v) => self.narrow(*v).map(|v| v as u32),
            Arg::Label(name) => self.resolve(name),
            other => Err(self.error(format!("expected branch target, found {other:?}"))),
        }
    }

    /// A memory operand: `off(rm)`, `(rm)`, bare register, bare offset, or
    /// bare label (absolute address with base `x0`).
    fn mem(&self, idx: usize) -> Result<(i32, Reg), ParseError> {
        match self.arg(idx)? {
            Arg::Mem { offset, base } => Ok((self.narrow(*offset)?, *base)),
            Arg::Reg(r) => Ok((0, *r)),
            Arg::Int(v) => Ok((self.narrow(*v)?, Reg::ZERO)),
            Arg::Label(name) => Ok((self.resolve(name)? as i32, Reg::ZERO)),
            other => Err(self.error(format!("expected memory operand, found {other:?}"))),
        }
    }

    fn resolve(&self, name: &str) -> Result<u32, ParseError> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| self.error(format!("unresolved label `{name}`")))
    }

    /// Checks that a literal fits in 32 bits (signed or unsigned view) and
    /// returns its 32-bit pattern. This is the only immediate range check.
    fn narrow(&self, v: i64) -> Result<i32, ParseError> {
        if v < i64::from(i32::MIN) || v > i64::from(u32::MAX) {
            return Err(self.error(format!("immediate {v} does not fit in 32 bits")));
        }
        Ok(v as i32)
    }
}

fn alu_imm(op: AluOp, rd: Reg, rs1: Reg, imm: i32) -> Op {
    Op::Alu {
        op,
        rd,
        rs1,
        src2: Src2::Imm(imm),
    }
}

fn alu_rrr(m: &str) -> Option<AluOp> {
    Some(match m {
        "add" => AluOp::Add,
        "sub" => AluOp::Sub,
        "sll" => AluOp::Sll,
        "slt" => AluOp::Slt,
        "sltu" => AluOp::Sltu,
        "xor" => AluOp::Xor,
        "srl" => AluOp::Srl,
        "sra" => AluOp::Sra,
        "or" => AluOp::Or,
        "and" => AluOp::And,
        "mul" => AluOp::Mul,
        "mulh" => AluOp::Mulh,
        "mulhsu" => AluOp::Mulhsu,
        "mulhu" => AluOp::Mulhu,
        "div" => AluOp::Div,
        "divu" => AluOp::Divu,
        "rem" => AluOp::Rem,
        "remu" => AluOp::Remu,
        _ => return None,
    })
}

fn alu_rri(m: &str) -> Option<AluOp> {
    Some(match m {
        "addi" => AluOp::Add,
        "slti" => AluOp::Slt,
        "sltiu" => AluOp::Sltu,
        "xori" => AluOp::Xor,
        "ori" => AluOp::Or,
        "andi" => AluOp::And,
        "slli" => AluOp::Sll,
        "srli" => AluOp::Srl,
        "srai" => AluOp::Sra,
        _ => return None,
    })
}

fn load_width(m: &str) -> Option<(MemWidth, Ext)> {
    Some(match m {
        "lb" => (MemWidth::Byte, Ext::Sign),
        "lbu" => (MemWidth::Byte, Ext::Zero),
        "lh" => (MemWidth::Half, Ext::Sign),
        "lhu" => (MemWidth::Half, Ext::Zero),
        "lw" => (MemWidth::Word, Ext::Sign),
        _ => return None,
    })
}

fn store_width(m: &str) -> Option<MemWidth> {
    Some(match m {
        "sb" => MemWidth::Byte,
        "sh" => MemWidth::Half,
        "sw" => MemWidth::Word,
        _ => return None,
    })
}

fn branch_cond(m: &str) -> Option<BranchCond> {
    Some(match m {
        "beq" => BranchCond::Eq,
        "bne" => BranchCond::Ne,
        "blt" => BranchCond::Lt,
        "bge" => BranchCond::Ge,
        "bltu" => BranchCond::Ltu,
        "bgeu" => BranchCond::Geu,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn asm(src: &str) -> Program {
        assemble(src, &MemoryConfig::default()).unwrap()
    }

    #[test]
    fn test_basic_program() {
        let p = asm("
_start:
    li a0, 5
    addi a0, a0, 1
loop:
    j loop
");
        assert_eq!(p.ops.len(), 3);
        assert_eq!(p.entry, p.text_base);
        assert_eq!(p.label("loop"), Some(p.text_base + 8));
        assert_eq!(p.label_at(p.text_base + 8), Some("loop"));
        assert_eq!(p.label_at(p.text_base + 4), None);
        assert_eq!(
            p.ops[2],
            Op::Jal {
                rd: Reg::ZERO,
                target: p.text_base + 8
            }
        );
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let err = assemble("a:\nnop\na:\nnop\n", &MemoryConfig::default());
        assert!(matches!(
            err,
            Err(EmuError::Load(LoadError::DuplicateLabel(_)))
        ));
    }

    #[test]
    fn test_unresolved_label_rejected() {
        let err = assemble("j nowhere\n", &MemoryConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_data_layout() {
        let p = asm("
.data
msg: .asciz \"hi\"
.p2align 2
val: .word 0x11223344
ptr: .word msg
.bss
buf: .zero 16
.text
main: nop
");
        assert_eq!(&p.data[0..3], b"hi\0");
        // Aligned to 4 after the 3-byte string.
        assert_eq!(p.label("val"), Some(p.data_base + 4));
        assert_eq!(&p.data[4..8], &0x1122_3344u32.to_le_bytes());
        // Pointer fixup holds msg's absolute address.
        assert_eq!(&p.data[8..12], &p.data_base.to_le_bytes());
        assert_eq!(p.label("buf"), Some(p.bss_base));
        assert_eq!(p.bss_size, 16);
    }

    #[test]
    fn test_comm_allocates_in_bss() {
        let p = asm("
.comm scratch, 32, 8
.text
main: nop
");
        assert_eq!(p.label("scratch"), Some(p.bss_base));
        assert_eq!(p.bss_size, 32);
    }

    #[test]
    fn test_instruction_outside_text_rejected() {
        let err = assemble(".data\nnop\n", &MemoryConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_word_directive_in_bss_rejected() {
        let err = assemble(".bss\n.word 1\n.text\nnop\n", &MemoryConfig::default());
        assert!(matches!(
            err,
            Err(EmuError::Load(LoadError::InvalidDirective { .. }))
        ));
    }

    #[test]
    fn test_unknown_directive_rejected() {
        let err = assemble(".bogus 1\n.text\nnop\n", &MemoryConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_ignored_directives() {
        let p = asm("
.globl main
.type main, @function
.text
main: nop
");
        assert_eq!(p.ops.len(), 1);
    }

    #[test]
    fn test_memory_operand_forms() {
        let p = asm("
.data
word: .word 7
.text
main:
    lw a0, 8(sp)
    lw a1, (sp)
    lw a2, word
    sw a0, -4(sp)
");
        assert_eq!(
            p.ops[0],
            Op::Load {
                rd: Reg(10),
                base: Reg::SP,
                offset: 8,
                width: MemWidth::Word,
                ext: Ext::Sign
            }
        );
        assert_eq!(
            p.ops[1],
            Op::Load {
                rd: Reg(11),
                base: Reg::SP,
                offset: 0,
                width: MemWidth::Word,
                ext: Ext::Sign
            }
        );
        assert_eq!(
            p.ops[2],
            Op::Load {
                rd: Reg(12),
                base: Reg::ZERO,
                offset: p.data_base as i32,
                width: MemWidth::Word,
                ext: Ext::Sign
            }
        );
    }

    #[test]
    fn test_pseudo_expansion() {
        let p = asm("
main:
    nop
    mv a0, a1
    not a2, a3
    neg a4, a5
    seqz a6, a7
    ret
    call main
");
        assert_eq!(p.ops[1], alu_imm(AluOp::Add, Reg(10), Reg(11), 0));
        assert_eq!(p.ops[2], alu_imm(AluOp::Xor, Reg(12), Reg(13), -1));
        assert!(p.ops[5].is_ret());
        assert!(p.ops[6].is_call());
    }

    #[test]
    fn test_li_single_uop_any_imm() {
        // Unchecked 32-bit immediates: li never splits into lui+addi.
        let p = asm("main: li t0, 0xDEADBEEF\n");
        assert_eq!(p.ops.len(), 1);
        assert_eq!(
            p.ops[0],
            alu_imm(AluOp::Add, Reg(5), Reg::ZERO, 0xDEAD_BEEFu32 as i32)
        );
        let err = assemble("main: li t0, 0x1DEADBEEF\n", &MemoryConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_branch_swapped_aliases() {
        let p = asm("
main:
    bgt a0, a1, main
    bleu a2, a3, main
");
        assert_eq!(
            p.ops[0],
            Op::Branch {
                cond: BranchCond::Lt,
                rs1: Reg(11),
                rs2: Reg(10),
                target: p.text_base
            }
        );
        assert_eq!(
            p.ops[1],
            Op::Branch {
                cond: BranchCond::Geu,
                rs1: Reg(13),
                rs2: Reg(12),
                target: p.text_base
            }
        );
    }

    #[test]
    fn test_assemble_disassemble_round_trip() {
        let src = "
main:
    addi t0, t1, 10
    sub a0, a1, a2
    lw a0, -4(sp)
    sb a0, 8(sp)
    beq a0, a1, main
    jal ra, main
    jalr ra, 8(t0)
    rdcycle a0
    fence.i
    ecall
    ebreak
    cbo.flush 0(a0)
    x.flushall
";
        let p = asm(src);
        let printed: String = p
            .ops
            .iter()
            .map(|op| format!("    {op}\n"))
            .collect();
        let reparsed = asm(&format!("main:\n{printed}"));
        assert_eq!(p.ops, reparsed.ops);
    }

    #[test]
    fn test_entry_prefers_start() {
        let p = asm("
main: nop
_start: nop
");
        assert_eq!(p.entry, p.text_base + 4);
    }
}
