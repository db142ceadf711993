//! Line lexer for the assembly dialect.
//!
//! Each source line lexes independently into a small token stream. Comments
//! start with `#` or `//` and run to end of line; both are ignored inside
//! string literals. Identifiers may contain dots (`fence.i`, `.word`,
//! compiler-local labels like `.L0`); the parser decides from context
//! whether an identifier is a label, mnemonic, or directive.

use crate::common::ParseError;

/// A lexed token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tok {
    /// Identifier: mnemonic, directive, register, or label name.
    Ident(String),
    /// Integer literal (decimal or `0x` hex, optionally negative).
    Int(i64),
    /// Quoted string literal with escapes applied.
    Str(String),
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `(`
    LParen,
    /// `)`
    RParen,
}

/// A token with its source column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpannedTok {
    /// The token.
    pub tok: Tok,
    /// 1-based column of the first character.
    pub col: usize,
}

/// True for characters that may start an identifier.
fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '$'
}

/// True for characters that may continue an identifier.
fn is_ident_cont(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$'
}

/// Lexes one source line. `line_no` is used only for error positions.
pub fn lex_line(line: &str, line_no: usize) -> Result<Vec<SpannedTok>, ParseError> {
    let chars: Vec<char> = line.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let col = i + 1;

        match c {
            ' ' | '\t' | '\r' => i += 1,
            '#' => break,
            '/' if chars.get(i + 1) == Some(&'/') => break,
            ',' => {
                toks.push(SpannedTok {
                    tok: Tok::Comma,
                    col,
                });
                i += 1;
            }
            ':' => {
                toks.push(SpannedTok {
                    tok: Tok::Colon,
                    col,
                });
                i += 1;
            }
            '(' => {
                toks.push(SpannedTok {
                    tok: Tok::LParen,
                    col,
                });
                i += 1;
            }
            ')' => {
                toks.push(SpannedTok {
                    tok: Tok::RParen,
                    col,
                });
                i += 1;
            }
            '"' => {
                let (s, next) = lex_string(&chars, i, line_no)?;
                toks.push(SpannedTok {
                    tok: Tok::Str(s),
                    col,
                });
                i = next;
            }
            '-' | '0'..='9' => {
                let (v, next) = lex_int(&chars, i, line_no)?;
                toks.push(SpannedTok {
                    tok: Tok::Int(v),
                    col,
                });
                i = next;
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_cont(chars[i]) {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                toks.push(SpannedTok {
                    tok: Tok::Ident(name),
                    col,
                });
            }
            c => {
                return Err(ParseError::new(
                    line_no,
                    col,
                    format!("unexpected character `{c}`"),
                ));
            }
        }
    }

    Ok(toks)
}

/// Lexes an integer starting at `chars[i]`. Accepts a leading `-`, decimal
/// digits, or a `0x` hex prefix.
fn lex_int(chars: &[char], mut i: usize, line_no: usize) -> Result<(i64, usize), ParseError> {
    let col = i + 1;
    let negative = chars[i] == '-';
    if negative {
        i += 1;
    }

    let hex = chars.get(i) == Some(&'0') && matches!(chars.get(i + 1), Some('x' | 'X'));
    if hex {
        i += 2;
    }

    let start = i;
    while i < chars.len()
        && (chars[i].is_ascii_digit() || (hex && chars[i].is_ascii_hexdigit()))
    {
        i += 1;
    }
    if start == i {
        return Err(ParseError::new(line_no, col, "malformed integer literal"));
    }

    let digits: String = chars[start..i].iter().collect();
    let radix = if hex { 16 } else { 10 };
    // Parse as u64 first so full-width hex constants like 0xFFFFFFFF work.
    let magnitude = u64::from_str_radix(&digits, radix)
        .map_err(|_| ParseError::new(line_no, col, "integer literal out of range"))?;
    let value = if negative {
        -(magnitude as i64)
    } else {
        magnitude as i64
    };
    Ok((value, i))
}

/// Lexes a quoted string starting at the opening quote.
fn lex_string(
    chars: &[char],
    start: usize,
    line_no: usize,
) -> Result<(String, usize), ParseError> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((out, i + 1)),
            '\\' => {
                let esc = chars.get(i + 1).copied().ok_or_else(|| {
                    ParseError::new(line_no, i + 2, "unterminated escape sequence")
                })?;
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    '\\' => '\\',
                    '"' => '"',
                    '\'' => '\'',
                    other => {
                        return Err(ParseError::new(
                            line_no,
                            i + 2,
                            format!("unknown escape `\\{other}`"),
                        ));
                    }
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ParseError::new(
        line_no,
        start + 1,
        "unterminated string literal",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(line: &str) -> Vec<Tok> {
        lex_line(line, 1).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_instruction_line() {
        assert_eq!(
            toks("loop: addi t0, t0, -1"),
            vec![
                Tok::Ident("loop".into()),
                Tok::Colon,
                Tok::Ident("addi".into()),
                Tok::Ident("t0".into()),
                Tok::Comma,
                Tok::Ident("t0".into()),
                Tok::Comma,
                Tok::Int(-1),
            ]
        );
    }

    #[test]
    fn test_memory_operand() {
        assert_eq!(
            toks("lw a0, -4(sp)"),
            vec![
                Tok::Ident("lw".into()),
                Tok::Ident("a0".into()),
                Tok::Comma,
                Tok::Int(-4),
                Tok::LParen,
                Tok::Ident("sp".into()),
                Tok::RParen,
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(toks("nop # trailing"), vec![Tok::Ident("nop".into())]);
        assert_eq!(toks("nop // trailing"), vec![Tok::Ident("nop".into())]);
        assert_eq!(toks("   # whole line"), vec![]);
        // Comment markers inside strings are literal.
        assert_eq!(
            toks(r#".asciz "a # b // c""#),
            vec![Tok::Ident(".asciz".into()), Tok::Str("a # b // c".into())]
        );
    }

    #[test]
    fn test_integers() {
        assert_eq!(toks("0x10"), vec![Tok::Int(16)]);
        assert_eq!(toks("-0x10"), vec![Tok::Int(-16)]);
        assert_eq!(toks("0xFFFFFFFF"), vec![Tok::Int(0xFFFF_FFFF)]);
        assert!(lex_line("0x", 1).is_err());
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(toks(r#""a\n\t\0\\\"""#), vec![Tok::Str("a\n\t\0\\\"".into())]);
        assert!(lex_line("\"unterminated", 1).is_err());
    }

    #[test]
    fn test_dotted_idents() {
        assert_eq!(
            toks("fence.i"),
            vec![Tok::Ident("fence.i".into())]
        );
        assert_eq!(
            toks(".L0: j .L0"),
            vec![
                Tok::Ident(".L0".into()),
                Tok::Colon,
                Tok::Ident("j".into()),
                Tok::Ident(".L0".into()),
            ]
        );
    }
}
