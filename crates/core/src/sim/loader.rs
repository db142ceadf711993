//! Section layout into guest memory.
//!
//! `.text` stays outside the byte-addressable memory: it is an immutable
//! decoded instruction store fetched by address. `.data` bytes are copied
//! to their base, `.bss` is implicit zero in the sparse memory, and the
//! loader only validates that both fit inside the configured range.

use crate::asm::Program;
use crate::common::{EmuError, LoadError};
use crate::config::MemoryConfig;
use crate::mem::Memory;

/// Builds guest memory for a program.
pub fn load(program: &Program, config: &MemoryConfig) -> Result<Memory, EmuError> {
    let mut mem = Memory::new(config.limit, config.guard);

    if !program.data.is_empty() {
        mem.write_bytes(program.data_base, &program.data)
            .map_err(|_| LoadError::SectionOverflow(".data".into()))?;
    }

    let bss_end = program
        .bss_base
        .checked_add(program.bss_size)
        .ok_or_else(|| LoadError::SectionOverflow(".bss".into()))?;
    if bss_end > config.limit {
        return Err(LoadError::SectionOverflow(".bss".into()).into());
    }

    Ok(mem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;
    use crate::isa::{Ext, MemWidth};

    #[test]
    fn test_data_lands_at_base() {
        let config = MemoryConfig::default();
        let program = assemble(
            ".data\nx: .word 0xCAFEBABE\n.text\nmain: nop\n",
            &config,
        )
        .unwrap();
        let mem = load(&program, &config).unwrap();
        assert_eq!(
            mem.load(program.data_base, MemWidth::Word, Ext::Zero).unwrap(),
            0xCAFE_BABE
        );
    }

    #[test]
    fn test_bss_reads_zero() {
        let config = MemoryConfig::default();
        let program = assemble(".bss\nbuf: .zero 64\n.text\nmain: nop\n", &config).unwrap();
        let mem = load(&program, &config).unwrap();
        assert_eq!(
            mem.load(program.bss_base + 60, MemWidth::Word, Ext::Zero).unwrap(),
            0
        );
    }

    #[test]
    fn test_oversized_bss_rejected() {
        let config = MemoryConfig::default();
        let program = assemble(
            ".comm huge, 0x7FFFFFFF\n.text\nmain: nop\n",
            &config,
        )
        .unwrap();
        assert!(load(&program, &config).is_err());
    }
}
