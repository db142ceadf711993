//! Emulator configuration.
//!
//! All structure sizes are fixed up front from configuration: the ROB, tag
//! pool, LSQ, RAS, cache geometry, and predictor tables never grow at run
//! time; back-pressure stalls fetch instead. Configuration is loaded from
//! YAML (`config.yml`) or built with `Config::default()`; every field has a
//! serde default so partial files work.

use std::path::Path;

use serde::Deserialize;

use crate::common::EmuError;

/// Default configuration constants.
mod defaults {
    /// Reorder-buffer depth in entries.
    pub const ROB_DEPTH: usize = 32;

    /// Physical tag pool size. Tags are ROB sequence numbers; the pool
    /// additionally caps in-flight entries and must be at least the ROB
    /// depth.
    pub const TAG_POOL: usize = 32;

    /// Load-store queue depth in entries.
    pub const LSQ_DEPTH: usize = 16;

    /// Maximum μops retired per cycle.
    pub const RETIRE_WIDTH: usize = 2;

    /// Maximum μops fetched/dispatched per cycle.
    pub const DISPATCH_WIDTH: usize = 4;

    /// Data cache: number of sets.
    pub const CACHE_SETS: usize = 16;

    /// Data cache: associativity.
    pub const CACHE_WAYS: usize = 4;

    /// Data cache: line size in bytes.
    pub const CACHE_LINE: u32 = 64;

    /// Data cache: hit latency in cycles.
    pub const HIT_LATENCY: u64 = 1;

    /// Data cache: miss latency in cycles. The hit/miss gap is the side
    /// channel; keep it comfortably larger than pipeline noise.
    pub const MISS_LATENCY: u64 = 30;

    /// Direction predictor: log2 of the pattern history table size.
    pub const PHT_BITS: u32 = 12;

    /// Direction predictor: global history bits mixed into the index.
    pub const HISTORY_BITS: u32 = 8;

    /// Branch target buffer entries.
    pub const BTB_SIZE: usize = 256;

    /// Return-address stack depth.
    pub const RAS_DEPTH: usize = 16;

    /// Memory-dependence predictor entries.
    pub const MEMDEP_SIZE: usize = 64;

    /// Base address of the `.text` section.
    pub const TEXT_BASE: u32 = 0x0040_0000;

    /// Base address of the `.data` section (`.bss` follows it).
    pub const DATA_BASE: u32 = 0x1001_0000;

    /// First invalid address.
    pub const MEM_LIMIT: u32 = 0x8000_0000;

    /// Addresses below this fault (null-page guard, a convenient
    /// protected target for Meltdown-style demos).
    pub const MEM_GUARD: u32 = 0x1000;

    /// Initial stack pointer.
    pub const INITIAL_SP: u32 = 0x7FFF_F000;
}

/// Value a faulting load hands to its speculative dependents.
///
/// The fault itself always rides the ROB entry and raises at retire; this
/// policy only decides what transient consumers observe, which is the knob
/// that turns Meltdown modelling on and off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultingLoadValue {
    /// Dependents see zero.
    #[default]
    Zero,
    /// Dependents see the configured sentinel value.
    Sentinel,
    /// Dependents see the underlying memory bytes anyway (the permissive
    /// Meltdown model).
    Forward,
}

/// Pipeline structure sizes.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Reorder-buffer depth.
    #[serde(default = "PipelineConfig::default_rob_depth")]
    pub rob_depth: usize,

    /// Physical tag pool size; must be at least `rob_depth`.
    #[serde(default = "PipelineConfig::default_tag_pool")]
    pub tag_pool: usize,

    /// Load-store queue depth.
    #[serde(default = "PipelineConfig::default_lsq_depth")]
    pub lsq_depth: usize,

    /// Maximum μops retired per cycle.
    #[serde(default = "PipelineConfig::default_retire_width")]
    pub retire_width: usize,

    /// Maximum μops fetched and dispatched per cycle.
    #[serde(default = "PipelineConfig::default_dispatch_width")]
    pub dispatch_width: usize,
}

impl PipelineConfig {
    fn default_rob_depth() -> usize {
        defaults::ROB_DEPTH
    }
    fn default_tag_pool() -> usize {
        defaults::TAG_POOL
    }
    fn default_lsq_depth() -> usize {
        defaults::LSQ_DEPTH
    }
    fn default_retire_width() -> usize {
        defaults::RETIRE_WIDTH
    }
    fn default_dispatch_width() -> usize {
        defaults::DISPATCH_WIDTH
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rob_depth: defaults::ROB_DEPTH,
            tag_pool: defaults::TAG_POOL,
            lsq_depth: defaults::LSQ_DEPTH,
            retire_width: defaults::RETIRE_WIDTH,
            dispatch_width: defaults::DISPATCH_WIDTH,
        }
    }
}

/// Data cache geometry and timing.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Number of sets.
    #[serde(default = "CacheConfig::default_sets")]
    pub sets: usize,

    /// Associativity (ways per set).
    #[serde(default = "CacheConfig::default_ways")]
    pub ways: usize,

    /// Line size in bytes.
    #[serde(default = "CacheConfig::default_line")]
    pub line_bytes: u32,

    /// Hit latency in cycles.
    #[serde(default = "CacheConfig::default_hit")]
    pub hit_latency: u64,

    /// Miss latency in cycles.
    #[serde(default = "CacheConfig::default_miss")]
    pub miss_latency: u64,
}

impl CacheConfig {
    fn default_sets() -> usize {
        defaults::CACHE_SETS
    }
    fn default_ways() -> usize {
        defaults::CACHE_WAYS
    }
    fn default_line() -> u32 {
        defaults::CACHE_LINE
    }
    fn default_hit() -> u64 {
        defaults::HIT_LATENCY
    }
    fn default_miss() -> u64 {
        defaults::MISS_LATENCY
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sets: defaults::CACHE_SETS,
            ways: defaults::CACHE_WAYS,
            line_bytes: defaults::CACHE_LINE,
            hit_latency: defaults::HIT_LATENCY,
            miss_latency: defaults::MISS_LATENCY,
        }
    }
}

/// Predictor table geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictorConfig {
    /// log2 of the pattern history table size.
    #[serde(default = "PredictorConfig::default_pht_bits")]
    pub pht_bits: u32,

    /// Global history bits mixed into the PHT index.
    #[serde(default = "PredictorConfig::default_history_bits")]
    pub history_bits: u32,

    /// Branch target buffer entries.
    #[serde(default = "PredictorConfig::default_btb_size")]
    pub btb_size: usize,

    /// Return-address stack depth.
    #[serde(default = "PredictorConfig::default_ras_depth")]
    pub ras_depth: usize,

    /// Memory-dependence predictor entries.
    #[serde(default = "PredictorConfig::default_memdep_size")]
    pub memdep_size: usize,

    /// Enables the memory-dependence predictor. When disabled, loads
    /// always speculate past unknown store addresses.
    #[serde(default = "PredictorConfig::default_memdep_enabled")]
    pub memdep_enabled: bool,
}

impl PredictorConfig {
    fn default_pht_bits() -> u32 {
        defaults::PHT_BITS
    }
    fn default_history_bits() -> u32 {
        defaults::HISTORY_BITS
    }
    fn default_btb_size() -> usize {
        defaults::BTB_SIZE
    }
    fn default_ras_depth() -> usize {
        defaults::RAS_DEPTH
    }
    fn default_memdep_size() -> usize {
        defaults::MEMDEP_SIZE
    }
    fn default_memdep_enabled() -> bool {
        true
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            pht_bits: defaults::PHT_BITS,
            history_bits: defaults::HISTORY_BITS,
            btb_size: defaults::BTB_SIZE,
            ras_depth: defaults::RAS_DEPTH,
            memdep_size: defaults::MEMDEP_SIZE,
            memdep_enabled: true,
        }
    }
}

/// Memory layout.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Base address of `.text`.
    #[serde(default = "MemoryConfig::default_text_base")]
    pub text_base: u32,

    /// Base address of `.data`; `.bss` follows it word-aligned.
    #[serde(default = "MemoryConfig::default_data_base")]
    pub data_base: u32,

    /// First invalid address.
    #[serde(default = "MemoryConfig::default_limit")]
    pub limit: u32,

    /// Addresses below this fault.
    #[serde(default = "MemoryConfig::default_guard")]
    pub guard: u32,

    /// Initial stack pointer.
    #[serde(default = "MemoryConfig::default_initial_sp")]
    pub initial_sp: u32,
}

impl MemoryConfig {
    fn default_text_base() -> u32 {
        defaults::TEXT_BASE
    }
    fn default_data_base() -> u32 {
        defaults::DATA_BASE
    }
    fn default_limit() -> u32 {
        defaults::MEM_LIMIT
    }
    fn default_guard() -> u32 {
        defaults::MEM_GUARD
    }
    fn default_initial_sp() -> u32 {
        defaults::INITIAL_SP
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            text_base: defaults::TEXT_BASE,
            data_base: defaults::DATA_BASE,
            limit: defaults::MEM_LIMIT,
            guard: defaults::MEM_GUARD,
            initial_sp: defaults::INITIAL_SP,
        }
    }
}

/// Speculation policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeculationConfig {
    /// Value a faulting load hands to speculative dependents.
    #[serde(default)]
    pub faulting_load_value: FaultingLoadValue,

    /// Sentinel used when `faulting_load_value` is `sentinel`.
    #[serde(default)]
    pub sentinel: u32,
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Pipeline structure sizes.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Data cache geometry and timing.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Predictor geometry.
    #[serde(default)]
    pub predictor: PredictorConfig,
    /// Memory layout.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Speculation policy.
    #[serde(default)]
    pub speculation: SpeculationConfig,
}

impl Config {
    /// Parses a YAML configuration string.
    pub fn from_yaml_str(text: &str) -> Result<Self, EmuError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EmuError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Rejects configurations the engine cannot honor.
    pub fn validate(&self) -> Result<(), EmuError> {
        if self.pipeline.rob_depth == 0 {
            return Err(EmuError::Config("rob_depth must be nonzero".into()));
        }
        if self.pipeline.tag_pool < self.pipeline.rob_depth {
            return Err(EmuError::Config(format!(
                "tag_pool ({}) must be at least rob_depth ({})",
                self.pipeline.tag_pool, self.pipeline.rob_depth
            )));
        }
        if self.pipeline.lsq_depth == 0 {
            return Err(EmuError::Config("lsq_depth must be nonzero".into()));
        }
        if self.pipeline.retire_width == 0 || self.pipeline.dispatch_width == 0 {
            return Err(EmuError::Config(
                "retire_width and dispatch_width must be nonzero".into(),
            ));
        }
        if !self.cache.line_bytes.is_power_of_two() || self.cache.line_bytes < 4 {
            return Err(EmuError::Config(
                "cache line_bytes must be a power of two >= 4".into(),
            ));
        }
        if self.memory.text_base >= self.memory.limit || self.memory.data_base >= self.memory.limit
        {
            return Err(EmuError::Config(
                "section bases must lie below the memory limit".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_partial_yaml() {
        let config = Config::from_yaml_str(
            "pipeline:\n  rob_depth: 8\n  tag_pool: 8\ncache:\n  sets: 2\n",
        )
        .unwrap();
        assert_eq!(config.pipeline.rob_depth, 8);
        assert_eq!(config.cache.sets, 2);
        // Untouched fields keep their defaults.
        assert_eq!(config.pipeline.lsq_depth, 16);
        assert_eq!(config.cache.miss_latency, 30);
    }

    #[test]
    fn test_tag_pool_smaller_than_rob_rejected() {
        let err = Config::from_yaml_str("pipeline:\n  rob_depth: 32\n  tag_pool: 8\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_faulting_load_policy_names() {
        let config =
            Config::from_yaml_str("speculation:\n  faulting_load_value: sentinel\n  sentinel: 165\n")
                .unwrap();
        assert_eq!(
            config.speculation.faulting_load_value,
            FaultingLoadValue::Sentinel
        );
        assert_eq!(config.speculation.sentinel, 165);
    }
}
