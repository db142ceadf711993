//! Set-associative data cache.
//!
//! The cache is the timing side channel: it tracks only tags and validity
//! (data always comes from memory; stores write through at retire, so no
//! dirty bit exists). Accesses report hit/miss and the corresponding
//! latency, which becomes observable through `rdcycle`.
//!
//! Lines installed by speculative loads are intentionally **not** removed on
//! rollback; that is what makes transient execution visible.

use serde::Serialize;

use crate::config::CacheConfig;

/// A cache line: tag plus validity. LRU order lives in the set.
#[derive(Clone, Copy, Default)]
struct CacheLine {
    tag: u32,
    valid: bool,
    /// Age counter for LRU; smaller is older.
    lru: u64,
}

/// Outcome of a cache access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessResult {
    /// Whether the line was already present.
    pub hit: bool,
    /// Cycles until the data is available.
    pub latency: u64,
}

/// Read-only view of the cache for the UI.
#[derive(Clone, Debug, Serialize)]
pub struct CacheView {
    /// Number of sets.
    pub sets: usize,
    /// Associativity.
    pub ways: usize,
    /// Line size in bytes.
    pub line_bytes: u32,
    /// Valid lines as `(set, way, base_address)` triples.
    pub lines: Vec<(usize, usize, u32)>,
}

/// Set-associative, true-LRU data cache.
pub struct DataCache {
    lines: Vec<CacheLine>,
    sets: usize,
    ways: usize,
    line_bytes: u32,
    hit_latency: u64,
    miss_latency: u64,
    /// Monotonic counter backing the LRU ordering.
    tick: u64,
}

impl DataCache {
    /// Creates a cache from its configuration. Sets, ways, and line size
    /// are clamped to at least 1/1/4.
    pub fn new(config: &CacheConfig) -> Self {
        let sets = config.sets.max(1);
        let ways = config.ways.max(1);
        let line_bytes = config.line_bytes.max(4);
        Self {
            lines: vec![CacheLine::default(); sets * ways],
            sets,
            ways,
            line_bytes,
            hit_latency: config.hit_latency,
            miss_latency: config.miss_latency,
            tick: 0,
        }
    }

    /// Latency of a hit, in cycles.
    #[inline]
    pub fn hit_latency(&self) -> u64 {
        self.hit_latency
    }

    /// Latency of a miss, in cycles.
    #[inline]
    pub fn miss_latency(&self) -> u64 {
        self.miss_latency
    }

    #[inline]
    fn set_index(&self, addr: u32) -> usize {
        ((addr / self.line_bytes) as usize) % self.sets
    }

    #[inline]
    fn tag(&self, addr: u32) -> u32 {
        addr / (self.line_bytes * self.sets as u32)
    }

    /// Checks whether the line containing `addr` is present, without
    /// touching LRU state. This is the UI/test observability hook.
    pub fn contains(&self, addr: u32) -> bool {
        let base = self.set_index(addr) * self.ways;
        let tag = self.tag(addr);
        self.lines[base..base + self.ways]
            .iter()
            .any(|l| l.valid && l.tag == tag)
    }

    /// Accesses `addr`, installing the line on a miss (the victim is the
    /// LRU way of the set). Returns the hit flag and access latency.
    ///
    /// The install happens when the access *starts*, so a line filled by a
    /// load that is later flushed remains resident.
    pub fn access(&mut self, addr: u32) -> AccessResult {
        self.tick += 1;
        let base = self.set_index(addr) * self.ways;
        let tag = self.tag(addr);

        for line in &mut self.lines[base..base + self.ways] {
            if line.valid && line.tag == tag {
                line.lru = self.tick;
                return AccessResult {
                    hit: true,
                    latency: self.hit_latency,
                };
            }
        }

        // Miss: evict the least-recently-used way.
        let set = &mut self.lines[base..base + self.ways];
        let victim = set
            .iter()
            .enumerate()
            .min_by_key(|(_, l)| if l.valid { l.lru } else { 0 })
            .map_or(0, |(i, _)| i);
        set[victim] = CacheLine {
            tag,
            valid: true,
            lru: self.tick,
        };
        AccessResult {
            hit: false,
            latency: self.miss_latency,
        }
    }

    /// Invalidates the line containing `addr`, if present.
    pub fn flush_line(&mut self, addr: u32) {
        let base = self.set_index(addr) * self.ways;
        let tag = self.tag(addr);
        for line in &mut self.lines[base..base + self.ways] {
            if line.valid && line.tag == tag {
                line.valid = false;
            }
        }
    }

    /// Invalidates every line.
    pub fn flush_all(&mut self) {
        for line in &mut self.lines {
            line.valid = false;
        }
    }

    /// Number of valid lines.
    pub fn occupancy(&self) -> usize {
        self.lines.iter().filter(|l| l.valid).count()
    }

    /// Produces a read-only snapshot for the UI.
    pub fn view(&self) -> CacheView {
        let mut lines = Vec::new();
        for set in 0..self.sets {
            for way in 0..self.ways {
                let line = self.lines[set * self.ways + way];
                if line.valid {
                    let base =
                        (line.tag * self.sets as u32 + set as u32) * self.line_bytes;
                    lines.push((set, way, base));
                }
            }
        }
        CacheView {
            sets: self.sets,
            ways: self.ways,
            line_bytes: self.line_bytes,
            lines,
        }
    }
}
