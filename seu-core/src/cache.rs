//! `CacheTopology`: per-cache geometry and word selection (spec §3, §4.E, §9).

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    RoundRobin,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheDescriptor {
    pub name: String,
    pub size: u32,
    pub associativity: u32,
    pub block_size: u32,
    pub policy: ReplacementPolicy,
    pub word_size: u32,
}

impl CacheDescriptor {
    pub fn rows(&self) -> u32 {
        self.size / (self.block_size * self.associativity)
    }

    /// Uniform random `(row, block, word)` within this cache's geometry.
    pub fn random_word_addr<R: Rng + ?Sized>(&self, rng: &mut R) -> (u32, u32, u32) {
        let row = rng.gen_range(0..self.rows());
        let block = rng.gen_range(0..self.associativity);
        let words_per_block = self.block_size / self.word_size.max(1);
        let word = rng.gen_range(0..words_per_block.max(1));
        (row, block, word)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheTopology {
    caches: Vec<CacheDescriptor>,
}

impl CacheTopology {
    pub fn new(caches: Vec<CacheDescriptor>) -> Self {
        Self { caches }
    }

    pub fn get(&self, name: &str) -> Option<&CacheDescriptor> {
        self.caches.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Weighted-reservoir pick of one cache by size; used when the campaign
    /// targets the generic `cache` section rather than a specific cache name.
    pub fn random_cache<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&CacheDescriptor> {
        if self.caches.is_empty() {
            return None;
        }
        let mut best: Option<(&CacheDescriptor, f64)> = None;
        for cache in &self.caches {
            // weighted reservoir sampling: key = u^(1/weight)
            let u: f64 = rng.gen_range(0.0..1.0f64).max(f64::MIN_POSITIVE);
            let key = u.powf(1.0 / cache.size as f64);
            match &best {
                Some((_, best_key)) if *best_key >= key => {}
                _ => best = Some((cache, key)),
            }
        }
        best.map(|(c, _)| c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_topology() -> CacheTopology {
        CacheTopology::new(vec![
            CacheDescriptor {
                name: "icache".into(),
                size: 4096,
                associativity: 2,
                block_size: 32,
                policy: ReplacementPolicy::RoundRobin,
                word_size: 4,
            },
            CacheDescriptor {
                name: "dcache".into(),
                size: 8192,
                associativity: 4,
                block_size: 32,
                policy: ReplacementPolicy::Random,
                word_size: 4,
            },
        ])
    }

    #[test]
    fn rows_derived_correctly() {
        let topo = sample_topology();
        let icache = topo.get("icache").unwrap();
        assert_eq!(icache.rows(), 4096 / (32 * 2));
    }

    #[test]
    fn random_word_addr_in_bounds() {
        let topo = sample_topology();
        let dcache = topo.get("dcache").unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let (row, block, word) = dcache.random_word_addr(&mut rng);
            assert!(row < dcache.rows());
            assert!(block < dcache.associativity);
            assert!(word < dcache.block_size / dcache.word_size);
        }
    }

    #[test]
    fn random_cache_prefers_larger_on_average() {
        let topo = sample_topology();
        let mut rng = StdRng::seed_from_u64(11);
        let mut dcache_wins = 0;
        for _ in 0..2000 {
            if topo.random_cache(&mut rng).unwrap().name == "dcache" {
                dcache_wins += 1;
            }
        }
        // dcache is 2x the size of icache, so it should win noticeably more often.
        assert!(dcache_wins > 1100);
    }
}
