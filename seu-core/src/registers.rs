//! Register set for a board's ISA (spec §3, §9 — per-board tables).

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Immutable set of register names for one board, in wire order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSet {
    names: Vec<String>,
}

impl RegisterSet {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn arm_cortex_a9() -> Self {
        let mut names: Vec<String> = (0..=12).map(|i| format!("r{}", i)).collect();
        names.extend(["sp", "lr", "pc", "cpsr"].iter().map(|s| s.to_string()));
        Self::new(names)
    }

    pub fn riscv_hifive1() -> Self {
        let mut names: Vec<String> = (0..=31).map(|i| format!("x{}", i)).collect();
        names.push("pc".to_string());
        Self::new(names)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Select one register uniformly at random.
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        let idx = rng.gen_range(0..self.names.len());
        &self.names[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn arm_set_has_expected_members() {
        let set = RegisterSet::arm_cortex_a9();
        assert!(set.contains("r5"));
        assert!(set.contains("cpsr"));
        assert_eq!(set.names().len(), 17);
    }

    #[test]
    fn random_picks_a_member() {
        let set = RegisterSet::riscv_hifive1();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let reg = set.random(&mut rng);
            assert!(set.contains(reg));
        }
    }
}
