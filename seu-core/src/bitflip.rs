//! Single-bit perturbation (spec §4.E step 4, §8 bit-flip law).

use rand::Rng;

/// `old XOR (1 << random(0..width))`, a 32-bit-wide single-bit flip.
pub fn flip_one_bit<R: Rng + ?Sized>(old: u32, rng: &mut R) -> u32 {
    let bit = rng.gen_range(0..32u32);
    old ^ (1u32 << bit)
}
