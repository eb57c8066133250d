//! Dice and coins.
//!
//! The plain functions draw from the thread-local RNG; the `*_with`
//! variants take any [`Rng`] so tests can seed one.

use std::fmt;

use rand::Rng;

/// Which way a flipped coin landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinFace {
    Heads,
    Tails,
}

impl fmt::Display for CoinFace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heads => f.write_str("heads"),
            Self::Tails => f.write_str("tails"),
        }
    }
}

/// Rolls `rolls` dice with `sides` faces and returns the total.
pub fn roll(rolls: u32, sides: u32) -> u64 {
    roll_with(&mut rand::rng(), rolls, sides)
}

/// Like [`roll`], drawing from `rng`. Zero dice or zero sides total 0.
pub fn roll_with<R: Rng>(rng: &mut R, rolls: u32, sides: u32) -> u64 {
    if sides == 0 {
        return 0;
    }
    (0..rolls)
        .map(|_| u64::from(rng.random_range(1..=sides)))
        .sum()
}

pub fn flip() -> CoinFace {
    flip_with(&mut rand::rng())
}

pub fn flip_with<R: Rng>(rng: &mut R) -> CoinFace {
    if rng.random_bool(0.5) {
        CoinFace::Heads
    } else {
        CoinFace::Tails
    }
}
