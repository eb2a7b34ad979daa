//! Least-loaded picker with pluggable tie-break.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Chooses one name among several tied at the minimum weight.
///
/// `tied` is never empty and is sorted by name.
pub trait TieStrategy {
    fn pick(&mut self, tied: &[String]) -> String;
}

impl<T: TieStrategy + ?Sized> TieStrategy for &mut T {
    fn pick(&mut self, tied: &[String]) -> String {
        (**self).pick(tied)
    }
}

impl<T: TieStrategy + ?Sized> TieStrategy for Box<T> {
    fn pick(&mut self, tied: &[String]) -> String {
        (**self).pick(tied)
    }
}

/// Lexically smallest name. Reproducible across runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinWins;

impl TieStrategy for MinWins {
    fn pick(&mut self, tied: &[String]) -> String {
        tied.iter().min().cloned().unwrap_or_default()
    }
}

/// Uniform random choice among the tied names.
#[derive(Debug)]
pub struct RandomWins {
    rng: StdRng,
}

impl RandomWins {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sequence for tests and dry runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomWins {
    fn default() -> Self {
        Self::new()
    }
}

impl TieStrategy for RandomWins {
    fn pick(&mut self, tied: &[String]) -> String {
        let idx = self.rng.gen_range(0..tied.len().max(1));
        tied.get(idx).cloned().unwrap_or_default()
    }
}

/// Hands out names by lowest weight, incrementing the winner each time.
pub struct Balancer<T> {
    weights: BTreeMap<String, usize>,
    preferred: Vec<String>,
    tie: T,
}

impl<T: TieStrategy> Balancer<T> {
    /// `weights` seeds the current load of every candidate; `preferred`
    /// names win ties, each entry at most once.
    pub fn new(weights: impl IntoIterator<Item = (String, usize)>, preferred: Vec<String>, tie: T) -> Self {
        Self {
            weights: weights.into_iter().collect(),
            preferred,
            tie,
        }
    }

    pub fn weight(&self, name: &str) -> Option<usize> {
        self.weights.get(name).copied()
    }

    pub fn pop(&mut self) -> Option<String> {
        let min = *self.weights.values().min()?;
        let tied: Vec<String> = self
            .weights
            .iter()
            .filter(|&(_, &weight)| weight == min)
            .map(|(name, _)| name.clone())
            .collect();

        let chosen = if tied.len() == 1 {
            tied[0].clone()
        } else if let Some(pos) = self.preferred.iter().position(|name| tied.contains(name)) {
            self.preferred.remove(pos)
        } else {
            self.tie.pick(&tied)
        };

        if let Some(weight) = self.weights.get_mut(&chosen) {
            *weight += 1;
        }
        Some(chosen)
    }
}
