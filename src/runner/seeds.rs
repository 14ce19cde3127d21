//! Seed generation for reproducible runs.
//!
//! Seeds come from one of three places:
//!
//! - an explicit user list (validated against the run count up front),
//! - an optional external [`SeedSource`] such as a shared seed service,
//! - the local [`SeedGenerator`], which is always available.
//!
//! When an external source fails, the local generator takes over for the
//! same strategy and the degradation is recorded in the [`SeedPlan`].

use async_trait::async_trait;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, SeedError};

use super::config::{MultiRunConfig, SeedStrategy};

/// Random seeds are drawn from `[0, MAX_RANDOM_SEED)` so they fit a signed 32-bit int.
pub const MAX_RANDOM_SEED: u64 = 2_147_483_647;

/// External provider of seed lists.
#[async_trait]
pub trait SeedSource: Send + Sync {
    /// Human-readable name used in logs and reports.
    fn name(&self) -> &str;

    /// Returns `count` seeds for the given strategy.
    async fn seeds(
        &self,
        strategy: SeedStrategy,
        base_seed: u64,
        count: usize,
    ) -> Result<Vec<u64>, SeedError>;
}

/// Where the seeds of a batch came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeedProvenance {
    /// Generated locally or taken from the user list.
    Local,
    /// Returned by an external seed source.
    External { source: String },
    /// External source failed; generated locally instead.
    LocalFallback { source: String, reason: String },
}

impl SeedProvenance {
    /// Short label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            SeedProvenance::Local => "local",
            SeedProvenance::External { .. } => "external",
            SeedProvenance::LocalFallback { .. } => "local_fallback",
        }
    }

    /// Degradation note, if any.
    pub fn note(&self) -> Option<String> {
        match self {
            SeedProvenance::LocalFallback { source, reason } => Some(format!(
                "seed source '{}' failed ({}); used local generator",
                source, reason
            )),
            _ => None,
        }
    }
}

/// Resolved seeds for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPlan {
    pub strategy: SeedStrategy,
    pub base_seed: u64,
    pub seeds: Vec<u64>,
    pub provenance: SeedProvenance,
}

/// Deterministic local seed generator.
#[derive(Debug, Clone, Copy)]
pub struct SeedGenerator {
    strategy: SeedStrategy,
    base_seed: u64,
}

impl SeedGenerator {
    /// Creates a generator for a strategy and base seed.
    pub fn new(strategy: SeedStrategy, base_seed: u64) -> Self {
        Self {
            strategy,
            base_seed,
        }
    }

    /// `[base_seed + i for i in 0..count)`.
    pub fn sequential(base_seed: u64, count: usize) -> Vec<u64> {
        (0..count as u64)
            .map(|i| base_seed.wrapping_add(i))
            .collect()
    }

    /// Pseudo-random seeds; the same base seed always yields the same list.
    pub fn random(base_seed: u64, count: usize) -> Vec<u64> {
        let mut rng = ChaCha8Rng::seed_from_u64(base_seed);
        (0..count)
            .map(|_| rng.random_range(0..MAX_RANDOM_SEED))
            .collect()
    }

    /// Generates `count` seeds.
    ///
    /// The user strategy cannot be generated locally; callers supply the list
    /// through [`MultiRunConfig::with_seeds`]. Asking for it here degrades to
    /// sequential seeds with a warning.
    pub fn generate(&self, count: usize) -> Vec<u64> {
        match self.strategy {
            SeedStrategy::Sequential => Self::sequential(self.base_seed, count),
            SeedStrategy::Random => Self::random(self.base_seed, count),
            SeedStrategy::User => {
                warn!(
                    base_seed = self.base_seed,
                    "User seed strategy has no local generator, using sequential seeds"
                );
                Self::sequential(self.base_seed, count)
            }
        }
    }
}

/// Resolves the seed list for a batch.
///
/// # Errors
///
/// Returns a `ConfigError` when the user strategy has no list or a list of
/// the wrong length. External source failures never error; they fall back
/// to sequential seeds from `base_seed`, whatever the configured strategy.
pub async fn resolve_seeds(
    config: &MultiRunConfig,
    source: Option<&dyn SeedSource>,
) -> Result<SeedPlan, ConfigError> {
    let count = config.num_runs;

    if let Some(seeds) = &config.seeds {
        if seeds.len() != count {
            return Err(ConfigError::SeedCountMismatch {
                expected: count,
                provided: seeds.len(),
            });
        }
        return Ok(SeedPlan {
            strategy: SeedStrategy::User,
            base_seed: config.base_seed,
            seeds: seeds.clone(),
            provenance: SeedProvenance::Local,
        });
    }

    if config.seed_strategy == SeedStrategy::User {
        return Err(ConfigError::MissingSeedList);
    }

    let Some(source) = source else {
        let local = SeedGenerator::new(config.seed_strategy, config.base_seed);
        return Ok(SeedPlan {
            strategy: config.seed_strategy,
            base_seed: config.base_seed,
            seeds: local.generate(count),
            provenance: SeedProvenance::Local,
        });
    };

    let external = source
        .seeds(config.seed_strategy, config.base_seed, count)
        .await
        .and_then(|seeds| {
            if seeds.len() == count {
                Ok(seeds)
            } else {
                Err(SeedError::WrongCount {
                    expected: count,
                    provided: seeds.len(),
                })
            }
        });

    let (strategy, seeds, provenance) = match external {
        Ok(seeds) => {
            debug!(source = source.name(), count, "Using seeds from external source");
            (
                config.seed_strategy,
                seeds,
                SeedProvenance::External {
                    source: source.name().to_string(),
                },
            )
        }
        Err(e) => {
            warn!(
                source = source.name(),
                error = %e,
                strategy = %config.seed_strategy,
                base_seed = config.base_seed,
                "Seed source failed, falling back to sequential seeds"
            );
            (
                SeedStrategy::Sequential,
                SeedGenerator::sequential(config.base_seed, count),
                SeedProvenance::LocalFallback {
                    source: source.name().to_string(),
                    reason: e.to_string(),
                },
            )
        }
    };

    Ok(SeedPlan {
        strategy,
        base_seed: config.base_seed,
        seeds,
        provenance,
    })
}
