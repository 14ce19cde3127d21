//! Voting strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How per-run verdicts are combined into one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingStrategy {
    /// Pass if pass votes outnumber fail votes.
    #[default]
    Majority,
    /// Votes weighted by quality score; pass if the pass share exceeds 0.5.
    Weighted,
    /// Pass only if no run failed.
    Unanimous,
    /// Pass if the pass fraction reaches the configured threshold.
    Threshold,
    /// The verdict of the single highest-quality run.
    BestOfN,
}

impl VotingStrategy {
    /// All strategies, in declaration order.
    pub const ALL: [VotingStrategy; 5] = [
        VotingStrategy::Majority,
        VotingStrategy::Weighted,
        VotingStrategy::Unanimous,
        VotingStrategy::Threshold,
        VotingStrategy::BestOfN,
    ];

    /// Name as written in configs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            VotingStrategy::Majority => "majority",
            VotingStrategy::Weighted => "weighted",
            VotingStrategy::Unanimous => "unanimous",
            VotingStrategy::Threshold => "threshold",
            VotingStrategy::BestOfN => "best_of_n",
        }
    }

    /// Whether the strategy needs quality scores to differ from majority.
    pub fn uses_quality(&self) -> bool {
        matches!(self, VotingStrategy::Weighted | VotingStrategy::BestOfN)
    }
}

impl fmt::Display for VotingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VotingStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "majority" => Ok(VotingStrategy::Majority),
            "weighted" => Ok(VotingStrategy::Weighted),
            "unanimous" => Ok(VotingStrategy::Unanimous),
            "threshold" => Ok(VotingStrategy::Threshold),
            "best_of_n" | "best" => Ok(VotingStrategy::BestOfN),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strategy() {
        assert_eq!("Majority".parse::<VotingStrategy>().unwrap(), VotingStrategy::Majority);
        assert_eq!("best-of-n".parse::<VotingStrategy>().unwrap(), VotingStrategy::BestOfN);
        assert!(matches!(
            "plurality".parse::<VotingStrategy>(),
            Err(ConfigError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_display_matches_parse() {
        for strategy in VotingStrategy::ALL {
            assert_eq!(strategy.to_string().parse::<VotingStrategy>().unwrap(), strategy);
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&VotingStrategy::BestOfN).unwrap();
        assert_eq!(json, "\"best_of_n\"");
    }
}
