use crate::error::{EnsembleError, EnsembleResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Coarse complexity classification that parameterizes plan size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Small, single-topic requests.
    Simple,
    /// Typical build/create requests.
    Moderate,
    /// Multi-part or integration-heavy requests.
    Complex,
    /// Production-grade, scalable deliverables.
    Enterprise,
}

/// Plan-size bounds attached to a [`Tier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierParams {
    /// Upper bound on workers, used to size the implementation phase.
    pub max_workers: usize,
    /// Used to derive the plan's timeout budget.
    pub max_phases: usize,
    /// Whether the implementation phase may run its workers concurrently.
    pub parallel_allowed: bool,
    /// How many gates are taken from the front of the gate catalog.
    pub quality_gate_count: usize,
}

impl Tier {
    /// All tiers, smallest first.
    pub const ALL: [Tier; 4] = [Tier::Simple, Tier::Moderate, Tier::Complex, Tier::Enterprise];

    /// Look up the built-in parameter set for this tier.
    ///
    /// Bounds grow monotonically from `Simple` to `Enterprise`.
    pub fn params(self) -> TierParams {
        match self {
            Tier::Simple => TierParams {
                max_workers: 3,
                max_phases: 2,
                parallel_allowed: false,
                quality_gate_count: 1,
            },
            Tier::Moderate => TierParams {
                max_workers: 6,
                max_phases: 4,
                parallel_allowed: true,
                quality_gate_count: 2,
            },
            Tier::Complex => TierParams {
                max_workers: 10,
                max_phases: 6,
                parallel_allowed: true,
                quality_gate_count: 3,
            },
            Tier::Enterprise => TierParams {
                max_workers: 15,
                max_phases: 8,
                parallel_allowed: true,
                quality_gate_count: 4,
            },
        }
    }

    /// Lowercase tier name.
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Simple => "simple",
            Tier::Moderate => "moderate",
            Tier::Complex => "complex",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = EnsembleError;

    fn from_str(s: &str) -> EnsembleResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Tier::Simple),
            "moderate" => Ok(Tier::Moderate),
            "complex" => Ok(Tier::Complex),
            "enterprise" => Ok(Tier::Enterprise),
            _ => Err(EnsembleError::InvalidTier(s.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_tiers() {
        assert_eq!("simple".parse::<Tier>().unwrap(), Tier::Simple);
        assert_eq!(" Enterprise ".parse::<Tier>().unwrap(), Tier::Enterprise);
    }

    #[test]
    fn test_parse_unknown_tier() {
        let err = "galactic".parse::<Tier>().unwrap_err();
        assert!(matches!(err, EnsembleError::InvalidTier(ref t) if t == "galactic"));
    }

    #[test]
    fn test_params_monotonic() {
        for pair in Tier::ALL.windows(2) {
            let (lo, hi) = (pair[0].params(), pair[1].params());
            assert!(lo.max_workers < hi.max_workers);
            assert!(lo.max_phases < hi.max_phases);
            assert!(lo.quality_gate_count < hi.quality_gate_count);
        }
        assert!(!Tier::Simple.params().parallel_allowed);
        assert!(Tier::Moderate.params().parallel_allowed);
    }

    #[test]
    fn test_tier_serialization() {
        let json = serde_json::to_string(&Tier::Complex).unwrap();
        assert_eq!(json, "\"complex\"");
        assert_eq!(Tier::Complex.to_string(), "complex");
    }
}
