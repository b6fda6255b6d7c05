use ensemble_core::capability::tokenize;
use ensemble_core::{CapabilityTag, Tier};
use serde::{Deserialize, Serialize};

/// Output of a [`Classifier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub tier: Tier,
    pub tags: Vec<CapabilityTag>,
    /// Specialist workers matching `tags`, in tag order.
    pub suggested_workers: Vec<String>,
}

/// Maps a free-text request onto a complexity tier and capability tags.
///
/// The plan builder only ever sees tags through this trait, so swapping the
/// keyword heuristics for a smarter classifier does not touch the engine.
pub trait Classifier: Send + Sync {
    /// Capability tags for `request`, in catalog order, without duplicates.
    fn tags(&self, request: &str) -> Vec<CapabilityTag>;

    /// Complexity tier for `request`.
    fn tier(&self, request: &str) -> Tier;

    fn classify(&self, request: &str) -> Classification {
        let tags = self.tags(request);
        let suggested_workers = tags.iter().map(|t| t.specialist().to_string()).collect();
        Classification {
            tier: self.tier(request),
            tags,
            suggested_workers,
        }
    }
}

const ENTERPRISE_WORDS: &[&str] = &["enterprise", "production", "scalable"];
const COMPLEX_WORDS: &[&str] = &["complex", "multiple", "integration"];
const MODERATE_WORDS: &[&str] = &["develop", "create", "build"];

/// Word-based classifier used when no external classifier is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl Classifier for KeywordClassifier {
    fn tags(&self, request: &str) -> Vec<CapabilityTag> {
        CapabilityTag::detect(request)
    }

    fn tier(&self, request: &str) -> Tier {
        let words = tokenize(request);
        let mentions = |set: &[&str]| words.iter().any(|w| set.contains(&w.as_str()));

        if mentions(ENTERPRISE_WORDS) {
            Tier::Enterprise
        } else if mentions(COMPLEX_WORDS) {
            Tier::Complex
        } else if mentions(MODERATE_WORDS) {
            Tier::Moderate
        } else {
            Tier::Simple
        }
    }
}
