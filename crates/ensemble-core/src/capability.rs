use serde::{Deserialize, Serialize};

/// Topic a specialist worker is able to cover.
///
/// Variants are declared in catalog order; every function that returns tags
/// returns them in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityTag {
    /// Web pages, browser front-ends, user interfaces.
    Frontend,
    /// APIs, services, servers.
    Backend,
    /// Data processing, analysis, machine learning.
    Data,
    /// Visual and interaction design.
    Design,
    /// Written content and documentation.
    Content,
}

impl CapabilityTag {
    /// All tags in catalog order.
    pub const ALL: [CapabilityTag; 5] = [
        CapabilityTag::Frontend,
        CapabilityTag::Backend,
        CapabilityTag::Data,
        CapabilityTag::Design,
        CapabilityTag::Content,
    ];

    /// Lowercase words that indicate this topic in a request.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            CapabilityTag::Frontend => &["web", "frontend", "ui"],
            CapabilityTag::Backend => &["api", "backend", "server"],
            CapabilityTag::Data => &["data", "analysis", "ml"],
            CapabilityTag::Design => &["design", "ux", "user"],
            CapabilityTag::Content => &["content", "documentation", "communication"],
        }
    }

    /// ID of the specialist worker that covers this topic.
    pub fn specialist(self) -> &'static str {
        match self {
            CapabilityTag::Frontend => "front-end-developer-agent",
            CapabilityTag::Backend => "back-end-developer-agent",
            CapabilityTag::Data => "data-scientist-agent",
            CapabilityTag::Design => "experience-designer-agent",
            CapabilityTag::Content => "communications-agent",
        }
    }

    /// Tags whose keywords occur as whole words in `text`, in catalog order,
    /// each at most once.
    pub fn detect(text: &str) -> Vec<CapabilityTag> {
        let words = tokenize(text);
        Self::ALL
            .into_iter()
            .filter(|tag| {
                tag.keywords()
                    .iter()
                    .any(|kw| words.iter().any(|w| w == kw))
            })
            .collect()
    }
}

impl std::fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CapabilityTag::Frontend => "frontend",
            CapabilityTag::Backend => "backend",
            CapabilityTag::Data => "data",
            CapabilityTag::Design => "design",
            CapabilityTag::Content => "content",
        };
        f.write_str(name)
    }
}

/// Split `text` into lowercase alphanumeric words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}
