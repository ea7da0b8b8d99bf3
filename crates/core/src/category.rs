//! Goal categories.

use serde::{Deserialize, Serialize};

/// The fixed set of areas a goal can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Health & fitness
    Health,
    /// Career & work
    Career,
    /// Learning & skills
    Learning,
    /// Relationships
    Relationships,
    /// Finance & money
    Finance,
    /// Personal growth
    Personal,
    /// Creative projects
    Creative,
}

impl Category {
    /// All categories, in display order.
    pub const ALL: [Category; 7] = [
        Category::Health,
        Category::Career,
        Category::Learning,
        Category::Relationships,
        Category::Finance,
        Category::Personal,
        Category::Creative,
    ];

    /// Stable identifier used in records and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Health => "health",
            Category::Career => "career",
            Category::Learning => "learning",
            Category::Relationships => "relationships",
            Category::Finance => "finance",
            Category::Personal => "personal",
            Category::Creative => "creative",
        }
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Health => "Health & Fitness",
            Category::Career => "Career & Work",
            Category::Learning => "Learning & Skills",
            Category::Relationships => "Relationships",
            Category::Finance => "Finance & Money",
            Category::Personal => "Personal Growth",
            Category::Creative => "Creative Projects",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl std::str::FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}
