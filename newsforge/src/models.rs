use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_TOPIC: &str = "General";

/// An article as collected from a feed or the news search API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    /// Feed title or publisher name
    pub source: String,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub raw_content: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl RawArticle {
    /// Deduplication key: the link, or the title for link-less entries.
    pub fn identity(&self) -> &str {
        if self.link.is_empty() {
            &self.title
        } else {
            &self.link
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    News,
    Research,
    Tutorial,
    Product,
    Opinion,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::News,
        ContentType::Research,
        ContentType::Tutorial,
        ContentType::Product,
        ContentType::Opinion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::News => "news",
            ContentType::Research => "research",
            ContentType::Tutorial => "tutorial",
            ContentType::Product => "product",
            ContentType::Opinion => "opinion",
        }
    }

    /// Case-insensitive match against the known labels.
    pub fn parse_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    #[default]
    Beginner,
    Intermediate,
    Expert,
}

impl Audience {
    pub const ALL: [Audience; 3] = [Audience::Beginner, Audience::Intermediate, Audience::Expert];

    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Beginner => "beginner",
            Audience::Intermediate => "intermediate",
            Audience::Expert => "expert",
        }
    }

    pub fn parse_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        Self::ALL.into_iter().find(|a| a.as_str() == label)
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collected article plus model-generated classification and summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedArticle {
    #[serde(flatten)]
    pub article: RawArticle,
    pub short_summary: String,
    pub detailed_summary: String,
    pub tags: Vec<String>,
    pub content_type: ContentType,
    pub audience: Audience,
    /// Always within 0..=100
    pub relevance_score: u8,
    pub score_rationale: String,
    pub topic: String,
}

impl EnrichedArticle {
    pub fn title(&self) -> &str {
        &self.article.title
    }

    pub fn link(&self) -> &str {
        &self.article.link
    }
}

/// Curated subset chosen for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub selected_indices: Vec<usize>,
    /// Member of `selected_indices`; `None` only when nothing was selected.
    pub featured_index: Option<usize>,
}

impl SelectionResult {
    /// First `min(count, len)` indices with index 0 featured.
    pub fn first_n(len: usize, count: usize) -> Self {
        let selected_indices: Vec<usize> = (0..count.min(len)).collect();
        let featured_index = selected_indices.first().copied();
        Self {
            selected_indices,
            featured_index,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selected_indices.is_empty()
    }

    /// Selected articles in selection order. Indices outside `articles` are skipped.
    pub fn pick<'a>(&self, articles: &'a [EnrichedArticle]) -> Vec<&'a EnrichedArticle> {
        self.selected_indices
            .iter()
            .filter_map(|&i| articles.get(i))
            .collect()
    }

    pub fn featured<'a>(&self, articles: &'a [EnrichedArticle]) -> Option<&'a EnrichedArticle> {
        self.featured_index.and_then(|i| articles.get(i))
    }
}
