//! Built-in catalogue of feeds per domain, overridable from the `[sources]` config table.

use std::collections::BTreeMap;

const BUILTIN: &[(&str, &[&str])] = &[
    (
        "ai",
        &[
            "https://openai.com/blog/rss.xml",
            "https://ai.googleblog.com/atom.xml",
            "https://aws.amazon.com/blogs/machine-learning/feed/",
            "https://huggingface.co/blog/feed.xml",
            "https://www.theverge.com/rss/ai-artificial-intelligence/index.xml",
            "https://rss.nytimes.com/services/xml/rss/nyt/ArtificialIntelligence.xml",
            "https://www.technologyreview.com/feed/",
            "https://www.semianalysis.com/feed",
        ],
    ),
    (
        "nlp",
        &[
            "https://huggingface.co/blog/feed.xml",
            "https://export.arxiv.org/rss/cs.CL",
        ],
    ),
    (
        "robotics",
        &[
            "https://export.arxiv.org/rss/cs.RO",
            "https://www.therobotreport.com/feed/",
            "https://spectrum.ieee.org/feeds/topic/robotics.rss",
        ],
    ),
    (
        "technology",
        &[
            "https://www.theverge.com/rss/index.xml",
            "https://www.wired.com/feed",
            "https://www.technologyreview.com/feed/",
            "https://www.theguardian.com/uk/technology/rss",
        ],
    ),
    (
        "news",
        &[
            "http://feeds.bbci.co.uk/news/rss.xml",
            "http://rss.cnn.com/rss/edition.rss",
            "https://www.reuters.com/news/world/rss",
        ],
    ),
    (
        "world",
        &[
            "https://www.theguardian.com/world/rss",
            "http://feeds.bbci.co.uk/news/world/rss.xml",
            "https://www.reuters.com/world/rss",
        ],
    ),
    (
        "gaming",
        &[
            "https://www.ign.com/rss",
            "https://kotaku.com/rss",
            "https://www.pcgamer.com/rss/",
        ],
    ),
    (
        "crypto",
        &[
            "https://cointelegraph.com/rss",
            "https://www.coindesk.com/arc/outboundfeeds/rss/",
            "https://decrypt.co/feed",
        ],
    ),
    (
        "finance",
        &[
            "https://www.reuters.com/finance/rss",
            "https://www.reuters.com/markets/rss",
        ],
    ),
    (
        "aviation",
        &["https://simpleflying.com/feed/", "https://airinsight.com/feed/"],
    ),
    (
        "environment",
        &[
            "https://www.sciencedaily.com/rss/earth_climate.xml",
            "https://www.theguardian.com/environment/rss",
        ],
    ),
];

/// Alternative spellings mapped onto catalogue keys.
const ALIASES: &[(&str, &str)] = &[
    ("artificial intelligence", "ai"),
    ("machine learning", "ai"),
    ("ml", "ai"),
    ("llm", "nlp"),
    ("natural language processing", "nlp"),
    ("tech", "technology"),
    ("games", "gaming"),
    ("video games", "gaming"),
    ("climate", "environment"),
];

/// Which feeds a run should read, and whether results still need topic filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelection {
    /// A known domain: its feeds are already on-topic.
    Domain { key: String, feeds: Vec<String> },
    /// Free text: every known feed, narrowed afterwards by the topic filter.
    FreeText { topic: String, feeds: Vec<String> },
}

impl SourceSelection {
    pub fn feeds(&self) -> &[String] {
        match self {
            SourceSelection::Domain { feeds, .. } | SourceSelection::FreeText { feeds, .. } => feeds,
        }
    }

    /// Text used as the search query and as the filter topic.
    pub fn query(&self) -> &str {
        match self {
            SourceSelection::Domain { key, .. } => key,
            SourceSelection::FreeText { topic, .. } => topic,
        }
    }

    pub fn is_free_text(&self) -> bool {
        matches!(self, SourceSelection::FreeText { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SourceCatalog {
    domains: BTreeMap<String, Vec<String>>,
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SourceCatalog {
    pub fn builtin() -> Self {
        let domains = BUILTIN
            .iter()
            .map(|(key, feeds)| {
                (
                    key.to_string(),
                    feeds.iter().map(|f| f.to_string()).collect(),
                )
            })
            .collect();
        Self { domains }
    }

    /// Catalogue made of `domains` only, without the built-in feeds.
    pub fn from_domains(domains: &BTreeMap<String, Vec<String>>) -> Self {
        Self {
            domains: domains
                .iter()
                .map(|(key, feeds)| (normalize_key(key), feeds.clone()))
                .collect(),
        }
    }

    /// Built-in catalogue where each configured domain replaces (or adds) its feed list.
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<String>>) -> Self {
        let mut catalog = Self::builtin();
        for (key, feeds) in overrides {
            catalog.domains.insert(normalize_key(key), feeds.clone());
        }
        catalog
    }

    pub fn domains(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.domains.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn get(&self, domain: &str) -> Option<&[String]> {
        self.domains.get(&canonical_key(domain)).map(|v| v.as_slice())
    }

    /// Union of every feed, first occurrence order.
    pub fn all_feeds(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.domains
            .values()
            .flatten()
            .filter(|url| seen.insert(url.as_str()))
            .cloned()
            .collect()
    }

    pub fn resolve(&self, domain_or_topic: &str) -> SourceSelection {
        match self.get(domain_or_topic) {
            Some(feeds) => SourceSelection::Domain {
                key: canonical_key(domain_or_topic),
                feeds: feeds.to_vec(),
            },
            None => SourceSelection::FreeText {
                topic: domain_or_topic.trim().to_string(),
                feeds: self.all_feeds(),
            },
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

fn canonical_key(key: &str) -> String {
    let key = normalize_key(key);
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, target)| target.to_string())
        .unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_domain_resolves_to_its_feeds() {
        let catalog = SourceCatalog::builtin();
        match catalog.resolve("Robotics") {
            SourceSelection::Domain { key, feeds } => {
                assert_eq!(key, "robotics");
                assert_eq!(feeds.len(), 3);
            }
            other => panic!("expected domain, got {:?}", other),
        }
        match catalog.resolve("Machine Learning") {
            SourceSelection::Domain { key, .. } => assert_eq!(key, "ai"),
            other => panic!("expected alias to resolve, got {:?}", other),
        }
    }

    #[test]
    fn free_text_uses_union_without_duplicates() {
        let catalog = SourceCatalog::builtin();
        let selection = catalog.resolve("quantum computing");
        assert!(selection.is_free_text());
        assert_eq!(selection.query(), "quantum computing");

        let feeds = selection.feeds();
        let unique: std::collections::HashSet<_> = feeds.iter().collect();
        assert_eq!(unique.len(), feeds.len());
        // technologyreview is listed under both ai and technology
        assert_eq!(
            feeds
                .iter()
                .filter(|f| f.contains("technologyreview"))
                .count(),
            1
        );
    }

    #[test]
    fn config_overrides_replace_domain() {
        let mut overrides = BTreeMap::new();
        overrides.insert("AI".to_string(), vec!["http://localhost/ai.xml".to_string()]);
        overrides.insert("space".to_string(), vec!["http://localhost/space.xml".to_string()]);
        let catalog = SourceCatalog::with_overrides(&overrides);

        assert_eq!(
            catalog.get("ai").unwrap().to_vec(),
            vec!["http://localhost/ai.xml".to_string()]
        );
        assert!(catalog.get("space").is_some());
        assert!(catalog.get("robotics").is_some());
    }
}
