//! Per-user newsletter preferences and their SQLite-backed store.
//!
//! Preferences are validated eagerly: an update that violates a range or an enum is
//! rejected before anything is written, so the stored row is always valid.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

pub const MIN_ARTICLE_COUNT: i64 = 1;
pub const MAX_ARTICLE_COUNT: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("article_count must be between {MIN_ARTICLE_COUNT} and {MAX_ARTICLE_COUNT}, got {0}")]
    ArticleCountOutOfRange(i64),
    #[error("unknown frequency '{0}' (expected daily, weekly or monthly)")]
    UnknownFrequency(String),
    #[error("domain or topic must not be empty")]
    EmptyDomain,
    #[error("invalid recipient address '{0}'")]
    InvalidRecipient(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// Minimum spacing between two runs.
    pub fn period(&self) -> Duration {
        match self {
            Frequency::Daily => Duration::days(1),
            Frequency::Weekly => Duration::days(7),
            Frequency::Monthly => Duration::days(30),
        }
    }
}

impl FromStr for Frequency {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(ConfigError::UnknownFrequency(s.to_string())),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

/// Newsletter preferences of a single user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Either a known domain key ("nlp", "robotics"...) or free text
    pub domain_or_topic: String,
    pub article_count: u32,
    pub frequency: Frequency,
    pub use_llm_filter: bool,
    #[serde(default)]
    pub recipients: BTreeSet<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            domain_or_topic: "ai".to_string(),
            article_count: 10,
            frequency: Frequency::Weekly,
            use_llm_filter: false,
            recipients: BTreeSet::new(),
            last_run_at: None,
        }
    }
}

/// Partial update; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct UserConfigUpdate {
    pub domain_or_topic: Option<String>,
    pub article_count: Option<i64>,
    pub frequency: Option<String>,
    pub use_llm_filter: Option<bool>,
    /// Replaces the whole recipient set
    pub recipients: Option<Vec<String>>,
}

impl UserConfig {
    /// Validate `update` against `self` and return the resulting config.
    /// `self` is never modified, so a rejected update leaves nothing half-applied.
    pub fn apply(&self, update: UserConfigUpdate) -> std::result::Result<UserConfig, ConfigError> {
        let mut next = self.clone();

        if let Some(domain) = update.domain_or_topic {
            let domain = domain.trim();
            if domain.is_empty() {
                return Err(ConfigError::EmptyDomain);
            }
            next.domain_or_topic = domain.to_string();
        }

        if let Some(count) = update.article_count {
            if !(MIN_ARTICLE_COUNT..=MAX_ARTICLE_COUNT).contains(&count) {
                return Err(ConfigError::ArticleCountOutOfRange(count));
            }
            next.article_count = count as u32;
        }

        if let Some(freq) = update.frequency {
            next.frequency = freq.parse()?;
        }

        if let Some(flag) = update.use_llm_filter {
            next.use_llm_filter = flag;
        }

        if let Some(recipients) = update.recipients {
            let mut set = BTreeSet::new();
            for address in recipients {
                let address = address.trim().to_string();
                if !looks_like_email(&address) {
                    return Err(ConfigError::InvalidRecipient(address));
                }
                set.insert(address);
            }
            next.recipients = set;
        }

        Ok(next)
    }

    /// True when no run happened yet or the frequency period has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_run_at {
            None => true,
            Some(last) => now - last >= self.frequency.period(),
        }
    }
}

fn looks_like_email(address: &str) -> bool {
    let mut parts = address.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !address.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}

/// Preferences keyed by user id, stored as JSON in SQLite.
#[derive(Clone)]
pub struct PreferenceStore {
    pool: SqlitePool,
}

impl PreferenceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        debug!("preferences: ensuring schema");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_preferences (
                user_id TEXT PRIMARY KEY,
                prefs_json TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create user_preferences table")?;
        Ok(())
    }

    pub async fn exists(&self, user_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_preferences WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .context("failed to look up user preferences")?;
        Ok(count > 0)
    }

    /// Stored preferences, or the defaults for an unknown user.
    pub async fn get(&self, user_id: &str) -> Result<UserConfig> {
        let row = sqlx::query("SELECT prefs_json FROM user_preferences WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch user preferences")?;

        let Some(row) = row else {
            return Ok(UserConfig::default());
        };

        let json: String = row.get("prefs_json");
        serde_json::from_str(&json)
            .with_context(|| format!("corrupt preferences stored for user {}", user_id))
    }

    /// Validate and persist a partial update. A rejected update surfaces a
    /// `ConfigError` (reachable through `downcast_ref`) and writes nothing.
    pub async fn update(&self, user_id: &str, update: UserConfigUpdate) -> Result<UserConfig> {
        let current = self.get(user_id).await?;
        let next = current.apply(update)?;
        self.save(user_id, &next).await?;
        info!(user = user_id, domain = %next.domain_or_topic, count = next.article_count, "preferences updated");
        Ok(next)
    }

    /// Record the completion time of a pipeline run.
    pub async fn mark_run(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut current = self.get(user_id).await?;
        current.last_run_at = Some(at);
        self.save(user_id, &current).await
    }

    async fn save(&self, user_id: &str, prefs: &UserConfig) -> Result<()> {
        let json = serde_json::to_string(prefs).context("failed to serialize preferences")?;
        sqlx::query(
            "INSERT OR REPLACE INTO user_preferences (user_id, prefs_json, updated_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store preferences for user {}", user_id))?;
        Ok(())
    }
}
