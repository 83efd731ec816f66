/*!
common/src/lib.rs

Shared configuration types and DB helper functions for newsforge.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a default + override pair of TOML files
- Helpers to initialize an SQLite database pool
- Per-user newsletter preferences (see `preferences`)
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

pub mod preferences;

pub use preferences::{ConfigError, Frequency, PreferenceStore, UserConfig, UserConfigUpdate};

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/newsforge.db")
    pub path: String,
}

/// Feed fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    pub timeout_seconds: Option<u64>,
    pub max_items_per_feed: Option<usize>,
    pub user_agent: Option<String>,
    pub max_attempts: Option<u32>,
}

/// Remote LLM config (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

/// LLM top-level config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote", "none"
    pub remote: Option<RemoteLlmConfig>,
    /// Total attempts per model call (enrichment, selection, intro...)
    pub max_attempts: Option<u32>,
    /// Linear backoff unit: the n-th failed attempt waits n * backoff_seconds
    pub backoff_seconds: Option<u64>,
}

/// Optional news search API (NewsAPI-style `/v2/everything`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsApiConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub page_size: Option<usize>,
    pub language: Option<String>,
}

/// Text-to-speech endpoint (OpenAI-compatible `/audio/speech`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Outgoing email configuration. `transport` is "rest" (preferred) or "smtp".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub transport: Option<String>,
    pub from: String,
    pub subject: Option<String>,
    pub rest_url: Option<String>,
    pub api_key_env: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username_env: Option<String>,
    pub smtp_password_env: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Where run artifacts are written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub data_dir: String,
    /// Public URL of the blog, linked from the newsletter and the email
    pub blog_url: Option<String>,
}

/// Pipeline tuning knobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub max_selected: Option<usize>,
    pub fallback_selected: Option<usize>,
    pub min_relevance_score: Option<u8>,
    pub relevance_sample_size: Option<usize>,
    pub content_char_limit: Option<usize>,
    /// Upper cap on the per-user article count kept before enrichment
    pub collect_limit: Option<usize>,
}

/// Initial preferences for a user, synced into the preference store on startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSeed {
    pub id: String,
    pub domain: Option<String>,
    pub article_count: Option<i64>,
    pub frequency: Option<String>,
    pub use_llm_filter: Option<bool>,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub output: OutputConfig,
    pub fetch: Option<FetchConfig>,
    pub llm: Option<LlmConfig>,
    pub newsapi: Option<NewsApiConfig>,
    pub tts: Option<TtsConfig>,
    pub email: Option<EmailConfig>,
    pub pipeline: Option<PipelineConfig>,
    /// Domain key -> feed URLs. Merged over the built-in catalogue.
    #[serde(default)]
    pub sources: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .with_context(|| format!("Failed to parse configuration {}", path.display()))?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    pub fn fetch(&self) -> FetchConfig {
        self.fetch.clone().unwrap_or_default()
    }

    pub fn pipeline(&self) -> PipelineConfig {
        self.pipeline.clone().unwrap_or_default()
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Read a secret from the environment variable named in the config, if any.
pub fn secret_from_env(var_name: Option<&str>) -> Option<String> {
    var_name
        .and_then(|name| std::env::var(name).ok())
        .filter(|v| !v.trim().is_empty())
}

/// Initialize an SQLite connection pool.
///
/// This function will create the parent directory if necessary and return a configured
/// `SqlitePool`. The preference store is tiny, so the pool stays small.
///
/// Example:
///   let pool = init_db_pool("data/newsforge.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

/// Single-connection in-memory pool. Every connection to `sqlite::memory:` is a separate
/// database, so the pool must never open a second one or drop the first.
pub async fn memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .context("Failed to open in-memory sqlite database")?;
    Ok(pool)
}

/// Ensure that users defined in the configuration have a preferences row.
/// Existing rows are left untouched so CLI edits survive restarts.
pub async fn sync_users(config: &Config, store: &PreferenceStore) -> Result<usize> {
    let mut created = 0;
    for seed in &config.users {
        if store.exists(&seed.id).await? {
            continue;
        }
        let update = UserConfigUpdate {
            domain_or_topic: seed.domain.clone(),
            article_count: seed.article_count,
            frequency: seed.frequency.clone(),
            use_llm_filter: seed.use_llm_filter,
            recipients: Some(seed.recipients.clone()),
        };
        store
            .update(&seed.id, update)
            .await
            .with_context(|| format!("invalid preferences for configured user {}", seed.id))?;
        created += 1;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [database]
        path = "data/test.db"

        [output]
        data_dir = "data"

        [sources]
        nlp = ["https://example.org/nlp.xml"]

        [[users]]
        id = "alice"
        domain = "nlp"
        article_count = 5
        recipients = ["alice@example.org"]
    "#;

    #[test]
    fn config_from_string() {
        let cfg: Config = toml::from_str(MINIMAL).expect("parse config");
        assert_eq!(cfg.output.data_dir, "data");
        assert_eq!(cfg.sources["nlp"].len(), 1);
        assert_eq!(cfg.users.len(), 1);
        assert_eq!(cfg.users[0].id, "alice");
        assert!(cfg.llm.is_none());
        assert_eq!(cfg.pipeline().max_selected, None);
    }

    #[tokio::test]
    async fn override_file_wins_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");
        tokio::fs::write(&default_path, MINIMAL).await.unwrap();
        tokio::fs::write(
            &override_path,
            "[output]\ndata_dir = \"out\"\nblog_url = \"https://blog.example.org\"\n",
        )
        .await
        .unwrap();

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("merged config");
        assert_eq!(cfg.output.data_dir, "out");
        assert_eq!(cfg.output.blog_url.as_deref(), Some("https://blog.example.org"));
        // untouched sections survive the merge
        assert_eq!(cfg.database.path, "data/test.db");
        assert_eq!(cfg.users.len(), 1);
    }

    #[tokio::test]
    async fn sync_users_creates_missing_rows_only() {
        let cfg: Config = toml::from_str(MINIMAL).unwrap();
        let store = PreferenceStore::new(memory_pool().await.unwrap());
        store.ensure_schema().await.unwrap();

        assert_eq!(sync_users(&cfg, &store).await.unwrap(), 1);
        let alice = store.get("alice").await.unwrap();
        assert_eq!(alice.article_count, 5);

        store
            .update("alice", UserConfigUpdate { article_count: Some(7), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(sync_users(&cfg, &store).await.unwrap(), 0);
        assert_eq!(store.get("alice").await.unwrap().article_count, 7);
    }

    #[tokio::test]
    async fn db_pool_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("newsforge.db");
        let pool = init_db_pool(&db_path.to_string_lossy()).await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
    }
}
