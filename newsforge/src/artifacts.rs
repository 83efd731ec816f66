//! Per-run snapshots on disk, one directory per user.
//!
//! Every write replaces the previous file, so a rerun starts from a clean slate.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::PipelineError;
use crate::publish::site::SitePage;

pub const RAW_ARTICLES: &str = "raw_articles.json";
pub const ENRICHED_ARTICLES: &str = "enriched_articles.json";
pub const SELECTION: &str = "selection.json";
pub const NEWSLETTER: &str = "newsletter.html";
pub const BLOG: &str = "blog.html";
pub const SITE_DIR: &str = "site";
pub const CAPSULE: &str = "capsule.mp3";
pub const EMAIL_DRAFT: &str = "email_draft.txt";
pub const REPORT: &str = "run_report.json";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under `data_dir/<user_id>/`. The id must be a single plain path
    /// component so the store cannot leave `data_dir`.
    pub fn for_user(data_dir: impl AsRef<Path>, user_id: &str) -> Result<Self, PipelineError> {
        let mut components = Path::new(user_id).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !user_id.contains(['/', '\\', ':']);
        if !plain {
            return Err(PipelineError::Validation(format!("invalid user id '{}'", user_id)));
        }
        Ok(Self::new(data_dir.as_ref().join(user_id)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub async fn write_bytes(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    pub async fn write_text(&self, name: &str, text: &str) -> Result<PathBuf> {
        self.write_bytes(name, text.as_bytes()).await
    }

    pub async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let json = serde_json::to_vec_pretty(value).with_context(|| format!("Failed to serialize {}", name))?;
        self.write_bytes(name, &json).await
    }

    pub async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.path(name);
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Replace the site directory with `pages`.
    pub async fn write_site(&self, pages: &[SitePage]) -> Result<PathBuf> {
        let dir = self.path(SITE_DIR);
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
        }
        for page in pages {
            self.write_text(&format!("{}/{}", SITE_DIR, page.path), &page.content).await?;
        }
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SelectionResult;

    #[tokio::test]
    async fn json_snapshots_are_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::for_user(tmp.path(), "alice").unwrap();

        let first = SelectionResult {
            selected_indices: vec![0, 1],
            featured_index: Some(1),
        };
        store.write_json(SELECTION, &first).await.unwrap();
        let second = SelectionResult::first_n(3, 3);
        let path = store.write_json(SELECTION, &second).await.unwrap();

        assert_eq!(path, tmp.path().join("alice").join(SELECTION));
        let back: SelectionResult = store.read_json(SELECTION).await.unwrap();
        assert_eq!(back, second);
    }

    #[test]
    fn user_ids_stay_inside_the_data_dir() {
        assert!(ArtifactStore::for_user("runs", "alice_2").is_ok());
        for bad in ["", ".", "..", "../etc", "a/b", "/tmp/x", "a\\b", "c:x"] {
            assert!(
                matches!(ArtifactStore::for_user("runs", bad), Err(PipelineError::Validation(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn site_directory_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let page = |path: &str| SitePage {
            path: path.to_string(),
            content: "x".to_string(),
        };

        store.write_site(&[page("index.html"), page("article_7.html")]).await.unwrap();
        store.write_site(&[page("index.html")]).await.unwrap();

        let site = tmp.path().join(SITE_DIR);
        assert!(site.join("index.html").exists());
        assert!(!site.join("article_7.html").exists());
    }
}
