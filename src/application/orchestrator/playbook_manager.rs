//! Playbook versioning over the append-only repository.

use crate::domain::playbook::Playbook;
use crate::domain::repositories::PlaybookRepository;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub struct PlaybookManager {
    repo: Arc<dyn PlaybookRepository>,
}

impl PlaybookManager {
    pub fn new(repo: Arc<dyn PlaybookRepository>) -> Self {
        Self { repo }
    }

    /// Latest stored playbook, or the built-in default when none exists yet.
    pub async fn get_latest(&self) -> Result<Playbook> {
        Ok(self
            .repo
            .get_latest()
            .await?
            .map(|row| {
                let mut playbook = row.data;
                playbook.version = row.version;
                playbook
            })
            .unwrap_or_default())
    }

    /// Append a new immutable version; returns the assigned number.
    pub async fn save_version(
        &self,
        playbook: &Playbook,
        change_summary: &str,
        triggered_by: &str,
    ) -> Result<i32> {
        let version = self
            .repo
            .save_version(playbook, change_summary, triggered_by)
            .await?;
        info!(version, triggered_by, "Playbook version saved");
        Ok(version)
    }

    pub async fn get_version_history(
        &self,
        limit: usize,
    ) -> Result<Vec<crate::domain::repositories::PlaybookVersion>> {
        self.repo.get_history(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::InMemoryPlaybookRepository;

    #[tokio::test]
    async fn test_default_when_empty() {
        let manager = PlaybookManager::new(Arc::new(InMemoryPlaybookRepository::new()));
        let playbook = manager.get_latest().await.unwrap();
        assert_eq!(playbook.version, 1);
    }

    #[tokio::test]
    async fn test_latest_reflects_stored_version_number() {
        let manager = PlaybookManager::new(Arc::new(InMemoryPlaybookRepository::new()));
        let playbook = Playbook::default();
        assert_eq!(manager.save_version(&playbook, "first", "test").await.unwrap(), 1);
        assert_eq!(manager.save_version(&playbook, "second", "test").await.unwrap(), 2);

        let latest = manager.get_latest().await.unwrap();
        assert_eq!(latest.version, 2);
    }
}
