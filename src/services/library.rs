use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::core::io::Storage;
use crate::core::state::{is_valid_session_id, StoryExperience};

/// Offline copies of finished stories, one JSON file per session.
pub struct StoryLibrary {
    storage: Arc<dyn Storage>,
    folder: String,
}

impl StoryLibrary {
    pub fn new(storage: Arc<dyn Storage>, folder: &str) -> Self {
        Self {
            storage,
            folder: folder.to_string(),
        }
    }

    /// Ids are used verbatim as file names, so anything outside
    /// `[A-Za-z0-9_-]` is refused rather than rewritten.
    fn path_for(&self, session_id: &str) -> Result<String> {
        if !is_valid_session_id(session_id) {
            bail!("Invalid session id {:?}", session_id);
        }
        Ok(Path::new(&self.folder)
            .join(format!("{}.json", session_id))
            .to_string_lossy()
            .to_string())
    }

    pub async fn save(&self, story: &StoryExperience) -> Result<String> {
        let path = self.path_for(story.session_id())?;
        let content = serde_json::to_string_pretty(story)?;
        self.storage
            .write(&path, content.as_bytes())
            .await
            .with_context(|| format!("Failed to save story to {}", path))?;
        info!("Saved story {} to {}", story.session_id(), path);
        Ok(path)
    }

    pub async fn load(&self, session_id: &str) -> Result<StoryExperience> {
        let path = self.path_for(session_id)?;
        let bytes = self
            .storage
            .read(&path)
            .await
            .with_context(|| format!("Story {} not found", session_id))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path))
    }

    /// Deletes a saved story. Returns false when there was nothing to delete.
    pub async fn remove(&self, session_id: &str) -> Result<bool> {
        let path = self.path_for(session_id)?;
        if !self.storage.exists(&path).await? {
            return Ok(false);
        }
        self.storage
            .delete(&path)
            .await
            .with_context(|| format!("Failed to delete {}", path))?;
        info!("Removed story {}", session_id);
        Ok(true)
    }

    /// Every readable story in the library. Broken files are skipped.
    pub async fn list(&self) -> Result<Vec<StoryExperience>> {
        let mut stories = Vec::new();
        for path in self.storage.list(&self.folder).await? {
            if !path.ends_with(".json") {
                continue;
            }
            let bytes = self.storage.read(&path).await?;
            match serde_json::from_slice::<StoryExperience>(&bytes) {
                Ok(story) => stories.push(story),
                Err(e) => warn!("Skipping unreadable story {}: {}", path, e),
            }
        }
        Ok(stories)
    }

    /// Stories produced locally while the backend was unavailable.
    pub async fn fallback_stories(&self) -> Result<Vec<StoryExperience>> {
        let mut stories = self.list().await?;
        stories.retain(StoryExperience::is_fallback);
        Ok(stories)
    }
}
