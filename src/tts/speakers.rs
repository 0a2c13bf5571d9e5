//! Persistent registry of cloned voices

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::model::VoiceEmbedding;
use crate::{Error, Result};

/// Speaker id to voice map backed by a JSON file
#[derive(Debug)]
pub struct SpeakerRegistry {
    path: PathBuf,
    speakers: BTreeMap<String, VoiceEmbedding>,
}

impl SpeakerRegistry {
    /// Load the registry, starting empty when the file does not exist
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let speakers = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), count = speakers.len(), "speaker registry loaded");
        Ok(Self { path, speakers })
    }

    /// Write the registry through a temp file and rename
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(&self.speakers)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, spk_id: &str) -> Option<&VoiceEmbedding> {
        self.speakers.get(spk_id)
    }

    pub fn insert(&mut self, spk_id: impl Into<String>, voice: VoiceEmbedding) {
        self.speakers.insert(spk_id.into(), voice);
    }

    pub fn remove(&mut self, spk_id: &str) -> Option<VoiceEmbedding> {
        self.speakers.remove(spk_id)
    }

    /// Registered ids in sorted order
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.speakers.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(tag: i64) -> VoiceEmbedding {
        VoiceEmbedding {
            prompt_tokens: vec![tag],
            speaker_embedding: vec![0.1, 0.2],
        }
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SpeakerRegistry::load(dir.path().join("none.json")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speakers.json");

        let mut registry = SpeakerRegistry::load(&path).unwrap();
        registry.insert("spk_b", voice(2));
        registry.insert("spk_a", voice(1));
        registry.save().unwrap();

        let reloaded = SpeakerRegistry::load(&path).unwrap();
        assert_eq!(reloaded.ids(), vec!["spk_a", "spk_b"]);
        assert_eq!(reloaded.get("spk_b"), Some(&voice(2)));
    }

    #[test]
    fn test_remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speakers.json");

        let mut registry = SpeakerRegistry::load(&path).unwrap();
        registry.insert("spk_a", voice(1));
        registry.save().unwrap();
        assert!(registry.remove("spk_a").is_some());
        assert!(registry.remove("spk_a").is_none());
        registry.save().unwrap();

        assert!(SpeakerRegistry::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speakers.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(SpeakerRegistry::load(&path).is_err());
    }
}
