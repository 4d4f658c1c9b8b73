use std::path::PathBuf;

use async_trait::async_trait;

use crate::{AudioStore, SpeechError};

/// Writes `<dir>/<name>.mp3` and hands out `<public_base>/<name>.mp3`.
pub struct FsAudioStore {
    dir: PathBuf,
    public_base: String,
}

impl FsAudioStore {
    pub fn new(dir: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_base: public_base.into(),
        }
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl AudioStore for FsAudioStore {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<String, SpeechError> {
        if !is_safe_name(name) {
            return Err(SpeechError::Storage(format!("invalid audio name {name:?}")));
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SpeechError::Storage(e.to_string()))?;
        let file = format!("{name}.mp3");
        tokio::fs::write(self.dir.join(&file), bytes)
            .await
            .map_err(|e| SpeechError::Storage(e.to_string()))?;
        Ok(format!("{}/{file}", self.public_base.trim_end_matches('/')))
    }
}
