//! Speech synthesis and recognition collaborators, and where synthesized audio lands.

use async_trait::async_trait;
use thiserror::Error;

pub mod voice;
pub use voice::{to_ssml, voice_for, AudioProfile, Voice, DEFAULT_LANGUAGE};

pub mod http;
pub use http::HttpSpeechService;

pub mod store;
pub use store::FsAudioStore;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech service unavailable: {0}")]
    Unavailable(String),
    #[error("speech response could not be decoded: {0}")]
    Decode(String),
    #[error("audio storage failed: {0}")]
    Storage(String),
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// MP3 bytes for `text` spoken in `language` (BCP-47 tag).
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, SpeechError>;
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Transcript of WebM/Opus audio.
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String, SpeechError>;
}

#[async_trait]
pub trait AudioStore: Send + Sync {
    /// Persist `bytes` under `name` and return a reference clients can fetch.
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<String, SpeechError>;
}

/// No speech backend: synthesis and recognition are unavailable, so turns
/// carry text only.
pub struct NullSpeech;

#[async_trait]
impl SpeechSynthesizer for NullSpeech {
    async fn synthesize(&self, _text: &str, _language: &str) -> Result<Vec<u8>, SpeechError> {
        Err(SpeechError::Unavailable("no speech backend configured".into()))
    }
}

#[async_trait]
impl SpeechRecognizer for NullSpeech {
    async fn transcribe(&self, _audio: &[u8], _language: &str) -> Result<String, SpeechError> {
        Err(SpeechError::Unavailable("no speech backend configured".into()))
    }
}

#[async_trait]
impl AudioStore for NullSpeech {
    async fn put(&self, _name: &str, _bytes: Vec<u8>) -> Result<String, SpeechError> {
        Err(SpeechError::Storage("no audio store configured".into()))
    }
}
