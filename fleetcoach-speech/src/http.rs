use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::voice::{to_ssml, voice_for, AudioProfile, Voice};
use crate::{SpeechError, SpeechRecognizer, SpeechSynthesizer};

#[derive(Serialize)]
struct SynthesizeRequest {
    input: SsmlInput,
    voice: Voice,
    #[serde(rename = "audioConfig")]
    audio_config: AudioProfile,
}

#[derive(Serialize)]
struct SsmlInput {
    ssml: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig<'a> {
    encoding: &'static str,
    sample_rate_hertz: u32,
    language_code: &'a str,
    model: &'static str,
    enable_automatic_punctuation: bool,
    use_enhanced: bool,
}

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    config: RecognitionConfig<'a>,
    audio: AudioContent,
}

#[derive(Serialize)]
struct AudioContent {
    content: String,
}

#[derive(Deserialize, Default)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Cloud speech REST API (`text:synthesize`, `speech:recognize`).
pub struct HttpSpeechService {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSpeechService {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, SpeechError> {
        let url = format!("{}/{path}", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| {
            tracing::warn!(error = %e, path, "speech service unreachable");
            SpeechError::Unavailable(format!("HTTP error: {e}"))
        })?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(%status, path, "speech service rejected request");
            return Err(SpeechError::Unavailable(format!("HTTP status: {status}")));
        }
        resp.json().await.map_err(|e| {
            tracing::warn!(error = %e, path, "undecodable speech service response");
            SpeechError::Decode(e.to_string())
        })
    }
}

/// First alternative of each result, joined with spaces.
fn join_transcript(resp: RecognizeResponse) -> String {
    resp.results
        .into_iter()
        .map(|r| {
            r.alternatives
                .into_iter()
                .next()
                .map(|a| a.transcript)
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechService {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, SpeechError> {
        let body = SynthesizeRequest {
            input: SsmlInput {
                ssml: to_ssml(text),
            },
            voice: voice_for(language),
            audio_config: AudioProfile::for_language(language),
        };
        let resp: SynthesizeResponse = self.post("v1/text:synthesize", &body).await?;
        STANDARD
            .decode(resp.audio_content)
            .map_err(|e| SpeechError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SpeechRecognizer for HttpSpeechService {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String, SpeechError> {
        let body = RecognizeRequest {
            config: RecognitionConfig {
                encoding: "WEBM_OPUS",
                sample_rate_hertz: 48_000,
                language_code: language,
                model: "latest_long",
                enable_automatic_punctuation: true,
                use_enhanced: true,
            },
            audio: AudioContent {
                content: STANDARD.encode(audio),
            },
        };
        let resp: RecognizeResponse = self.post("v1/speech:recognize", &body).await?;
        Ok(join_transcript(resp))
    }
}
