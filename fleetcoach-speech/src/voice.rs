use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

pub const DEFAULT_LANGUAGE: &str = "en-US";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Voice {
    pub language_code: &'static str,
    pub name: &'static str,
    pub ssml_gender: &'static str,
}

const fn male(language_code: &'static str, name: &'static str) -> Voice {
    Voice {
        language_code,
        name,
        ssml_gender: "MALE",
    }
}

const VOICES: &[Voice] = &[
    male("en-US", "en-US-Neural2-D"),
    male("es-ES", "es-ES-Neural2-B"),
    male("es-MX", "es-MX-Neural2-B"),
    Voice {
        language_code: "ca-ES",
        name: "ca-ES-Standard-B",
        ssml_gender: "FEMALE",
    },
    male("fr-FR", "fr-FR-Neural2-B"),
    male("pt-BR", "pt-BR-Neural2-B"),
    male("de-DE", "de-DE-Neural2-B"),
    male("cmn-CN", "cmn-CN-Neural2-B"),
    male("hi-IN", "hi-IN-Neural2-B"),
    male("ar-XA", "ar-XA-Neural2-A"),
    male("ja-JP", "ja-JP-Neural2-C"),
    male("ko-KR", "ko-KR-Neural2-C"),
    male("it-IT", "it-IT-Neural2-C"),
    male("nl-NL", "nl-NL-Neural2-B"),
    male("pl-PL", "pl-PL-Neural2-B"),
    male("tr-TR", "tr-TR-Neural2-B"),
];

/// Voice for a language tag; unknown tags get the en-US voice.
pub fn voice_for(language: &str) -> Voice {
    VOICES
        .iter()
        .find(|v| v.language_code == language)
        .copied()
        .unwrap_or(VOICES[0])
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioProfile {
    pub audio_encoding: &'static str,
    pub speaking_rate: f32,
    /// Semitones.
    pub pitch: f32,
    pub volume_gain_db: f32,
}

impl AudioProfile {
    pub fn for_language(language: &str) -> Self {
        Self {
            audio_encoding: "MP3",
            speaking_rate: 0.92,
            // Catalan only has a female voice; pitch it down.
            pitch: if language == "ca-ES" { -6.0 } else { -1.5 },
            volume_gain_db: 2.0,
        }
    }
}

fn data_point() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(\d{1,2}:\d{2}(\s*[ap]m)?|\d+(\.\d+)?\s*(mph|%|miles|seconds|minutes|hours|am|pm))",
        )
        .ok()
    })
    .as_ref()
}

/// Wrap text as SSML with a short pause before each spoken data point
/// (speeds, percentages, distances, durations, clock times).
pub fn to_ssml(text: &str) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;");
    match data_point() {
        Some(re) => format!(
            "<speak>{}</speak>",
            re.replace_all(&escaped, r#"<break time="300ms"/>$0"#)
        ),
        None => format!("<speak>{escaped}</speak>"),
    }
}
