pub mod cache_key;
pub mod error;
pub mod service;

pub use cache_key::CacheKey;
pub use error::{SpeechError, StorageError};
pub use service::{RetryPolicy, SpeechService};

use serde::{Deserialize, Serialize};

/// Maximum accepted text length for a single synthesis request, in characters.
pub const MAX_TEXT_CHARS: usize = 5000;

/// Voices supported by the synthesis engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Default,
    Male,
    Female,
    Robot,
}

impl Voice {
    pub const ALL: [Voice; 4] = [Voice::Default, Voice::Male, Voice::Female, Voice::Robot];

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Default => "default",
            Voice::Male => "male",
            Voice::Female => "female",
            Voice::Robot => "robot",
        }
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Voice {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Voice::Default),
            "male" => Ok(Voice::Male),
            "female" => Ok(Voice::Female),
            "robot" => Ok(Voice::Robot),
            other => Err(SpeechError::Invalid(format!(
                "voice {other:?} must be one of: default, male, female, robot"
            ))),
        }
    }
}

/// Validated synthesis parameters. Immutable once constructed; the tuple is
/// exactly what the cache identity is derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    text: String,
    voice: Voice,
    exaggeration: f32,
    guidance_weight: f32,
}

impl SynthesisRequest {
    pub fn new(
        text: impl Into<String>,
        voice: Voice,
        exaggeration: f32,
        guidance_weight: f32,
    ) -> Result<Self, SpeechError> {
        let text = text.into();
        if text.is_empty() {
            return Err(SpeechError::Invalid("text must not be empty".to_string()));
        }
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(SpeechError::Invalid(format!(
                "text exceeds the maximum of {MAX_TEXT_CHARS} characters"
            )));
        }
        for (name, value) in [
            ("exaggeration", exaggeration),
            ("guidance_weight", guidance_weight),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(SpeechError::Invalid(format!(
                    "{name} must be within [0.0, 1.0], got {value}"
                )));
            }
        }
        Ok(Self {
            text,
            voice,
            exaggeration,
            guidance_weight,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice(&self) -> Voice {
        self.voice
    }

    pub fn exaggeration(&self) -> f32 {
        self.exaggeration
    }

    pub fn guidance_weight(&self) -> f32 {
        self.guidance_weight
    }

    /// Deterministic storage identity for this exact parameter tuple.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&self.text, self.voice, self.exaggeration, self.guidance_weight)
    }
}
