//! Core data models used throughout the clinic.
//!
//! These types represent the user's constitution, the chat transcript, the
//! herb metadata read back from the vector index, and the append-only
//! diagnosis rows written to the record store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A user's constitution label. Used only to steer the prescription prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constitution {
    Soeumin,
    Soyangin,
    Taeeumin,
    Taeyangin,
    /// Not sure; the Ayurvedic Vata/Pitta/Kapha framing is used instead.
    Unknown,
}

impl Constitution {
    /// Menu order.
    pub const ALL: [Constitution; 5] = [
        Constitution::Soeumin,
        Constitution::Soyangin,
        Constitution::Taeeumin,
        Constitution::Taeyangin,
        Constitution::Unknown,
    ];

    /// The label stored in the record store.
    pub fn label(&self) -> &'static str {
        match self {
            Constitution::Soeumin => "소음인",
            Constitution::Soyangin => "소양인",
            Constitution::Taeeumin => "태음인",
            Constitution::Taeyangin => "태양인",
            Constitution::Unknown => "잘 모름(아유르베다 바타/피타/카파)",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Constitution::Soeumin => "soeumin",
            Constitution::Soyangin => "soyangin",
            Constitution::Taeeumin => "taeeumin",
            Constitution::Taeyangin => "taeyangin",
            Constitution::Unknown => "unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Constitution::Soeumin => "Soeumin (lesser yin)",
            Constitution::Soyangin => "Soyangin (lesser yang)",
            Constitution::Taeeumin => "Taeeumin (greater yin)",
            Constitution::Taeyangin => "Taeyangin (greater yang)",
            Constitution::Unknown => "Not sure (Ayurveda Vata/Pitta/Kapha)",
        }
    }
}

impl fmt::Display for Constitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Constitution {
    type Err = anyhow::Error;

    /// Accepts the stored label, the English key, or a 1-based menu index.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<usize>() {
            return n
                .checked_sub(1)
                .and_then(|i| Constitution::ALL.get(i).copied())
                .ok_or_else(|| {
                    anyhow::anyhow!("constitution menu index must be 1-{}", Self::ALL.len())
                });
        }
        let lower = s.to_lowercase();
        Constitution::ALL
            .iter()
            .copied()
            .find(|c| c.label() == s || c.key() == lower)
            .ok_or_else(|| anyhow::anyhow!("unknown constitution: '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the session transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Herb metadata as stored alongside each vector in the index.
///
/// The index owns this data; the clinic only reads it back. Missing fields
/// stay `None` and render as `None` in prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HerbRecord {
    pub name: Option<String>,
    pub category: Option<String>,
    pub efficacy: Option<String>,
    pub caution: Option<String>,
}

impl HerbRecord {
    /// Build from an opaque metadata object. Non-string values are
    /// rendered with their JSON text.
    pub fn from_metadata(metadata: &serde_json::Value) -> Self {
        let field = |key: &str| -> Option<String> {
            match metadata.get(key)? {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }
        };
        Self {
            name: field("name"),
            category: field("category"),
            efficacy: field("efficacy"),
            caution: field("caution"),
        }
    }
}

/// A ranked hit from the vector index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub herb: HerbRecord,
}

/// An append-only diagnosis log row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    /// Local time, `%Y-%m-%d %H:%M:%S`.
    pub recorded_at: String,
    pub user_id: String,
    pub symptom: String,
    pub label: String,
    /// Truncated assistant reply.
    pub summary: String,
}

impl DiagnosisRecord {
    pub const TIMESTAMP_FORMAT: &'static str = "%Y-%m-%d %H:%M:%S";

    /// Build a row stamped with the current local time, keeping the first
    /// `summary_chars` characters of `reply`.
    pub fn now(user_id: &str, symptom: &str, label: &str, reply: &str, summary_chars: usize) -> Self {
        Self {
            recorded_at: chrono::Local::now()
                .format(Self::TIMESTAMP_FORMAT)
                .to_string(),
            user_id: user_id.to_string(),
            symptom: symptom.to_string(),
            label: label.to_string(),
            summary: truncate_chars(reply, summary_chars),
        }
    }
}

/// Keep at most `max` characters (not bytes) of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
