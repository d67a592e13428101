use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw values as the user entered them. Nothing here is trusted yet;
/// `RequestBuilder` turns it into a `GenerationRequest`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoryInput {
    pub prompt: String,
    pub theme: String,
    #[serde(default = "default_words")]
    pub words: u32,
    #[serde(default = "default_scenes")]
    pub scenes: u8,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_primary_language")]
    pub primary_language: String,
    #[serde(default)]
    pub secondary_language: Option<String>,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub routine: String,
    /// Comma separated.
    #[serde(default)]
    pub preferences: String,
    /// Comma separated.
    #[serde(default)]
    pub favorite_characters: String,
    /// Comma separated.
    #[serde(default)]
    pub calming_elements: String,
    #[serde(default)]
    pub child_profile_id: Option<String>,
    #[serde(default)]
    pub child_age: Option<u8>,
}

fn default_words() -> u32 {
    300
}
fn default_scenes() -> u8 {
    4
}
fn default_voice() -> String {
    Voice::default().to_string()
}
fn default_primary_language() -> String {
    "en".to_string()
}

impl Default for StoryInput {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            theme: String::new(),
            words: default_words(),
            scenes: default_scenes(),
            voice: default_voice(),
            primary_language: default_primary_language(),
            secondary_language: None,
            mood: String::new(),
            routine: String::new(),
            preferences: String::new(),
            favorite_characters: String::new(),
            calming_elements: String::new(),
            child_profile_id: None,
            child_age: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Voice {
    #[default]
    Female,
    Male,
    Child,
    Narrator,
}

impl Voice {
    pub const ALL: [Voice; 4] = [Voice::Female, Voice::Male, Voice::Child, Voice::Narrator];
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Voice::Female => "female",
            Voice::Male => "male",
            Voice::Child => "child",
            Voice::Narrator => "narrator",
        };
        f.write_str(name)
    }
}

impl FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Voice::ALL
            .into_iter()
            .find(|v| v.to_string().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown voice '{}'", wanted))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Profile {
    pub mood: String,
    pub routine: String,
    pub preferences: Vec<String>,
    pub favorite_characters: Vec<String>,
    pub calming_elements: Vec<String>,
}

/// Validated request, serialized as the body of every generation call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub theme: String,
    /// Character budget. Always derived from the word count, see `RequestBuilder`.
    pub target_length: u32,
    pub num_scenes: u8,
    pub voice: Voice,
    pub profile: Profile,
    pub primary_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_profile_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_age: Option<u8>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorySource {
    Remote,
    Fallback,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BilingualPair {
    pub primary: String,
    pub secondary: String,
}

/// Final result of one generation attempt. Built once by the assembler and
/// never mutated afterwards.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoryExperience {
    session_id: String,
    story_text: String,
    theme: String,
    audio_url: String,
    frames: Vec<String>,
    source: StorySource,
    #[serde(default)]
    primary_language: Option<String>,
    #[serde(default)]
    secondary_language: Option<String>,
    #[serde(default)]
    bilingual_pairs: Vec<BilingualPair>,
}

impl StoryExperience {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session_id: String,
        story_text: String,
        theme: String,
        audio_url: String,
        frames: Vec<String>,
        source: StorySource,
        primary_language: Option<String>,
        secondary_language: Option<String>,
        bilingual_pairs: Vec<BilingualPair>,
    ) -> Self {
        Self {
            session_id,
            story_text,
            theme,
            audio_url,
            frames,
            source,
            primary_language,
            secondary_language,
            bilingual_pairs,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
    pub fn story_text(&self) -> &str {
        &self.story_text
    }
    pub fn theme(&self) -> &str {
        &self.theme
    }
    pub fn audio_url(&self) -> &str {
        &self.audio_url
    }
    pub fn frames(&self) -> &[String] {
        &self.frames
    }
    pub fn source(&self) -> StorySource {
        self.source
    }
    pub fn primary_language(&self) -> Option<&str> {
        self.primary_language.as_deref()
    }
    pub fn secondary_language(&self) -> Option<&str> {
        self.secondary_language.as_deref()
    }
    pub fn bilingual_pairs(&self) -> &[BilingualPair] {
        &self.bilingual_pairs
    }
    pub fn is_fallback(&self) -> bool {
        self.source == StorySource::Fallback
    }
}

/// Session ids double as library file names: ASCII letters, digits, `-` and `_` only.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
