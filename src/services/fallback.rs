use crate::core::error::ErrorKind;
use crate::core::state::Profile;

/// Themes offered by the CLI, each with the character used when the user
/// has no favorites of their own.
pub const THEME_CHARACTERS: &[(&str, &str)] = &[
    ("Study Grove", "Sage the Owl"),
    ("Ocean Dreams", "Coral the Sea Turtle"),
    ("Space Adventure", "Nova the Star Pilot"),
    ("Enchanted Forest", "Fern the Forest Sprite"),
    ("Dragon Valley", "Ember the Gentle Dragon"),
    ("Cozy Cottage", "Bramble the Bunny"),
];

pub const DEFAULT_CHARACTER: &str = "Luna the Moonlight Fox";
const DEFAULT_CALMING: &str = "the soft hush of the evening";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackStory {
    pub character_name: String,
    pub theme: String,
    pub mood: String,
    pub prompt: String,
    pub text: String,
}

pub fn default_character(theme: &str) -> &'static str {
    let theme = theme.trim();
    THEME_CHARACTERS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(theme))
        .map(|(_, character)| *character)
        .unwrap_or(DEFAULT_CHARACTER)
}

/// Local story used whenever the backend cannot deliver one.
///
/// Pure: the same input always yields the same story, and nothing here
/// touches the network or the disk.
pub fn generate_fallback(prompt: &str, theme: &str, profile: &Profile) -> Result<FallbackStory, ErrorKind> {
    let prompt = prompt.trim();
    let theme = theme.trim();
    if prompt.is_empty() || theme.is_empty() {
        return Err(ErrorKind::GenerationUnavailable(
            "a local story needs both a prompt and a theme".to_string(),
        ));
    }

    let character = profile
        .favorite_characters
        .iter()
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
        .unwrap_or_else(|| default_character(theme))
        .to_string();
    let mood = match profile.mood.trim() {
        "" => "calm",
        m => m,
    }
    .to_string();
    let calming = profile
        .calming_elements
        .first()
        .map(String::as_str)
        .unwrap_or(DEFAULT_CALMING);

    let text = format!(
        "Once upon a time, in the land of {theme}, there lived {character}. \
         Tonight {character} was feeling {mood}, and the whole world seemed to know it.\n\n\
         As the sky turned the color of warm milk, {character} began to wonder about {prompt}. \
         Every step of the little adventure was slow and gentle, and {calming} kept {character} company along the way.\n\n\
         When the stars came out over {theme}, {character} found a quiet spot, took three deep breaths, \
         and remembered everything lovely about {prompt}.\n\n\
         And so, wrapped in {calming}, {character} drifted off to sleep. Goodnight, {character}. Goodnight, {theme}.",
    );

    Ok(FallbackStory {
        character_name: character,
        theme: theme.to_string(),
        mood,
        prompt: prompt.to_string(),
        text,
    })
}
