use anyhow::{anyhow, Result};
use inquire::{CustomType, Select, Text};

use crate::core::config::Config;
use crate::core::state::{StoryInput, Voice};
use crate::services::fallback::THEME_CHARACTERS;

/// Asks for tonight's story, or takes `story.preset` when running unattended.
/// Preset values double as defaults for the interactive prompts.
pub fn collect_input(config: &Config) -> Result<StoryInput> {
    let preset = config.story.preset.clone();
    if config.unattended {
        return preset.ok_or_else(|| anyhow!("unattended mode needs story.preset in config.yml"));
    }
    let defaults = preset.unwrap_or_default();

    let prompt = Text::new("What should tonight's story be about?")
        .with_initial_value(&defaults.prompt)
        .prompt()?;

    let themes: Vec<&str> = THEME_CHARACTERS.iter().map(|(name, _)| *name).collect();
    let start = themes
        .iter()
        .position(|t| t.eq_ignore_ascii_case(&defaults.theme))
        .unwrap_or(0);
    let theme = Select::new("Theme:", themes)
        .with_starting_cursor(start)
        .prompt()?
        .to_string();

    let words = CustomType::<u32>::new("Story length (words):")
        .with_default(defaults.words)
        .with_help_message(&format!(
            "between {} and {}",
            config.story.min_words, config.story.max_words
        ))
        .prompt()?;

    let scenes = CustomType::<u8>::new("Number of scenes (2-6):")
        .with_default(defaults.scenes)
        .prompt()?;

    let voices = Voice::ALL.to_vec();
    let voice_start = voices
        .iter()
        .position(|v| v.to_string().eq_ignore_ascii_case(defaults.voice.trim()))
        .unwrap_or(0);
    let voice = Select::new("Voice:", voices)
        .with_starting_cursor(voice_start)
        .prompt()?;

    let primary_language = Text::new("Story language (ISO code):")
        .with_default(&defaults.primary_language)
        .prompt()?;
    let secondary_language = Text::new("Second language for dual-language reading (blank for none):")
        .with_initial_value(defaults.secondary_language.as_deref().unwrap_or(""))
        .prompt()?;

    let mood = Text::new("How is your child feeling tonight?")
        .with_initial_value(&defaults.mood)
        .prompt()?;
    let routine = Text::new("Bedtime routine:")
        .with_initial_value(&defaults.routine)
        .prompt()?;
    let favorite_characters = Text::new("Favorite characters (comma separated):")
        .with_initial_value(&defaults.favorite_characters)
        .prompt()?;
    let calming_elements = Text::new("Calming elements (comma separated):")
        .with_initial_value(&defaults.calming_elements)
        .prompt()?;
    let preferences = Text::new("Other preferences (comma separated):")
        .with_initial_value(&defaults.preferences)
        .prompt()?;

    Ok(StoryInput {
        prompt,
        theme,
        words,
        scenes,
        voice: voice.to_string(),
        primary_language,
        secondary_language: Some(secondary_language).filter(|s| !s.trim().is_empty()),
        mood,
        routine,
        preferences,
        favorite_characters,
        calming_elements,
        child_profile_id: defaults.child_profile_id,
        child_age: defaults.child_age,
    })
}
