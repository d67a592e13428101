use crate::core::config::StoryConfig;
use crate::core::error::ErrorKind;
use crate::core::state::{GenerationRequest, Profile, StoryInput, Voice};
use crate::utils::text::split_list;

pub const MIN_SCENES: u8 = 2;
pub const MAX_SCENES: u8 = 6;

/// Turns raw user input into a `GenerationRequest`.
///
/// This is the only place where the user-facing word count is turned into
/// the character budget the generator works with.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    min_words: u32,
    max_words: u32,
    chars_per_word: f64,
}

impl RequestBuilder {
    pub fn new(config: &StoryConfig) -> Self {
        Self {
            min_words: config.min_words,
            max_words: config.max_words.max(config.min_words),
            chars_per_word: config.chars_per_word,
        }
    }

    pub fn clamp_words(&self, words: u32) -> u32 {
        words.clamp(self.min_words, self.max_words)
    }

    pub fn target_length(&self, words: u32) -> u32 {
        (f64::from(self.clamp_words(words)) * self.chars_per_word).round() as u32
    }

    pub fn build(&self, input: &StoryInput) -> Result<GenerationRequest, ErrorKind> {
        let prompt = required("prompt", &input.prompt)?;
        let theme = required("theme", &input.theme)?;
        let mood = required("mood", &input.mood)?;
        let routine = required("routine", &input.routine)?;

        if !(MIN_SCENES..=MAX_SCENES).contains(&input.scenes) {
            return Err(ErrorKind::invalid(
                "scenes",
                format!(
                    "must be between {} and {}, got {}",
                    MIN_SCENES, MAX_SCENES, input.scenes
                ),
            ));
        }

        let voice: Voice = input
            .voice
            .parse()
            .map_err(|e: String| ErrorKind::invalid("voice", e))?;

        let primary_language = language_code("primary_language", &input.primary_language)?;
        let secondary_language = match input.secondary_language.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(code) => {
                let code = language_code("secondary_language", code)?;
                if code == primary_language {
                    return Err(ErrorKind::invalid(
                        "secondary_language",
                        "must differ from the primary language",
                    ));
                }
                Some(code)
            }
        };

        let child_profile_id = input
            .child_profile_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(GenerationRequest {
            prompt,
            theme,
            target_length: self.target_length(input.words),
            num_scenes: input.scenes,
            voice,
            profile: Profile {
                mood,
                routine,
                preferences: split_list(&input.preferences),
                favorite_characters: split_list(&input.favorite_characters),
                calming_elements: split_list(&input.calming_elements),
            },
            primary_language,
            secondary_language,
            child_profile_id,
            child_age: input.child_age,
        })
    }
}

fn required(field: &'static str, value: &str) -> Result<String, ErrorKind> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ErrorKind::invalid(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Accepts `en`, `zh`, `pt-BR` style codes and normalizes the casing.
fn language_code(field: &'static str, raw: &str) -> Result<String, ErrorKind> {
    let raw = raw.trim();
    let mut parts = raw.splitn(2, ['-', '_']);
    let lang = parts.next().unwrap_or_default();
    let region = parts.next();

    let lang_ok = (2..=3).contains(&lang.len()) && lang.chars().all(|c| c.is_ascii_alphabetic());
    let region_ok = region.map_or(true, |r| {
        (2..=4).contains(&r.len()) && r.chars().all(|c| c.is_ascii_alphanumeric())
    });
    if !lang_ok || !region_ok {
        return Err(ErrorKind::invalid(
            field,
            format!("'{}' is not an ISO language code", raw),
        ));
    }

    Ok(match region {
        Some(r) => format!("{}-{}", lang.to_ascii_lowercase(), r.to_ascii_uppercase()),
        None => lang.to_ascii_lowercase(),
    })
}
