use crate::core::state::{
    is_valid_session_id, BilingualPair, GenerationRequest, StoryExperience, StorySource,
};
use crate::services::backend::{RemoteStory, StoryAssets};
use crate::services::fallback::FallbackStory;
use crate::utils::text::split_sentences;

/// Whatever one of the three paths produced, before it becomes a
/// `StoryExperience`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryDraft {
    pub text: String,
    pub audio_url: String,
    pub frames: Vec<String>,
    pub session_id: Option<String>,
    pub translation: Option<String>,
    pub source: StorySource,
}

impl StoryDraft {
    pub fn from_remote(story: RemoteStory) -> Self {
        Self {
            text: story.story_text,
            audio_url: story.audio_url,
            frames: story.frames,
            session_id: story.session_id,
            translation: story.translation,
            source: StorySource::Remote,
        }
    }

    /// Streamed text plus the assets fetched after `done`. Missing assets
    /// leave audio and frames empty; the text is kept either way.
    pub fn from_stream(text: String, assets: Option<StoryAssets>) -> Self {
        let assets = assets.unwrap_or_default();
        let text = match assets.story_text {
            Some(full) if text.trim().is_empty() => full,
            _ => text,
        };
        Self {
            text,
            audio_url: assets.audio_url,
            frames: assets.frames,
            session_id: assets.session_id,
            translation: assets.translation,
            source: StorySource::Remote,
        }
    }

    pub fn from_fallback(story: FallbackStory) -> Self {
        Self {
            text: story.text,
            audio_url: String::new(),
            frames: Vec::new(),
            session_id: None,
            translation: None,
            source: StorySource::Fallback,
        }
    }
}

pub fn new_session_id() -> String {
    format!("local-{:016x}", rand::random::<u64>())
}

/// Sentence-aligned pairs; the shorter side is padded with empty strings.
pub fn pair_sentences(primary: &str, secondary: &str) -> Vec<BilingualPair> {
    let primary = split_sentences(primary);
    let secondary = split_sentences(secondary);
    let len = primary.len().max(secondary.len());

    (0..len)
        .map(|i| BilingualPair {
            primary: primary.get(i).cloned().unwrap_or_default(),
            secondary: secondary.get(i).cloned().unwrap_or_default(),
        })
        .collect()
}

pub fn assemble(request: &GenerationRequest, draft: StoryDraft) -> StoryExperience {
    let session_id = draft
        .session_id
        .filter(|id| is_valid_session_id(id))
        .unwrap_or_else(new_session_id);

    let bilingual_pairs = match &request.secondary_language {
        Some(_) => pair_sentences(&draft.text, draft.translation.as_deref().unwrap_or("")),
        None => Vec::new(),
    };

    StoryExperience::new(
        session_id,
        draft.text,
        request.theme.clone(),
        draft.audio_url,
        draft.frames,
        draft.source,
        Some(request.primary_language.clone()),
        request.secondary_language.clone(),
        bilingual_pairs,
    )
}
