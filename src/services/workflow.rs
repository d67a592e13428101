use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use crate::core::config::Config;
use crate::core::error::ErrorKind;
use crate::core::state::{GenerationRequest, StoryExperience, StoryInput};
use crate::services::assembler::{assemble, StoryDraft};
use crate::services::backend::StoryBackend;
use crate::services::cancel::CancelToken;
use crate::services::fallback::generate_fallback;
use crate::services::library::StoryLibrary;
use crate::services::request::RequestBuilder;
use crate::services::stream::{consume, StreamEvent, StreamOutcome};
use crate::services::telemetry::{Tags, TelemetrySink};
use crate::services::transport::{Transport, TransportSelector};

/// Progress notifications for whoever drives the pipeline (spinner, UI).
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    TransportSelected(Transport),
    StreamStarted,
    TextDelta(String),
    FetchingAssets,
    FallbackUsed(String),
    Completed { session_id: String },
}

pub struct StoryPipeline {
    builder: RequestBuilder,
    selector: TransportSelector,
    stream_timeout: Duration,
    backend: Arc<dyn StoryBackend>,
    telemetry: Arc<dyn TelemetrySink>,
    library: Option<StoryLibrary>,
    progress: Option<UnboundedSender<PipelineEvent>>,
}

impl StoryPipeline {
    pub fn new(config: &Config, backend: Arc<dyn StoryBackend>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            builder: RequestBuilder::new(&config.story),
            selector: TransportSelector::new(&config.backend),
            stream_timeout: config.backend.stream_timeout(),
            backend,
            telemetry,
            library: None,
            progress: None,
        }
    }

    pub fn with_library(mut self, library: StoryLibrary) -> Self {
        self.library = Some(library);
        self
    }

    pub fn with_progress(mut self, progress: UnboundedSender<PipelineEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn build_request(&self, input: &StoryInput) -> Result<GenerationRequest, ErrorKind> {
        self.builder.build(input)
    }

    pub async fn generate_from_input(
        &self,
        input: &StoryInput,
        cancel: &CancelToken,
    ) -> Result<StoryExperience, ErrorKind> {
        let request = self.build_request(input)?;
        self.generate(&request, cancel).await
    }

    /// One generation attempt. Network failures fall back to a local story
    /// exactly once; nothing is retried.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<StoryExperience, ErrorKind> {
        if cancel.is_cancelled() {
            return Err(ErrorKind::Cancelled);
        }
        let request_id = new_request_id();

        let transport = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ErrorKind::Cancelled),
            transport = self.selector.select(self.backend.as_ref()) => transport,
        };
        self.emit(PipelineEvent::TransportSelected(transport.clone()));

        let attempt = match transport {
            Transport::Direct => self.direct(&request_id, request, cancel).await,
            Transport::Stream => self.stream(&request_id, request, cancel).await,
            Transport::Fallback(reason) => Err(reason),
        };
        let draft = match attempt {
            Ok(draft) => draft,
            Err(ErrorKind::Cancelled) => return Err(ErrorKind::Cancelled),
            Err(reason) => self.fallback(request, reason)?,
        };

        if cancel.is_cancelled() {
            return Err(ErrorKind::Cancelled);
        }

        let story = assemble(request, draft);
        if let Some(library) = &self.library {
            if let Err(e) = library.save(&story).await {
                warn!("Story {} was not saved offline: {:#}", story.session_id(), e);
            }
        }
        info!(
            "Story {} ready ({} chars, {:?})",
            story.session_id(),
            story.story_text().len(),
            story.source()
        );
        self.emit(PipelineEvent::Completed {
            session_id: story.session_id().to_string(),
        });
        Ok(story)
    }

    async fn direct(
        &self,
        request_id: &str,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<StoryDraft, ErrorKind> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ErrorKind::Cancelled),
            result = self.backend.generate_story(request_id, request) => result,
        };
        let story = result.map_err(|e| ErrorKind::TransportUnreachable(format!("{:#}", e)))?;
        if story.story_text.trim().is_empty() {
            return Err(ErrorKind::TransportUnreachable(
                "direct generation returned an empty story".to_string(),
            ));
        }
        Ok(StoryDraft::from_remote(story))
    }

    async fn stream(
        &self,
        request_id: &str,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<StoryDraft, ErrorKind> {
        let started = Instant::now();
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ErrorKind::Cancelled),
            opened = tokio::time::timeout(self.stream_timeout, self.backend.stream_story(request_id, request)) => opened,
        };
        let events = match opened {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => return Err(ErrorKind::StreamFailed(format!("{:#}", e))),
            Err(_) => {
                return Err(ErrorKind::StreamFailed(format!(
                    "stream did not open within {}s",
                    self.stream_timeout.as_secs()
                )))
            }
        };

        let budget = self.stream_timeout.saturating_sub(started.elapsed());
        let outcome = consume(events, budget, cancel, |event| match event {
            StreamEvent::Start { .. } => self.emit(PipelineEvent::StreamStarted),
            StreamEvent::TextDelta { delta } => self.emit(PipelineEvent::TextDelta(delta.clone())),
            _ => {}
        })
        .await;

        let text = match outcome {
            StreamOutcome::Completed(text) => text,
            StreamOutcome::Failed(reason) => return Err(ErrorKind::StreamFailed(reason)),
            StreamOutcome::Cancelled => return Err(ErrorKind::Cancelled),
        };

        // The text stream carries no asset URLs; fetch them once.
        self.emit(PipelineEvent::FetchingAssets);
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ErrorKind::Cancelled),
            fetched = self.backend.fetch_assets(request_id) => fetched,
        };
        let assets = match fetched {
            Ok(assets) => Some(assets),
            Err(e) => {
                let error = ErrorKind::AssetFetchFailed(format!("{:#}", e));
                self.telemetry.report(&error, &self.tags(request, "stream"));
                None
            }
        };

        let draft = StoryDraft::from_stream(text, assets);
        if draft.text.trim().is_empty() {
            return Err(ErrorKind::StreamFailed(
                "stream completed without any story text".to_string(),
            ));
        }
        Ok(draft)
    }

    fn fallback(&self, request: &GenerationRequest, reason: ErrorKind) -> Result<StoryDraft, ErrorKind> {
        self.telemetry.report(&reason, &self.tags(request, reason.label()));
        self.emit(PipelineEvent::FallbackUsed(reason.to_string()));

        match generate_fallback(&request.prompt, &request.theme, &request.profile) {
            Ok(story) => {
                info!("Using local story with {}", story.character_name);
                Ok(StoryDraft::from_fallback(story))
            }
            Err(error) => {
                self.telemetry.report(&error, &self.tags(request, "fallback"));
                Err(error)
            }
        }
    }

    fn tags(&self, request: &GenerationRequest, stage: &str) -> Tags {
        vec![
            ("theme", request.theme.clone()),
            ("prompt_length", request.prompt.chars().count().to_string()),
            ("stage", stage.to_string()),
        ]
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.progress {
            // receiver gone just means nobody is watching
            let _ = tx.send(event);
        }
    }
}

fn new_request_id() -> String {
    format!("req-{:016x}", rand::random::<u64>())
}
