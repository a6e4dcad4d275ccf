//! End-to-end flows for one user action each.
//!
//! The credential is resolved before any network call and captured for the
//! whole flow. A rejected key clears the platform selection so the next
//! attempt asks for a new one; nothing is retried here.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::PollConfig;
use crate::credentials::{ApiCredential, CallClass, CredentialContext};
use crate::enhance::{derive_enhancements, StructuredTextService};
use crate::error::{StudioError, StudioResult};
use crate::gemini::GeminiClient;
use crate::jobs::{JobHandle, JobObserver, Sleeper, VideoPoller, VideoService};
use crate::media::MediaAttachment;
use crate::models::{EnhancementResult, MediaResult, PromptSuggestion, ResultReference};
use crate::prompt::{compose_image_request, compose_video_request, ImageSelections, VideoSelections};

fn note_rejection(credentials: &CredentialContext, error: StudioError) -> StudioError {
    if let StudioError::CredentialRejected(reason) = &error {
        warn!("API key rejected ({}), clearing platform selection", reason);
        credentials.reset_platform_credential();
    }
    error
}

pub async fn create_image(
    credentials: &CredentialContext,
    client: &GeminiClient,
    selections: ImageSelections,
) -> StudioResult<MediaResult> {
    let credential = credentials.resolve_for(CallClass::General)?;
    let request = compose_image_request(selections)?;
    client
        .generate_image(&credential, &request)
        .await
        .map_err(|e| note_rejection(credentials, e))
}

pub async fn extract_prompt(
    credentials: &CredentialContext,
    client: &GeminiClient,
    image: Option<MediaAttachment>,
) -> StudioResult<PromptSuggestion> {
    let credential = credentials.resolve_for(CallClass::General)?;
    let image = image.ok_or(StudioError::MissingRequiredInput("image"))?;
    client
        .extract_prompt(&credential, &image)
        .await
        .map_err(|e| note_rejection(credentials, e))
}

/// A finished video plus the enhancement stage's own outcome. An enhancement
/// failure never discards the video.
#[derive(Debug, Serialize)]
pub struct VideoOutcome {
    pub video: ResultReference,
    pub enhancements: Option<EnhancementResult>,
    pub enhancement_error: Option<String>,
}

pub struct VideoPipeline<'a> {
    pub videos: &'a dyn VideoService,
    pub text: &'a dyn StructuredTextService,
    pub sleeper: &'a dyn Sleeper,
    pub poll: PollConfig,
}

impl VideoPipeline<'_> {
    pub async fn run(
        &self,
        credentials: &CredentialContext,
        selections: VideoSelections,
        observer: &mut JobObserver<'_>,
    ) -> StudioResult<VideoOutcome> {
        let credential = credentials.resolve_for(CallClass::Video)?;
        let request = compose_video_request(selections)?;

        let video = VideoPoller::new(self.videos, self.sleeper, self.poll)
            .generate(&credential, &request, observer)
            .await
            .map_err(|e| note_rejection(credentials, e))?;
        Ok(self.enhance(credentials, &credential, video, &request.instruction).await)
    }

    /// Picks up a job that was submitted earlier, typically one whose watch
    /// timed out. `instruction` is the text the job was submitted with.
    pub async fn resume(
        &self,
        credentials: &CredentialContext,
        handle: JobHandle,
        instruction: &str,
        observer: &mut JobObserver<'_>,
    ) -> StudioResult<VideoOutcome> {
        let credential = credentials.resolve_for(CallClass::Video)?;
        let video = VideoPoller::new(self.videos, self.sleeper, self.poll)
            .resume(&credential, handle, observer)
            .await
            .map_err(|e| note_rejection(credentials, e))?;
        Ok(self.enhance(credentials, &credential, video, instruction).await)
    }

    async fn enhance(
        &self,
        credentials: &CredentialContext,
        credential: &ApiCredential,
        video: ResultReference,
        instruction: &str,
    ) -> VideoOutcome {
        let (enhancements, enhancement_error) = match derive_enhancements(self.text, credential, instruction).await {
            Ok(result) => (Some(result), None),
            Err(e) => {
                let e = note_rejection(credentials, e);
                warn!("Enhancement derivation failed, keeping video: {}", e);
                (None, Some(e.to_string()))
            }
        };
        info!(enhanced = enhancements.is_some(), "Video pipeline finished");
        VideoOutcome { video, enhancements, enhancement_error }
    }
}
