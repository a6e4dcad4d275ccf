use std::time::Duration;
use thiserror::Error;

pub type StudioResult<T> = Result<T, StudioError>;

/// Every failure the studio surfaces to a caller. None of these are retried
/// automatically; a retry is always a fresh call from the caller.
#[derive(Debug, Error)]
pub enum StudioError {
    #[error("no API key available: enter a key manually or set GEMINI_API_KEY")]
    NoCredentialAvailable,

    #[error("unreadable media: {0}")]
    UnreadableMedia(String),

    #[error("missing required input: {0}")]
    MissingRequiredInput(&'static str),

    #[error("watermark type is image but no watermark image was supplied")]
    MissingWatermarkAsset,

    #[error("the generation service returned no media")]
    EmptyGenerationResult,

    #[error("video generation failed: {0}")]
    VideoGenerationFailed(String),

    /// The client stopped watching. The job itself was not cancelled and may
    /// still finish server-side; `job` can be handed back to resume polling.
    #[error("video generation timed out after {waited:?} (job {job} may still complete server-side)")]
    VideoGenerationTimeout { job: String, waited: Duration },

    #[error("API key rejected, select a different key: {0}")]
    CredentialRejected(String),

    #[error("malformed enhancement response: {0}")]
    MalformedEnhancementResponse(String),

    #[error("speech synthesis returned no audio")]
    NoAudioReturned,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("credential store: {0}")]
    CredentialStore(String),

    #[error("Other: {0}")]
    Other(String),
}

const REJECTION_MARKERS: [&str; 3] = [
    "API key not valid",
    "Requested entity was not found",
    "PERMISSION_DENIED",
];

/// True when a failure message says the key itself is unusable.
pub fn is_credential_rejection(message: &str) -> bool {
    REJECTION_MARKERS.iter().any(|m| message.contains(m))
}

impl StudioError {
    /// Short stable identifier for API consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoCredentialAvailable => "no_credential_available",
            Self::UnreadableMedia(_) => "unreadable_media",
            Self::MissingRequiredInput(_) => "missing_required_input",
            Self::MissingWatermarkAsset => "missing_watermark_asset",
            Self::EmptyGenerationResult => "empty_generation_result",
            Self::VideoGenerationFailed(_) => "video_generation_failed",
            Self::VideoGenerationTimeout { .. } => "video_generation_timeout",
            Self::CredentialRejected(_) => "credential_rejected",
            Self::MalformedEnhancementResponse(_) => "malformed_enhancement_response",
            Self::NoAudioReturned => "no_audio_returned",
            Self::Http(_) => "http",
            Self::CredentialStore(_) => "credential_store",
            Self::Other(_) => "other",
        }
    }

    /// Reclassifies a service failure as `CredentialRejected` when its message
    /// points at the key.
    pub fn classify(self) -> Self {
        match self {
            Self::Http(msg) | Self::VideoGenerationFailed(msg) | Self::Other(msg)
                if is_credential_rejection(&msg) =>
            {
                Self::CredentialRejected(msg)
            }
            other => other,
        }
    }
}

// Request URLs carry the key as a query parameter; keep it out of messages.
impl From<reqwest::Error> for StudioError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classify_maps_entity_not_found_to_rejection() {
        let err = StudioError::VideoGenerationFailed("Requested entity was not found.".into()).classify();
        assert_eq!(err.kind(), "credential_rejected");
    }

    #[test]
    fn classify_leaves_unrelated_failures_alone() {
        let err = StudioError::VideoGenerationFailed("safety filter".into()).classify();
        assert_eq!(err.kind(), "video_generation_failed");
        let err = StudioError::EmptyGenerationResult.classify();
        assert_eq!(err.kind(), "empty_generation_result");
    }

    #[test]
    fn timeout_message_mentions_server_side_completion() {
        let err = StudioError::VideoGenerationTimeout {
            job: "operations/abc".into(),
            waited: Duration::from_secs(600),
        };
        assert!(err.to_string().contains("may still complete server-side"));
    }
}
