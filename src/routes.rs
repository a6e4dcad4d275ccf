use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::PollConfig,
    credentials::{CallClass, CredentialContext, CredentialStatus},
    error::StudioError,
    gemini::GeminiClient,
    jobs::{JobHandle, JobMachine, JobState, Sleeper},
    media::{self, MediaAttachment},
    models::{suggest_aspect_ratio, EnhancementResult, GroundingReference, ImageAspectRatio, WatermarkKind, WatermarkSpec},
    pipeline::{self, VideoOutcome, VideoPipeline},
    presets::{presets, PresetPrompt},
    prompt::{compose_video_request, ImageSelections, VideoSelections},
    speech::{speak, ScheduledSlot, SpeechPlayer, TimelineSink},
};

const UPLOAD_LIMIT: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialContext,
    pub gemini: Arc<GeminiClient>,
    pub sleeper: Arc<dyn Sleeper>,
    pub poll: PollConfig,
    pub videos: Arc<RwLock<HashMap<Uuid, VideoJobRecord>>>,
    pub speech: Arc<Mutex<SpeechPlayer<TimelineSink>>>,
}

impl AppState {
    pub fn new(credentials: CredentialContext, gemini: GeminiClient, sleeper: Arc<dyn Sleeper>, poll: PollConfig) -> Self {
        Self {
            credentials,
            gemini: Arc::new(gemini),
            sleeper,
            poll,
            videos: Arc::default(),
            speech: Arc::new(Mutex::new(SpeechPlayer::new(TimelineSink::default()))),
        }
    }
}

// --- Errors ---

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Studio(#[from] StudioError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

fn studio_status(e: &StudioError) -> StatusCode {
    match e {
        StudioError::NoCredentialAvailable => StatusCode::UNAUTHORIZED,
        StudioError::CredentialRejected(_) => StatusCode::FORBIDDEN,
        StudioError::MissingRequiredInput(_) | StudioError::MissingWatermarkAsset => StatusCode::BAD_REQUEST,
        StudioError::UnreadableMedia(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StudioError::EmptyGenerationResult
        | StudioError::VideoGenerationFailed(_)
        | StudioError::MalformedEnhancementResponse(_)
        | StudioError::NoAudioReturned
        | StudioError::Http(_) => StatusCode::BAD_GATEWAY,
        StudioError::VideoGenerationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        StudioError::CredentialStore(_) | StudioError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Studio(e) => studio_status(e),
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Studio(e) => e.kind(),
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Conflict(_) => "conflict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

impl From<&StudioError> for ErrorBody {
    fn from(e: &StudioError) -> Self {
        Self { error: e.to_string(), kind: e.kind() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("❌ {} ({})", self, status);
        } else {
            tracing::warn!("⚠️ {} ({})", self, status);
        }
        let body = ErrorBody { error: self.to_string(), kind: self.kind() };
        (status, Json(body)).into_response()
    }
}

// --- Multipart ---

struct Upload {
    bytes: Bytes,
    content_type: Option<String>,
}

/// Files and plain fields from one multipart request. Empty file parts count
/// as not supplied.
#[derive(Default)]
struct Form {
    files: HashMap<String, Upload>,
    fields: HashMap<String, String>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else { continue };
            let is_file = field.file_name().is_some();
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
            if is_file {
                if !bytes.is_empty() {
                    form.files.insert(name, Upload { bytes, content_type });
                }
            } else {
                form.fields.insert(name, String::from_utf8_lossy(&bytes).into_owned());
            }
        }
        Ok(form)
    }

    fn image(&self, name: &str) -> ApiResult<Option<MediaAttachment>> {
        self.files
            .get(name)
            .map(|u| media::encode(&u.bytes, u.content_type.as_deref()))
            .transpose()
            .map_err(ApiError::from)
    }

    fn text(&self, name: &str) -> String {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    /// Parses a choice such as `"16:9"` through its serde names; absent means default.
    fn choice<T: DeserializeOwned + Default>(&self, name: &str) -> ApiResult<T> {
        match self.fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            None => Ok(T::default()),
            Some(v) => serde_json::from_value(Value::String(v.to_string()))
                .map_err(|_| ApiError::BadRequest(format!("invalid {}: {}", name, v))),
        }
    }
}

// --- Health / credentials / presets ---

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn get_credentials(State(state): State<AppState>) -> Json<CredentialStatus> {
    Json(state.credentials.status())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCredentialRequest {
    pub api_key: String,
}

pub async fn put_credentials(
    State(state): State<AppState>,
    Json(body): Json<SetCredentialRequest>,
) -> ApiResult<Json<CredentialStatus>> {
    state.credentials.set(Some(&body.api_key))?;
    Ok(Json(state.credentials.status()))
}

pub async fn delete_credentials(State(state): State<AppState>) -> ApiResult<Json<CredentialStatus>> {
    state.credentials.set(None)?;
    Ok(Json(state.credentials.status()))
}

pub async fn list_presets() -> Json<&'static [PresetPrompt]> {
    Json(presets())
}

// --- Prompt extraction / images ---

pub async fn extract_prompt(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Response> {
    let form = Form::read(multipart).await?;
    let image = form.image("image")?;
    tracing::info!("🔎 Extracting prompt from uploaded image");
    let suggestion = pipeline::extract_prompt(&state.credentials, &state.gemini, image).await?;
    Ok(Json(suggestion).into_response())
}

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    /// `data:` URL, ready for display or download.
    pub image: String,
    pub mime_type: String,
    pub grounding: Vec<GroundingReference>,
    pub suggested_aspect_ratio: Option<ImageAspectRatio>,
}

fn watermark_from(form: &Form) -> ApiResult<Option<WatermarkSpec>> {
    let Some(raw) = form.fields.get("watermark").filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    let mut spec: WatermarkSpec =
        serde_json::from_str(raw).map_err(|e| ApiError::BadRequest(format!("invalid watermark: {}", e)))?;
    if !spec.enabled {
        return Ok(None);
    }
    if spec.kind == WatermarkKind::Image {
        spec.image = form.image("watermark_image")?;
    }
    Ok(Some(spec))
}

pub async fn generate_image(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Json<ImageResponse>> {
    let form = Form::read(multipart).await?;
    let product = form
        .files
        .get("product")
        .map(|u| media::inspect(&u.bytes, u.content_type.as_deref()))
        .transpose()?;
    let suggested_aspect_ratio = product.as_ref().map(|e| suggest_aspect_ratio(e.width, e.height));
    let selections = ImageSelections {
        product: product.map(|e| e.attachment),
        model: form.image("model")?,
        background: form.image("background")?,
        scene: form.text("prompt"),
        aspect: form.choice("aspect_ratio")?,
        resolution: form.choice("resolution")?,
        watermark: watermark_from(&form)?,
    };

    tracing::info!("🎨 Generating ad image: {} {}", selections.aspect.as_str(), selections.resolution.as_str());
    let result = pipeline::create_image(&state.credentials, &state.gemini, selections).await?;
    Ok(Json(ImageResponse {
        image: result.media.to_data_url(),
        mime_type: result.media.mime_type().to_string(),
        grounding: result.grounding,
        suggested_aspect_ratio,
    }))
}

// --- Videos ---

#[derive(Debug, Clone, Serialize)]
pub struct VideoJobRecord {
    pub id: Uuid,
    pub operation: Option<JobHandle>,
    #[serde(flatten)]
    pub state: JobState,
    pub attempts: u32,
    #[serde(skip)]
    pub instruction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhancements: Option<EnhancementResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhancement_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// False while a watch task is running for this record.
    pub settled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoJobRecord {
    fn new(id: Uuid, instruction: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            operation: None,
            state: JobState::Submitted,
            attempts: 0,
            instruction,
            enhancements: None,
            enhancement_error: None,
            error: None,
            settled: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn observe(&mut self, machine: &JobMachine) {
        self.operation = Some(machine.handle().clone());
        self.state = machine.state().clone();
        self.attempts = machine.attempts();
        self.updated_at = Utc::now();
    }

    fn settle(&mut self, result: Result<VideoOutcome, StudioError>) {
        match result {
            Ok(outcome) => {
                self.state = JobState::Succeeded { result: outcome.video };
                self.enhancements = outcome.enhancements;
                self.enhancement_error = outcome.enhancement_error;
                self.error = None;
            }
            Err(e) => self.error = Some(ErrorBody::from(&e)),
        }
        self.settled = true;
        self.updated_at = Utc::now();
    }
}

/// Runs (or resumes) the pipeline for `id` in the background, mirroring job
/// progress into the record.
fn spawn_video_task(state: AppState, id: Uuid, start: VideoStart) {
    tokio::spawn(async move {
        let videos = state.videos.clone();
        let mut observer = |machine: &JobMachine| {
            if let Some(record) = videos.write().get_mut(&id) {
                record.observe(machine);
            }
        };
        let pipeline = VideoPipeline {
            videos: state.gemini.as_ref(),
            text: state.gemini.as_ref(),
            sleeper: state.sleeper.as_ref(),
            poll: state.poll,
        };
        let result = match start {
            VideoStart::Fresh(selections) => pipeline.run(&state.credentials, selections, &mut observer).await,
            VideoStart::Resume { handle, instruction } => {
                pipeline.resume(&state.credentials, handle, &instruction, &mut observer).await
            }
        };
        match &result {
            Ok(_) => tracing::info!("✅ Video job {} finished", id),
            Err(e) => tracing::warn!("⚠️ Video job {} ended: {}", id, e),
        }
        if let Some(record) = state.videos.write().get_mut(&id) {
            record.settle(result);
        }
    });
}

enum VideoStart {
    Fresh(VideoSelections),
    Resume { handle: JobHandle, instruction: String },
}

pub async fn create_video(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Response> {
    let form = Form::read(multipart).await?;
    let selections = VideoSelections {
        start_frame: form.image("start_frame")?,
        end_frame: form.image("end_frame")?,
        prompt: form.text("prompt"),
        aspect: form.choice("aspect_ratio")?,
        resolution: form.choice("resolution")?,
    };

    // Fail fast on the caller's request; the background task repeats both.
    state.credentials.resolve_for(CallClass::Video)?;
    let request = compose_video_request(selections.clone())?;

    let id = Uuid::new_v4();
    let record = VideoJobRecord::new(id, request.instruction);
    state.videos.write().insert(id, record.clone());
    tracing::info!("🎬 Video job {} accepted", id);
    spawn_video_task(state, id, VideoStart::Fresh(selections));

    Ok((StatusCode::ACCEPTED, Json(record)).into_response())
}

pub async fn get_video(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<VideoJobRecord>> {
    state
        .videos
        .read()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("video job {}", id)))
}

/// Watches a timed-out job again with a fresh attempt budget.
pub async fn resume_video(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Response> {
    state.credentials.resolve_for(CallClass::Video)?;
    let (handle, instruction) = {
        let mut guard = state.videos.write();
        let record = guard.get_mut(&id).ok_or_else(|| ApiError::NotFound(format!("video job {}", id)))?;
        let handle = match (&record.state, &record.operation, record.settled) {
            (JobState::TimedOut { .. }, Some(handle), true) => handle.clone(),
            _ => return Err(ApiError::Conflict("only a timed-out job can be resumed".into())),
        };
        record.settled = false;
        record.error = None;
        record.updated_at = Utc::now();
        (handle, record.instruction.clone())
    };
    tracing::info!("🔁 Resuming video job {} ({})", id, handle);
    spawn_video_task(state.clone(), id, VideoStart::Resume { handle, instruction });
    let record = state.videos.read().get(&id).cloned();
    Ok((StatusCode::ACCEPTED, Json(record)).into_response())
}

pub async fn video_content(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Response> {
    let result = {
        let guard = state.videos.read();
        let record = guard.get(&id).ok_or_else(|| ApiError::NotFound(format!("video job {}", id)))?;
        match &record.state {
            JobState::Succeeded { result } => result.clone(),
            _ => return Err(ApiError::Conflict("video is not ready".into())),
        }
    };
    let credential = state.credentials.resolve_for(CallClass::Video)?;
    let bytes = state.gemini.fetch_video(&credential, &result).await?;
    let headers = [
        (header::CONTENT_TYPE, "video/mp4".to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"ad_{}.mp4\"", id)),
    ];
    Ok((StatusCode::OK, headers, bytes).into_response())
}

// --- Speech ---

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    pub script: String,
}

pub async fn synthesize_speech(
    State(state): State<AppState>,
    Json(body): Json<SpeechRequest>,
) -> ApiResult<Json<ScheduledSlot>> {
    let credential = state.credentials.resolve_for(CallClass::General)?;
    let slot = speak(state.gemini.as_ref(), &*state.speech, &credential, &body.script).await?;
    Ok(Json(slot))
}

pub async fn speech_track(State(state): State<AppState>) -> ApiResult<Response> {
    let wav = state.speech.lock().sink().render_wav()?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], wav).into_response())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/credentials", get(get_credentials).put(put_credentials).delete(delete_credentials))
        .route("/api/presets", get(list_presets))
        .route("/api/prompt/extract", post(extract_prompt))
        .route("/api/images", post(generate_image))
        .route("/api/videos", post(create_video))
        .route("/api/videos/:id", get(get_video))
        .route("/api/videos/:id/resume", post(resume_video))
        .route("/api/videos/:id/content", get(video_content))
        .route("/api/speech", post(synthesize_speech))
        .route("/api/speech/track", get(speech_track))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
        .with_state(state)
}
