use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::skip_serializing_none;
use tracing::{debug, error, info};

use crate::config::{Models, StudioConfig};
use crate::credentials::ApiCredential;
use crate::enhance::StructuredTextService;
use crate::error::{StudioError, StudioResult};
use crate::jobs::{GenerationJob, JobHandle, VideoService};
use crate::media::MediaAttachment;
use crate::models::{GroundingReference, MediaResult, PromptSuggestion, ResultReference};
use crate::prompt::{ImageRequest, RequestPart, VideoRequest, EXTRACTION_INSTRUCTION};
use crate::speech::SpeechService;

// Shortens base64 payloads in JSON so request/response logs stay readable
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" || key == "bytesBase64Encoded" {
                    if let Value::String(s) = val {
                        if s.len() > 100 && s.is_ascii() {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn loggable(value: &Value) -> String {
    let mut copy = value.clone();
    truncate_base64_in_json(&mut copy);
    copy.to_string()
}

/// REST client for the Gemini generative media API.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    models: Models,
    voice: String,
}

impl GeminiClient {
    pub fn new(config: &StudioConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            models: config.models.clone(),
            voice: config.tts_voice.clone(),
        }
    }

    /// Client against a different host, same models. Used by tests.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let config = StudioConfig { api_base: base_url.into(), ..StudioConfig::default() };
        Self::new(&config)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn perform_api_call(&self, credential: &ApiCredential, path: &str, body: &Value) -> StudioResult<String> {
        let url = format!("{}/{}", self.base_url, path);
        info!("🔗 Making request to: {}", url);
        debug!("📤 Request body: {}", loggable(body));

        let response = self.client
            .post(&url)
            .query(&[("key", credential.expose())])
            .json(body)
            .send()
            .await?;

        let status = response.status();
        info!("📥 Response status: {}", status);
        let response_text = response.text().await?;

        if !status.is_success() {
            error!("❌ API Error response: {}", response_text);
            return Err(status_error(status, &response_text));
        }

        if let Ok(value) = serde_json::from_str::<Value>(&response_text) {
            debug!("📥 Raw Gemini API response: {}", loggable(&value));
        }
        Ok(response_text)
    }

    async fn generate_content(&self, credential: &ApiCredential, model: &str, body: &Value) -> StudioResult<GeminiResponse> {
        let text = self
            .perform_api_call(credential, &format!("models/{}:generateContent", model), body)
            .await?;
        serde_json::from_str(&text).map_err(|e| StudioError::Other(format!("parse error: {}", e)))
    }

    /// Single round trip; expects one inline image back.
    pub async fn generate_image(&self, credential: &ApiCredential, request: &ImageRequest) -> StudioResult<MediaResult> {
        let parts: Vec<Value> = request
            .parts()
            .into_iter()
            .map(|part| match part {
                RequestPart::Media(media) => json!({ "inlineData": media }),
                RequestPart::Text(text) => json!({ "text": text }),
            })
            .collect();
        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "responseModalities": ["IMAGE"] }
        });

        info!(attachments = request.attachments.len(), "Generating advertising image");
        let parsed = self.generate_content(credential, &self.models.image, &body).await?;
        let media = extract_first_inline(&parsed).ok_or(StudioError::EmptyGenerationResult)?;
        info!("🖼️ Received {} image ({} base64 chars)", media.mime_type(), media.data().len());
        Ok(MediaResult { media, grounding: parsed.grounding() })
    }

    /// Describes an image as an advertising prompt, with web search grounding.
    pub async fn extract_prompt(&self, credential: &ApiCredential, image: &MediaAttachment) -> StudioResult<PromptSuggestion> {
        let body = json!({
            "contents": [{ "parts": [
                { "inlineData": image },
                { "text": EXTRACTION_INSTRUCTION }
            ]}],
            "tools": [{ "googleSearch": {} }],
            "generationConfig": {
                "maxOutputTokens": 500,
                "thinkingConfig": { "thinkingBudget": 100 }
            }
        });
        let parsed = self.generate_content(credential, &self.models.text, &body).await?;
        let text = parsed.first_text().ok_or(StudioError::EmptyGenerationResult)?;
        Ok(PromptSuggestion { text, grounding: parsed.grounding() })
    }

    /// Downloads a finished video. The reference only works with the key attached.
    pub async fn fetch_video(&self, credential: &ApiCredential, result: &ResultReference) -> StudioResult<Bytes> {
        info!("⬇️ Downloading video from {}", result.uri);
        let response = self.client.get(result.with_credential(credential.expose())?).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        Ok(response.bytes().await?)
    }
}

fn status_error(status: StatusCode, body: &str) -> StudioError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return StudioError::CredentialRejected(message);
    }
    StudioError::Http(format!("status={} body={}", status, message)).classify()
}

#[async_trait]
impl StructuredTextService for GeminiClient {
    async fn generate_structured(&self, credential: &ApiCredential, prompt: &str, schema: &Value) -> StudioResult<String> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema
            }
        });
        let parsed = self.generate_content(credential, &self.models.text, &body).await?;
        parsed
            .first_text()
            .ok_or_else(|| StudioError::MalformedEnhancementResponse("no text in response".into()))
    }
}

#[async_trait]
impl SpeechService for GeminiClient {
    async fn synthesize_speech(&self, credential: &ApiCredential, script: &str) -> StudioResult<Vec<u8>> {
        let body = json!({
            "contents": [{ "parts": [{ "text": format!("Say warmly and clearly: {}", script) }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": self.voice } }
                }
            }
        });
        let parsed = self.generate_content(credential, &self.models.tts, &body).await?;
        let audio = extract_first_inline(&parsed).ok_or(StudioError::NoAudioReturned)?;
        base64::engine::general_purpose::STANDARD
            .decode(audio.data())
            .map_err(|e| StudioError::Other(format!("audio payload: {}", e)))
    }
}

#[async_trait]
impl VideoService for GeminiClient {
    async fn submit_video(&self, credential: &ApiCredential, request: &VideoRequest) -> StudioResult<GenerationJob> {
        let body = VeoRequest {
            instances: [VeoInstance {
                prompt: &request.instruction,
                image: VeoImage::from(&request.start_frame),
                last_frame: request.end_frame.as_ref().map(VeoImage::from),
            }],
            parameters: VeoParameters {
                aspect_ratio: request.aspect.as_str(),
                resolution: request.resolution.as_str(),
                sample_count: Some(1),
            },
        };
        let body = serde_json::to_value(&body).map_err(|e| StudioError::Other(e.to_string()))?;
        let text = self
            .perform_api_call(credential, &format!("models/{}:predictLongRunning", self.models.video), &body)
            .await?;
        let operation: Operation = serde_json::from_str(&text)
            .map_err(|e| StudioError::Other(format!("parse error: {}", e)))?;
        Ok(operation.into_job())
    }

    async fn poll_video(&self, credential: &ApiCredential, handle: &JobHandle) -> StudioResult<GenerationJob> {
        let url = format!("{}/{}", self.base_url, handle.0);
        debug!("🔁 Polling {}", url);
        let response = self.client
            .get(&url)
            .query(&[("key", credential.expose())])
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        let operation: Operation = serde_json::from_str(&text)
            .map_err(|e| StudioError::Other(format!("parse error: {}", e)))?;
        Ok(operation.into_job())
    }
}

// --- Request Helpers ---

#[derive(Debug, Serialize)]
struct VeoRequest<'a> {
    instances: [VeoInstance<'a>; 1],
    parameters: VeoParameters,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoInstance<'a> {
    prompt: &'a str,
    image: VeoImage<'a>,
    last_frame: Option<VeoImage<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoImage<'a> {
    bytes_base64_encoded: &'a str,
    mime_type: &'a str,
}

impl<'a> From<&'a MediaAttachment> for VeoImage<'a> {
    fn from(media: &'a MediaAttachment) -> Self {
        Self { bytes_base64_encoded: media.data(), mime_type: media.mime_type() }
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoParameters {
    aspect_ratio: &'static str,
    resolution: &'static str,
    sample_count: Option<u32>,
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ErrorEnvelope { error: ApiErrorBody }

#[derive(Debug, Deserialize)]
struct ApiErrorBody { #[serde(default)] message: String }

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)] content: Content,
    #[serde(default)] grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData
    },
    Text { text: String },
    Other(Value)
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)] grounding_chunks: Vec<GroundingReference>,
}

impl GeminiResponse {
    fn first_text(&self) -> Option<String> {
        self.candidates
            .iter()
            .flat_map(|c| &c.content.parts)
            .find_map(|p| match p {
                Part::Text { text } if !text.trim().is_empty() => Some(text.trim().to_string()),
                _ => None,
            })
    }

    fn grounding(&self) -> Vec<GroundingReference> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|g| g.grounding_chunks.clone())
            .unwrap_or_default()
    }
}

fn extract_first_inline(resp: &GeminiResponse) -> Option<MediaAttachment> {
    for c in &resp.candidates {
        for p in &c.content.parts {
            if let Part::Inline { inline_data } = p {
                info!("🎯 Found inline data with mime type: {}", inline_data.mime_type);
                return Some(MediaAttachment::from_base64(inline_data.data.clone(), inline_data.mime_type.clone()));
            }
        }
    }
    info!("⚠️ No inline data found in response structure");
    None
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)] done: bool,
    #[serde(default)] response: Option<OperationResponse>,
    #[serde(default)] error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    #[serde(default)] generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)] generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample { video: VideoFile }

#[derive(Debug, Deserialize)]
struct VideoFile { uri: String }

impl Operation {
    fn into_job(self) -> GenerationJob {
        let result = self
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().next())
            .map(|s| ResultReference { uri: s.video.uri });
        GenerationJob {
            handle: JobHandle(self.name),
            done: self.done,
            result,
            error: self.error.map(|e| {
                if e.message.is_empty() { "unknown error".to_string() } else { e.message }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn truncates_long_payloads_only() {
        let long = "A".repeat(400);
        let mut v = json!({ "parts": [{ "inlineData": { "data": long, "mimeType": "image/png" } }, { "text": "A".repeat(400) }] });
        truncate_base64_in_json(&mut v);
        let data = v["parts"][0]["inlineData"]["data"].as_str().unwrap();
        assert!(data.ends_with("[truncated 350 chars]"));
        assert_eq!(v["parts"][1]["text"].as_str().unwrap().len(), 400);
    }

    #[test]
    fn operation_maps_to_job() {
        let raw = r#"{
            "name": "models/veo/operations/op1",
            "done": true,
            "response": { "generateVideoResponse": { "generatedSamples": [ { "video": { "uri": "https://files/abc:download?alt=media" } } ] } }
        }"#;
        let job = serde_json::from_str::<Operation>(raw).unwrap().into_job();
        assert_eq!(job.handle, JobHandle("models/veo/operations/op1".into()));
        assert!(job.done);
        assert_eq!(job.result.unwrap().uri, "https://files/abc:download?alt=media");

        let pending = serde_json::from_str::<Operation>(r#"{"name":"op2"}"#).unwrap().into_job();
        assert!(!pending.done);
        assert_eq!(pending.result, None);

        let failed = serde_json::from_str::<Operation>(r#"{"name":"op3","done":true,"error":{"code":3,"message":"blocked"}}"#)
            .unwrap()
            .into_job();
        assert_eq!(failed.error.as_deref(), Some("blocked"));
    }

    #[test]
    fn video_request_body_shape() {
        let start = MediaAttachment::from_base64("START", "image/png");
        let end = MediaAttachment::from_base64("END", "image/jpeg");
        let body = VeoRequest {
            instances: [VeoInstance { prompt: "spin", image: VeoImage::from(&start), last_frame: Some(VeoImage::from(&end)) }],
            parameters: VeoParameters { aspect_ratio: "16:9", resolution: "720p", sample_count: None },
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["instances"][0]["image"]["bytesBase64Encoded"], "START");
        assert_eq!(v["instances"][0]["lastFrame"]["mimeType"], "image/jpeg");
        assert_eq!(v["parameters"], json!({ "aspectRatio": "16:9", "resolution": "720p" }));
    }

    #[test]
    fn status_errors_detect_rejected_keys() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key."}}"#;
        assert!(matches!(status_error(StatusCode::BAD_REQUEST, body), StudioError::CredentialRejected(_)));
        assert!(matches!(status_error(StatusCode::FORBIDDEN, "nope"), StudioError::CredentialRejected(_)));
        assert!(matches!(status_error(StatusCode::INTERNAL_SERVER_ERROR, "boom"), StudioError::Http(_)));
    }
}
