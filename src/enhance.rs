//! Music, subtitle and voice-over suggestions derived after a video succeeds.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::credentials::ApiCredential;
use crate::error::{StudioError, StudioResult};
use crate::models::EnhancementResult;
use crate::prompt::enhancement_instruction;

/// A text call constrained to a JSON response schema; returns the raw text.
#[async_trait]
pub trait StructuredTextService: Send + Sync {
    async fn generate_structured(&self, credential: &ApiCredential, prompt: &str, schema: &Value) -> StudioResult<String>;
}

pub fn enhancement_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "music": { "type": "STRING", "description": "Suggested background music style" },
            "subtitles": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "Subtitle lines in display order"
            },
            "script": { "type": "STRING", "description": "Voice-over script" }
        },
        "required": ["music", "subtitles", "script"],
        "propertyOrdering": ["music", "subtitles", "script"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnhancementWire {
    music: String,
    subtitles: Vec<String>,
    script: String,
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// Parses exactly `{music, subtitles, script}`; anything else is malformed.
pub fn parse_enhancements(raw: &str) -> StudioResult<EnhancementResult> {
    let wire: EnhancementWire = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| StudioError::MalformedEnhancementResponse(e.to_string()))?;
    Ok(EnhancementResult {
        music: wire.music,
        subtitles: wire.subtitles,
        voice_over_script: wire.script,
    })
}

/// Only called once a video job has succeeded.
pub async fn derive_enhancements(
    service: &dyn StructuredTextService,
    credential: &ApiCredential,
    original_instruction: &str,
) -> StudioResult<EnhancementResult> {
    let prompt = enhancement_instruction(original_instruction);
    let raw = service
        .generate_structured(credential, &prompt, &enhancement_schema())
        .await
        .map_err(StudioError::classify)?;
    let result = parse_enhancements(&raw)?;
    info!(subtitles = result.subtitles.len(), "Derived video enhancements");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_and_fenced_json() {
        let raw = r#"{"music":"upbeat synth","subtitles":["Fresh.","Bold."],"script":"Meet the bottle."}"#;
        let parsed = parse_enhancements(raw).unwrap();
        assert_eq!(parsed.music, "upbeat synth");
        assert_eq!(parsed.subtitles, vec!["Fresh.".to_string(), "Bold.".to_string()]);
        assert_eq!(parsed.voice_over_script, "Meet the bottle.");

        let fenced = format!("```json\n{}\n```", raw);
        assert_eq!(parse_enhancements(&fenced).unwrap(), parsed);
    }

    #[test]
    fn schema_violations_are_malformed() {
        for raw in [
            "not json",
            r#"{"music":"x","subtitles":"one line","script":"s"}"#,
            r#"{"music":"x","script":"s"}"#,
            r#"{"music":"x","subtitles":[],"script":"s","mood":"happy"}"#,
        ] {
            assert!(
                matches!(parse_enhancements(raw), Err(StudioError::MalformedEnhancementResponse(_))),
                "{raw}"
            );
        }
    }

    struct Canned(&'static str);

    #[async_trait]
    impl StructuredTextService for Canned {
        async fn generate_structured(&self, _: &ApiCredential, prompt: &str, schema: &Value) -> StudioResult<String> {
            assert!(prompt.contains("red sneakers"));
            assert_eq!(schema["required"], json!(["music", "subtitles", "script"]));
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn derive_uses_original_instruction() {
        let service = Canned(r#"{"music":"lofi","subtitles":["Run."],"script":"Go further."}"#);
        let result = derive_enhancements(&service, &ApiCredential::new("k"), "red sneakers on a track")
            .await
            .unwrap();
        assert_eq!(result.music, "lofi");
    }
}
