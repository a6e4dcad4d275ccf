use reqwest::Url;
use serde::{Serialize, Deserialize};
use serde_with::skip_serializing_none;

use crate::error::{StudioError, StudioResult};
use crate::media::MediaAttachment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImageAspectRatio {
    #[default]
    #[serde(rename = "1:1")] Square,
    #[serde(rename = "3:4")] Portrait3x4,
    #[serde(rename = "4:3")] Landscape4x3,
    #[serde(rename = "9:16")] Portrait9x16,
    #[serde(rename = "16:9")] Landscape16x9,
}

impl ImageAspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait3x4 => "3:4",
            Self::Landscape4x3 => "4:3",
            Self::Portrait9x16 => "9:16",
            Self::Landscape16x9 => "16:9",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImageResolution {
    #[default]
    #[serde(rename = "2K")] TwoK,
    #[serde(rename = "4K")] FourK,
    #[serde(rename = "8K")] EightK,
}

impl ImageResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwoK => "2K",
            Self::FourK => "4K",
            Self::EightK => "8K",
        }
    }
}

/// Preset output size in pixels (width, height).
pub fn pixel_dimensions(aspect: ImageAspectRatio, resolution: ImageResolution) -> (u32, u32) {
    let long_edge = match resolution {
        ImageResolution::TwoK => 2048,
        ImageResolution::FourK => 4096,
        ImageResolution::EightK => 8192,
    };
    match aspect {
        ImageAspectRatio::Square => (long_edge, long_edge),
        ImageAspectRatio::Portrait3x4 => (long_edge * 3 / 4, long_edge),
        ImageAspectRatio::Landscape4x3 => (long_edge, long_edge * 3 / 4),
        ImageAspectRatio::Portrait9x16 => (long_edge * 9 / 16, long_edge),
        ImageAspectRatio::Landscape16x9 => (long_edge, long_edge * 9 / 16),
    }
}

/// Picks the preset aspect closest in spirit to a source image's shape.
pub fn suggest_aspect_ratio(width: u32, height: u32) -> ImageAspectRatio {
    if width == 0 || height == 0 {
        return ImageAspectRatio::Square;
    }
    let ratio = width as f64 / height as f64;
    if ratio > 0.9 && ratio < 1.1 {
        ImageAspectRatio::Square
    } else if ratio >= 1.5 {
        ImageAspectRatio::Landscape16x9
    } else if ratio > 1.1 {
        ImageAspectRatio::Landscape4x3
    } else if ratio < 0.6 {
        ImageAspectRatio::Portrait9x16
    } else if ratio < 0.9 {
        ImageAspectRatio::Portrait3x4
    } else {
        ImageAspectRatio::Square
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VideoAspectRatio {
    #[default]
    #[serde(rename = "16:9")] Landscape,
    #[serde(rename = "9:16")] Portrait,
}

impl VideoAspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VideoResolution {
    #[default]
    #[serde(rename = "720p")] Hd,
    #[serde(rename = "1080p")] FullHd,
}

impl VideoResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hd => "720p",
            Self::FullHd => "1080p",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    Center,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    #[default]
    BottomRight,
}

impl WatermarkPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopLeft => "top-left",
            Self::TopCenter => "top-center",
            Self::TopRight => "top-right",
            Self::MiddleLeft => "middle-left",
            Self::Center => "center",
            Self::MiddleRight => "middle-right",
            Self::BottomLeft => "bottom-left",
            Self::BottomCenter => "bottom-center",
            Self::BottomRight => "bottom-right",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::TopLeft => "the top-left corner",
            Self::TopCenter => "the top center",
            Self::TopRight => "the top-right corner",
            Self::MiddleLeft => "the middle of the left edge",
            Self::Center => "the exact center",
            Self::MiddleRight => "the middle of the right edge",
            Self::BottomLeft => "the bottom-left corner",
            Self::BottomCenter => "the bottom center",
            Self::BottomRight => "the bottom-right corner",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkKind {
    #[default]
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkSpec {
    pub enabled: bool,
    #[serde(default)]
    pub kind: WatermarkKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(skip)]
    pub image: Option<MediaAttachment>,
    #[serde(default)]
    pub position: WatermarkPosition,
    /// 0.0 to 1.0
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

fn default_opacity() -> f32 { 0.5 }

impl WatermarkSpec {
    pub fn text(text: impl Into<String>, position: WatermarkPosition, opacity: f32) -> Self {
        Self { enabled: true, kind: WatermarkKind::Text, text: Some(text.into()), image: None, position, opacity }
    }

    pub fn image(image: Option<MediaAttachment>, position: WatermarkPosition, opacity: f32) -> Self {
        Self { enabled: true, kind: WatermarkKind::Image, text: None, image, position, opacity }
    }

    pub fn opacity_percent(&self) -> u32 {
        (self.opacity.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

/// Source reference returned next to generated content. Passed through for
/// display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<WebSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maps: Option<MapsSource>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    pub uri: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapsSource {
    pub uri: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub place_answer_sources: Option<PlaceAnswerSources>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlaceAnswerSources {
    #[serde(default)]
    pub review_snippets: Option<Vec<ReviewSnippet>>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSnippet {
    pub uri: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Still-image result: the decoded media plus pass-through references.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaResult {
    pub media: MediaAttachment,
    pub grounding: Vec<GroundingReference>,
}

/// Text returned by prompt extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptSuggestion {
    pub text: String,
    pub grounding: Vec<GroundingReference>,
}

/// Where a finished video lives. The URI alone is not enough to fetch it: the
/// active credential has to be attached first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultReference {
    pub uri: String,
}

impl ResultReference {
    pub fn with_credential(&self, key: &str) -> StudioResult<String> {
        let mut url = Url::parse(&self.uri)
            .map_err(|e| StudioError::Http(format!("invalid result URI {}: {}", self.uri, e)))?;
        url.query_pairs_mut().append_pair("key", key);
        Ok(url.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancementResult {
    pub music: String,
    pub subtitles: Vec<String>,
    #[serde(rename = "script")]
    pub voice_over_script: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pixel_presets_match_catalogue() {
        assert_eq!(pixel_dimensions(ImageAspectRatio::Landscape16x9, ImageResolution::TwoK), (2048, 1152));
        assert_eq!(pixel_dimensions(ImageAspectRatio::Portrait3x4, ImageResolution::FourK), (3072, 4096));
        assert_eq!(pixel_dimensions(ImageAspectRatio::Portrait9x16, ImageResolution::EightK), (4608, 8192));
    }

    #[test]
    fn aspect_suggestions_follow_shape() {
        assert_eq!(suggest_aspect_ratio(1000, 1000), ImageAspectRatio::Square);
        assert_eq!(suggest_aspect_ratio(1920, 1080), ImageAspectRatio::Landscape16x9);
        assert_eq!(suggest_aspect_ratio(1200, 1000), ImageAspectRatio::Landscape4x3);
        assert_eq!(suggest_aspect_ratio(500, 1000), ImageAspectRatio::Portrait9x16);
        assert_eq!(suggest_aspect_ratio(750, 1000), ImageAspectRatio::Portrait3x4);
    }

    #[test]
    fn credential_attachment_respects_existing_query() {
        let plain = ResultReference { uri: "https://x/v1/files/a:download".into() };
        assert_eq!(plain.with_credential("k").unwrap(), "https://x/v1/files/a:download?key=k");
        let query = ResultReference { uri: "https://x/files/a?alt=media".into() };
        assert_eq!(query.with_credential("k").unwrap(), "https://x/files/a?alt=media&key=k");
    }

    #[test]
    fn credential_is_percent_encoded() {
        let reference = ResultReference { uri: "https://x/files/a?alt=media".into() };
        assert_eq!(
            reference.with_credential("a&b+c=d").unwrap(),
            "https://x/files/a?alt=media&key=a%26b%2Bc%3Dd"
        );
        let broken = ResultReference { uri: "not a url".into() };
        assert!(matches!(broken.with_credential("k"), Err(StudioError::Http(_))));
    }

    #[test]
    fn maps_grounding_passes_through_unchanged() {
        let raw = serde_json::json!({
            "maps": {
                "uri": "https://maps.example/place/1",
                "title": "Corner Store",
                "placeAnswerSources": {
                    "reviewSnippets": [
                        { "uri": "https://maps.example/review/9", "text": "Great bottles." },
                        { "uri": "https://maps.example/review/10", "title": "Local guide" }
                    ]
                }
            }
        });
        let parsed: GroundingReference = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&parsed).unwrap(), raw);

        let empty = serde_json::json!({ "maps": { "uri": "https://maps.example/p", "placeAnswerSources": {} } });
        let parsed: GroundingReference = serde_json::from_value(empty.clone()).unwrap();
        assert_eq!(serde_json::to_value(&parsed).unwrap(), empty);
    }

    #[test]
    fn enums_use_wire_names() {
        assert_eq!(serde_json::to_string(&WatermarkPosition::BottomRight).unwrap(), "\"bottom-right\"");
        assert_eq!(serde_json::to_string(&ImageAspectRatio::Landscape16x9).unwrap(), "\"16:9\"");
        let v: VideoResolution = serde_json::from_str("\"1080p\"").unwrap();
        assert_eq!(v, VideoResolution::FullHd);
    }
}
