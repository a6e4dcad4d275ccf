//! Builds generation requests from the user's current selections.
//!
//! Attachment order is fixed: product, model, background, watermark image.
//! The instruction text refers to attachments by position, so that order is
//! part of the contract. The watermark image is always appended last and the
//! instruction calls it "the last image provided" rather than numbering it.

use tracing::debug;

use crate::error::{StudioError, StudioResult};
use crate::media::MediaAttachment;
use crate::models::{
    pixel_dimensions, ImageAspectRatio, ImageResolution, VideoAspectRatio, VideoResolution,
    WatermarkKind, WatermarkSpec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentRole {
    Product,
    Model,
    Background,
    Watermark,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoledAttachment {
    pub role: AttachmentRole,
    pub media: MediaAttachment,
}

/// One element of the ordered request sent to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart<'a> {
    Media(&'a MediaAttachment),
    Text(&'a str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub attachments: Vec<RoledAttachment>,
    pub instruction: String,
    pub aspect: ImageAspectRatio,
    pub resolution: ImageResolution,
}

impl ImageRequest {
    /// Attachments in order, then the instruction as the final element.
    pub fn parts(&self) -> Vec<RequestPart<'_>> {
        self.attachments
            .iter()
            .map(|a| RequestPart::Media(&a.media))
            .chain(std::iter::once(RequestPart::Text(self.instruction.as_str())))
            .collect()
    }

    pub fn roles(&self) -> Vec<AttachmentRole> {
        self.attachments.iter().map(|a| a.role).collect()
    }
}

/// Everything the user picked for a still image.
#[derive(Debug, Clone, Default)]
pub struct ImageSelections {
    pub product: Option<MediaAttachment>,
    pub model: Option<MediaAttachment>,
    pub background: Option<MediaAttachment>,
    pub scene: String,
    pub aspect: ImageAspectRatio,
    pub resolution: ImageResolution,
    pub watermark: Option<WatermarkSpec>,
}

fn ordinal(n: usize) -> &'static str {
    match n {
        1 => "first",
        2 => "second",
        3 => "third",
        _ => "next",
    }
}

fn scene_sentence(scene: &str) -> String {
    format!("Scene description: {}.", scene.trim().trim_end_matches('.'))
}

pub fn compose_image_request(sel: ImageSelections) -> StudioResult<ImageRequest> {
    let product = sel.product.ok_or(StudioError::MissingRequiredInput("product image"))?;
    if sel.scene.trim().is_empty() {
        return Err(StudioError::MissingRequiredInput("scene description"));
    }

    // Resolve the watermark before anything else so an incomplete one fails
    // without side effects.
    let watermark = match sel.watermark.filter(|w| w.enabled) {
        Some(w) if w.kind == WatermarkKind::Image && w.image.is_none() => {
            return Err(StudioError::MissingWatermarkAsset);
        }
        other => other,
    };

    let (width, height) = pixel_dimensions(sel.aspect, sel.resolution);
    let mut attachments = vec![RoledAttachment { role: AttachmentRole::Product, media: product }];
    let mut directives = vec![
        "Create an advertising image for the product shown in the first image provided.".to_string(),
        scene_sentence(&sel.scene),
        format!(
            "Make sure the image has a {} aspect ratio and {} quality ({}x{} px).",
            sel.aspect.as_str(),
            sel.resolution.as_str(),
            width,
            height
        ),
    ];

    if let Some(model) = sel.model {
        attachments.push(RoledAttachment { role: AttachmentRole::Model, media: model });
        directives.push(format!(
            "Integrate the model from the {} image into the scene. Make sure the model interacts with the product naturally, as described.",
            ordinal(attachments.len())
        ));
    }

    if let Some(background) = sel.background {
        attachments.push(RoledAttachment { role: AttachmentRole::Background, media: background });
        directives.push(format!(
            "Use the {} image provided as the primary backdrop for the advertisement. Place the product and the model (if any) into this setting naturally and harmoniously.",
            ordinal(attachments.len())
        ));
    }

    if let Some(w) = watermark {
        let opacity = w.opacity_percent();
        match w.kind {
            WatermarkKind::Text => {
                if let Some(text) = w.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                    directives.push(format!(
                        "Add a text watermark \"{}\" at the {} position ({}) with {}% opacity.",
                        text,
                        w.position.as_str(),
                        w.position.describe(),
                        opacity
                    ));
                }
            }
            WatermarkKind::Image => {
                if let Some(image) = w.image {
                    attachments.push(RoledAttachment { role: AttachmentRole::Watermark, media: image });
                    directives.push(format!(
                        "Use the last image provided as the watermark, placing it at the {} position ({}) with {}% opacity. Make the watermark look professional and blend in with the image.",
                        w.position.as_str(),
                        w.position.describe(),
                        opacity
                    ));
                }
            }
        }
    }

    let request = ImageRequest {
        attachments,
        instruction: directives.join(" "),
        aspect: sel.aspect,
        resolution: sel.resolution,
    };
    debug!(roles = ?request.roles(), "Composed image request");
    Ok(request)
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoRequest {
    pub start_frame: MediaAttachment,
    pub end_frame: Option<MediaAttachment>,
    pub instruction: String,
    pub aspect: VideoAspectRatio,
    pub resolution: VideoResolution,
}

#[derive(Debug, Clone, Default)]
pub struct VideoSelections {
    pub start_frame: Option<MediaAttachment>,
    pub end_frame: Option<MediaAttachment>,
    pub prompt: String,
    pub aspect: VideoAspectRatio,
    pub resolution: VideoResolution,
}

pub fn compose_video_request(sel: VideoSelections) -> StudioResult<VideoRequest> {
    let start_frame = sel.start_frame.ok_or(StudioError::MissingRequiredInput("start frame"))?;
    let instruction = sel.prompt.trim();
    if instruction.is_empty() {
        return Err(StudioError::MissingRequiredInput("scene description"));
    }
    Ok(VideoRequest {
        start_frame,
        end_frame: sel.end_frame,
        instruction: instruction.to_string(),
        aspect: sel.aspect,
        resolution: sel.resolution,
    })
}

/// Instruction used when asking the text model to describe an uploaded image.
pub const EXTRACTION_INSTRUCTION: &str = "Analyze this product image. Describe the product, its key features, its packaging and the visual effects best suited to a high-quality advertising campaign. Focus on lighting, background, composition and emotion. Write a detailed, compelling prompt (about 200-300 words) for an image-generation AI, aiming for an elegant and impactful visual. Take current advertising trends for similar products into account.";

/// Instruction for deriving music, subtitles and a voice-over script.
pub fn enhancement_instruction(original: &str) -> String {
    format!(
        "You are the creative director of a short product advertisement video. The video was generated from this description: \"{}\". \
        Suggest a background music style, 3 to 5 short subtitle lines shown in order, and a voice-over script of at most 60 words. \
        Answer only with JSON containing the fields music, subtitles and script.",
        original.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WatermarkPosition;
    use pretty_assertions::assert_eq;

    fn att(tag: &str) -> MediaAttachment {
        MediaAttachment::from_base64(tag, "image/png")
    }

    fn base(scene: &str) -> ImageSelections {
        ImageSelections { product: Some(att("product")), scene: scene.into(), ..Default::default() }
    }

    #[test]
    fn product_only_has_one_attachment_and_trailing_instruction() {
        let req = compose_image_request(base("blue bottle on white")).unwrap();
        let parts = req.parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], RequestPart::Media(&att("product")));
        assert!(matches!(parts[1], RequestPart::Text(_)));
        assert!(req.instruction.contains("blue bottle on white"));
        assert!(!req.instruction.contains("model"));
        assert!(!req.instruction.contains("backdrop"));
        assert!(!req.instruction.contains("watermark"));
    }

    #[test]
    fn model_and_text_watermark() {
        let mut sel = base("athlete holding the bottle");
        sel.model = Some(att("model"));
        sel.watermark = Some(WatermarkSpec::text("Copyright", WatermarkPosition::BottomRight, 0.5));
        let req = compose_image_request(sel).unwrap();

        assert_eq!(req.roles(), vec![AttachmentRole::Product, AttachmentRole::Model]);
        assert_eq!(req.parts().len(), 3);
        assert!(req.instruction.contains("bottom-right"));
        assert!(req.instruction.contains("50%"));
        assert!(req.instruction.contains("\"Copyright\""));
        assert!(req.instruction.contains("second image"));
    }

    #[test]
    fn full_order_with_image_watermark_last() {
        let mut sel = base("beach sunset");
        sel.model = Some(att("model"));
        sel.background = Some(att("background"));
        sel.watermark = Some(WatermarkSpec::image(Some(att("logo")), WatermarkPosition::TopLeft, 0.25));
        let req = compose_image_request(sel).unwrap();

        assert_eq!(
            req.roles(),
            vec![AttachmentRole::Product, AttachmentRole::Model, AttachmentRole::Background, AttachmentRole::Watermark]
        );
        let parts = req.parts();
        assert_eq!(parts[3], RequestPart::Media(&att("logo")));
        assert!(matches!(parts.last(), Some(RequestPart::Text(_))));
        assert!(req.instruction.contains("the last image provided as the watermark"));
        assert!(req.instruction.contains("third image provided as the primary backdrop"));
        assert!(req.instruction.contains("25%"));
    }

    #[test]
    fn background_without_model_is_second() {
        let mut sel = base("kitchen");
        sel.background = Some(att("background"));
        let req = compose_image_request(sel).unwrap();
        assert_eq!(req.roles(), vec![AttachmentRole::Product, AttachmentRole::Background]);
        assert!(req.instruction.contains("second image provided as the primary backdrop"));
    }

    #[test]
    fn image_watermark_without_asset_fails() {
        let mut sel = base("studio");
        sel.watermark = Some(WatermarkSpec::image(None, WatermarkPosition::Center, 1.0));
        assert!(matches!(compose_image_request(sel), Err(StudioError::MissingWatermarkAsset)));
    }

    #[test]
    fn disabled_watermark_is_ignored() {
        let mut sel = base("studio");
        let mut w = WatermarkSpec::image(None, WatermarkPosition::Center, 1.0);
        w.enabled = false;
        sel.watermark = Some(w);
        let req = compose_image_request(sel).unwrap();
        assert_eq!(req.attachments.len(), 1);
    }

    #[test]
    fn empty_watermark_text_emits_no_directive() {
        let mut sel = base("studio");
        sel.watermark = Some(WatermarkSpec::text("  ", WatermarkPosition::Center, 0.5));
        let req = compose_image_request(sel).unwrap();
        assert!(!req.instruction.contains("watermark"));
    }

    #[test]
    fn missing_inputs() {
        let no_product = ImageSelections { scene: "x".into(), ..Default::default() };
        assert!(matches!(compose_image_request(no_product), Err(StudioError::MissingRequiredInput("product image"))));
        assert!(matches!(compose_image_request(base("   ")), Err(StudioError::MissingRequiredInput(_))));
    }

    #[test]
    fn instruction_names_aspect_and_resolution() {
        let mut sel = base("desk");
        sel.aspect = ImageAspectRatio::Landscape16x9;
        sel.resolution = ImageResolution::FourK;
        let req = compose_image_request(sel).unwrap();
        assert!(req.instruction.contains("16:9 aspect ratio and 4K quality (4096x2304 px)"));
    }

    #[test]
    fn video_request_requires_start_frame_and_prompt() {
        let ok = compose_video_request(VideoSelections {
            start_frame: Some(att("start")),
            prompt: "  spinning bottle  ".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(ok.instruction, "spinning bottle");
        assert_eq!(ok.end_frame, None);

        let err = compose_video_request(VideoSelections { prompt: "x".into(), ..Default::default() });
        assert!(matches!(err, Err(StudioError::MissingRequiredInput("start frame"))));
    }
}
