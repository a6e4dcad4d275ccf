//! Turning user-supplied image binaries into request attachments.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{StudioError, StudioResult};

/// Base64 payload plus MIME type, ready to embed in a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttachment {
    data: String,
    mime_type: String,
}

impl MediaAttachment {
    /// Wraps an already-encoded payload, e.g. inline data from a response.
    pub fn from_base64(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self { data: data.into(), mime_type: mime_type.into() }
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn decode_bytes(&self) -> StudioResult<Vec<u8>> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| StudioError::UnreadableMedia(e.to_string()))
    }

    /// Parses `data:<mime>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> StudioResult<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| StudioError::UnreadableMedia("not a data URL".into()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| StudioError::UnreadableMedia("data URL has no payload".into()))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| StudioError::UnreadableMedia("data URL is not base64".into()))?;
        if mime.is_empty() || payload.is_empty() {
            return Err(StudioError::UnreadableMedia("empty data URL".into()));
        }
        Ok(Self::from_base64(payload, mime))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Encoded attachment with the pixel size found while decoding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub attachment: MediaAttachment,
    pub width: u32,
    pub height: u32,
}

/// Verifies `bytes` decode as an image and encodes them. A declared `image/*`
/// MIME type is kept as given; otherwise it comes from the sniffed format.
pub fn encode(bytes: &[u8], declared_mime: Option<&str>) -> StudioResult<MediaAttachment> {
    inspect(bytes, declared_mime).map(|e| e.attachment)
}

pub fn inspect(bytes: &[u8], declared_mime: Option<&str>) -> StudioResult<EncodedImage> {
    if bytes.is_empty() {
        return Err(StudioError::UnreadableMedia("empty file".into()));
    }
    let format = image::guess_format(bytes)
        .map_err(|e| StudioError::UnreadableMedia(e.to_string()))?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| StudioError::UnreadableMedia(e.to_string()))?;

    let mime_type = declared_mime
        .map(|m| m.split(';').next().unwrap_or(m).trim())
        .filter(|m| m.starts_with("image/"))
        .unwrap_or_else(|| format.to_mime_type())
        .to_string();

    Ok(EncodedImage {
        attachment: MediaAttachment { data: STANDARD.encode(bytes), mime_type },
        width: decoded.width(),
        height: decoded.height(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn encodes_png_and_sniffs_mime() {
        let bytes = png_bytes(4, 2);
        let encoded = inspect(&bytes, None).unwrap();
        assert_eq!(encoded.attachment.mime_type(), "image/png");
        assert_eq!((encoded.width, encoded.height), (4, 2));
        assert_eq!(encoded.attachment.decode_bytes().unwrap(), bytes);
    }

    #[test]
    fn declared_mime_is_preserved() {
        let att = encode(&png_bytes(2, 2), Some("image/x-custom; charset=binary")).unwrap();
        assert_eq!(att.mime_type(), "image/x-custom");
    }

    #[test]
    fn non_image_declared_mime_falls_back_to_sniffed() {
        let att = encode(&png_bytes(2, 2), Some("application/octet-stream")).unwrap();
        assert_eq!(att.mime_type(), "image/png");
    }

    #[test]
    fn garbage_is_unreadable() {
        assert!(matches!(encode(b"definitely not an image", None), Err(StudioError::UnreadableMedia(_))));
        assert!(matches!(encode(&[], None), Err(StudioError::UnreadableMedia(_))));
    }

    #[test]
    fn truncated_png_is_unreadable() {
        let bytes = png_bytes(8, 8);
        assert!(encode(&bytes[..bytes.len() / 2], None).is_err());
    }

    #[test]
    fn data_url_parsing() {
        let att = MediaAttachment::from_data_url("data:image/jpeg;base64,AAAA").unwrap();
        assert_eq!(att.mime_type(), "image/jpeg");
        assert_eq!(att.data(), "AAAA");
        assert_eq!(att.to_data_url(), "data:image/jpeg;base64,AAAA");
        assert!(MediaAttachment::from_data_url("image/jpeg;base64,AAAA").is_err());
        assert!(MediaAttachment::from_data_url("data:image/jpeg,AAAA").is_err());
    }
}
