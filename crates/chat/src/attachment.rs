//! Attachment decoding.
//!
//! Clients send attachments as base64, optionally wrapped in a data URL
//! (`data:image/png;base64,...`). Images are decoded once to reject corrupt
//! payloads before anything reaches the provider.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use nodu_core::error::ChatError;
use nodu_core::provider::Attachment;

/// Non-image media types accepted as attachments.
const DOCUMENT_TYPES: &[&str] = &["application/pdf"];

/// An attachment as received from the client, still base64-encoded.
#[derive(Clone)]
pub struct RawAttachment {
    /// Base64 payload, with or without a `data:...;base64,` prefix
    pub data: String,
    /// Declared media type
    pub mime_type: Option<String>,
}

impl std::fmt::Debug for RawAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawAttachment")
            .field("mime_type", &self.mime_type)
            .field("encoded_len", &self.data.len())
            .finish()
    }
}

impl RawAttachment {
    /// Build from the optional request fields. Returns `None` when no payload
    /// was sent.
    pub fn from_parts(data: Option<String>, mime_type: Option<String>) -> Option<Self> {
        let data = data.filter(|d| !d.trim().is_empty())?;
        Some(Self {
            data,
            mime_type: mime_type.filter(|m| !m.trim().is_empty()),
        })
    }
}

/// Decode and validate an attachment.
///
/// CPU-bound for images; call it off the async runtime.
pub fn decode(raw: RawAttachment) -> Result<Attachment, ChatError> {
    let media_type = raw
        .mime_type
        .map(|m| m.trim().to_ascii_lowercase())
        .ok_or_else(|| ChatError::Attachment("missing mime_type".into()))?;

    let is_image = media_type.starts_with("image/");
    if !is_image && !DOCUMENT_TYPES.contains(&media_type.as_str()) {
        return Err(ChatError::Attachment(format!(
            "unsupported media type {media_type}"
        )));
    }

    let payload = match raw.data.split_once(',') {
        Some((_, rest)) => rest,
        None => raw.data.as_str(),
    };
    let bytes = BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|e| ChatError::Attachment(format!("invalid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(ChatError::Attachment("empty payload".into()));
    }

    if is_image {
        image::load_from_memory(&bytes)
            .map_err(|e| ChatError::Attachment(format!("corrupt image: {e}")))?;
    }

    Ok(Attachment::new(media_type, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_base64() -> String {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([200, 10, 10]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        BASE64_STANDARD.encode(buf.into_inner())
    }

    #[test]
    fn decodes_plain_base64_image() {
        let raw = RawAttachment {
            data: png_base64(),
            mime_type: Some("image/png".into()),
        };
        let att = decode(raw).unwrap();
        assert_eq!(att.media_type, "image/png");
        assert!(att.is_image());
        assert!(att.data.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn strips_data_url_prefix() {
        let raw = RawAttachment {
            data: format!("data:image/png;base64,{}", png_base64()),
            mime_type: Some("IMAGE/PNG".into()),
        };
        assert_eq!(decode(raw).unwrap().media_type, "image/png");
    }

    #[test]
    fn corrupt_image_rejected() {
        let raw = RawAttachment {
            data: BASE64_STANDARD.encode(b"definitely not a png"),
            mime_type: Some("image/png".into()),
        };
        let err = decode(raw).unwrap_err();
        assert!(matches!(err, ChatError::Attachment(ref m) if m.contains("corrupt image")));
    }

    #[test]
    fn pdf_passes_through_unvalidated() {
        let raw = RawAttachment {
            data: BASE64_STANDARD.encode(b"%PDF-1.4 ..."),
            mime_type: Some("application/pdf".into()),
        };
        let att = decode(raw).unwrap();
        assert!(!att.is_image());
        assert!(att.data.starts_with(b"%PDF"));
    }

    #[test]
    fn missing_mime_type_rejected() {
        let raw = RawAttachment::from_parts(Some(png_base64()), Some("  ".into())).unwrap();
        assert!(matches!(decode(raw), Err(ChatError::Attachment(_))));
    }

    #[test]
    fn unsupported_type_rejected() {
        let raw = RawAttachment {
            data: BASE64_STANDARD.encode(b"MZ"),
            mime_type: Some("application/x-msdownload".into()),
        };
        assert!(matches!(
            decode(raw),
            Err(ChatError::Attachment(ref m)) if m.contains("unsupported")
        ));
    }

    #[test]
    fn invalid_base64_rejected() {
        let raw = RawAttachment {
            data: "!!!not base64!!!".into(),
            mime_type: Some("application/pdf".into()),
        };
        assert!(matches!(decode(raw), Err(ChatError::Attachment(ref m)) if m.contains("base64")));
    }

    #[test]
    fn no_payload_means_no_attachment() {
        assert!(RawAttachment::from_parts(None, Some("image/png".into())).is_none());
        assert!(RawAttachment::from_parts(Some(String::new()), None).is_none());
    }
}
