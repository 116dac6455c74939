//! Attachment reference helpers.
//!
//! Stored attachments are `content-type:url` strings. Adapters may also hand
//! over inline `data:` payloads, which must be decoded and moved to blob
//! storage before the message is persisted.
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::ValidationError;

pub const INLINE_PREFIX: &str = "data:";
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
pub const FALLBACK_EXTENSION: &str = "bin";

/// Only this many leading bytes are inspected when sniffing.
const SNIFF_LEN: usize = 300;

const SIGNATURES: &[(&[u8], usize, &str, &str)] = &[
    (b"%PDF-", 0, "application/pdf", "pdf"),
    (b"OggS", 0, "audio/ogg", "ogg"),
    (b"ID3", 0, "audio/mpeg", "mp3"),
    (b"#!AMR", 0, "audio/amr", "amr"),
    (b"WAVE", 8, "audio/x-wav", "wav"),
    (b"ftyp", 4, "video/mp4", "mp4"),
    (b"PK\x03\x04", 0, "application/zip", "zip"),
];

pub fn is_inline(attachment: &str) -> bool {
    attachment.starts_with(INLINE_PREFIX)
}

/// Decodes the payload of an inline attachment.
///
/// Accepts both the bare `data:<base64>` form and RFC 2397
/// `data:<mediatype>;base64,<data>`. Any declared media type is ignored in
/// favour of sniffing the decoded bytes.
pub fn decode_inline(index: usize, attachment: &str) -> Result<Vec<u8>, ValidationError> {
    let body = attachment
        .strip_prefix(INLINE_PREFIX)
        .ok_or_else(|| ValidationError::AttachmentNotDecodable {
            index,
            reason: "not an inline attachment".into(),
        })?;
    let encoded = match body.split_once(',') {
        Some((header, data)) if header.ends_with(";base64") || header.is_empty() => data,
        Some(_) => {
            return Err(ValidationError::AttachmentNotDecodable {
                index,
                reason: "only base64 data is supported".into(),
            });
        }
        None => body,
    };
    STANDARD
        .decode(encoded.trim())
        .map_err(|err| ValidationError::AttachmentNotDecodable {
            index,
            reason: err.to_string(),
        })
}

/// Returns `(content_type, extension)` for the given bytes based on their magic numbers.
pub fn sniff(data: &[u8]) -> (&'static str, &'static str) {
    let head = &data[..data.len().min(SNIFF_LEN)];
    if let Ok(format) = image::guess_format(head) {
        if let Some(ext) = format.extensions_str().first() {
            return (format.to_mime_type(), ext);
        }
    }
    SIGNATURES
        .iter()
        .find(|(magic, offset, _, _)| {
            head.len() >= offset + magic.len() && &head[*offset..offset + magic.len()] == *magic
        })
        .map(|(_, _, mime, ext)| (*mime, *ext))
        .unwrap_or((FALLBACK_CONTENT_TYPE, FALLBACK_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[test]
    fn sniffs_images_and_documents() {
        assert_eq!(sniff(PNG_HEADER), ("image/png", "png"));
        assert_eq!(sniff(b"\xff\xd8\xff\xe0\0\x10JFIF"), ("image/jpeg", "jpg"));
        assert_eq!(sniff(b"%PDF-1.7 ..."), ("application/pdf", "pdf"));
        assert_eq!(sniff(b"\0\0\0\x18ftypmp42"), ("video/mp4", "mp4"));
        assert_eq!(sniff(b"plain words"), (FALLBACK_CONTENT_TYPE, FALLBACK_EXTENSION));
    }

    #[test]
    fn decodes_bare_and_rfc2397_forms() {
        let encoded = STANDARD.encode(PNG_HEADER);
        assert_eq!(decode_inline(0, &format!("data:{encoded}")).unwrap(), PNG_HEADER);
        assert_eq!(
            decode_inline(0, &format!("data:image/png;base64,{encoded}")).unwrap(),
            PNG_HEADER
        );
        let err = decode_inline(3, "data:!!!").unwrap_err();
        assert!(matches!(err, ValidationError::AttachmentNotDecodable { index: 3, .. }));
    }
}
