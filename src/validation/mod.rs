//! Structural validation of fetched guides
//!
//! A payload is only trusted once it decompresses, parses, and every
//! programme is well-formed against the declared channels. There is no partial
//! acceptance: the first violation rejects the whole document.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::models::epg::format_xmltv_time;
use crate::models::{EpgDocument, RawDocument};
use crate::utils::{CompressionFormat, DecompressionService};
use crate::xmltv::parse_document;

/// A document that passed every check, plus what it took to get there
#[derive(Debug, Clone)]
pub struct ValidatedDocument {
    pub document: EpgDocument,
    pub compression: CompressionFormat,
    pub compressed_bytes: usize,
    pub decompressed_bytes: usize,
}

pub struct DocumentValidator;

impl DocumentValidator {
    pub fn validate(raw: &RawDocument) -> AppResult<ValidatedDocument> {
        debug!(
            role = %raw.source_role,
            "Validating {} byte payload",
            raw.content_length()
        );
        let validated = Self::validate_bytes(&raw.payload)?;
        info!(
            role = %raw.source_role,
            "Document valid: {} channels, {} programmes",
            validated.document.channels.len(),
            validated.document.programmes.len()
        );
        Ok(validated)
    }

    /// Decompress (if needed), parse and check a payload
    pub fn validate_bytes(payload: &[u8]) -> AppResult<ValidatedDocument> {
        let compression = DecompressionService::detect_compression_format(payload);
        let xml = DecompressionService::decompress(payload)
            .map_err(|e| AppError::malformed(format!("payload does not decompress: {e:#}")))?;

        let document = parse_document(&xml)?;
        Self::check_structure(&document)?;

        Ok(ValidatedDocument {
            compression,
            compressed_bytes: payload.len(),
            decompressed_bytes: xml.len(),
            document,
        })
    }

    /// Channel/programme presence and per-programme invariants
    pub fn check_structure(document: &EpgDocument) -> AppResult<()> {
        if document.channels.is_empty() {
            return Err(AppError::malformed("document declares no channels"));
        }
        if document.programmes.is_empty() {
            return Err(AppError::malformed("document contains no programmes"));
        }

        let channel_ids: HashSet<&str> = document.channels.iter().map(|c| c.id.as_str()).collect();

        for (index, programme) in document.programmes.iter().enumerate() {
            let start = format_xmltv_time(&programme.start);
            let Some(stop) = programme.stop else {
                return Err(AppError::malformed(format!(
                    "programme #{index} on channel '{}' starting {start} has no stop time",
                    programme.channel_id
                )));
            };
            if programme.start >= stop {
                return Err(AppError::malformed(format!(
                    "programme #{index} on channel '{}' starts {start} but stops {}",
                    programme.channel_id,
                    format_xmltv_time(&stop)
                )));
            }
            if !channel_ids.contains(programme.channel_id.as_str()) {
                return Err(AppError::malformed(format!(
                    "programme #{index} starting {start} references undeclared channel '{}'",
                    programme.channel_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn guide(programmes: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<tv>
  <channel id="C1"><display-name>One</display-name></channel>
  {programmes}
</tv>"#
        )
    }

    const GOOD: &str = r#"<programme start="20250101060000 +0000" stop="20250101070000 +0000" channel="C1"><title>News</title></programme>"#;

    #[test]
    fn test_accepts_gzip_payload() {
        let xml = guide(GOOD);
        let gz = DecompressionService::compress_gzip(xml.as_bytes()).unwrap();

        let validated = DocumentValidator::validate_bytes(&gz).unwrap();
        assert_eq!(validated.compression, CompressionFormat::Gzip);
        assert_eq!(validated.decompressed_bytes, xml.len());
        assert_eq!(validated.document.programmes.len(), 1);
    }

    #[test]
    fn test_accepts_plain_payload() {
        let validated = DocumentValidator::validate_bytes(guide(GOOD).as_bytes()).unwrap();
        assert_eq!(validated.compression, CompressionFormat::Uncompressed);
    }

    #[rstest]
    #[case::stop_before_start(
        r#"<programme start="20250101070000 +0000" stop="20250101060000 +0000" channel="C1"/>"#,
        "stops"
    )]
    #[case::zero_length(
        r#"<programme start="20250101060000 +0000" stop="20250101060000 +0000" channel="C1"/>"#,
        "stops"
    )]
    #[case::missing_stop(
        r#"<programme start="20250101060000 +0000" channel="C1"/>"#,
        "no stop time"
    )]
    #[case::undeclared_channel(
        r#"<programme start="20250101060000 +0000" stop="20250101070000 +0000" channel="C9"/>"#,
        "undeclared channel 'C9'"
    )]
    #[case::no_programmes("", "no programmes")]
    fn test_rejects_invalid_programmes(#[case] programmes: &str, #[case] expected: &str) {
        let err = DocumentValidator::validate_bytes(guide(programmes).as_bytes()).unwrap_err();
        assert_eq!(err.kind(), "malformed_document");
        assert!(err.to_string().contains(expected), "{err}");
    }

    #[test]
    fn test_rejects_document_without_channels() {
        let err = DocumentValidator::validate_bytes(b"<tv></tv>").unwrap_err();
        assert!(matches!(err, AppError::MalformedDocument { .. }));
        assert!(err.to_string().contains("no channels"));
    }

    #[test]
    fn test_rejects_corrupt_gzip() {
        let gz = DecompressionService::compress_gzip(guide(GOOD).as_bytes()).unwrap();
        let err = DocumentValidator::validate_bytes(&gz[..gz.len() - 12]).unwrap_err();
        assert!(err.to_string().contains("does not decompress"));
    }

    #[test]
    fn test_rejects_non_xml() {
        let err = DocumentValidator::validate_bytes(b"{\"not\": \"xml\"}").unwrap_err();
        assert_eq!(err.kind(), "malformed_document");
    }
}
