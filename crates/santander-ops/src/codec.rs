//! Marshaling between descriptors and the bytes carried on the helper channel.
//!
//! Payloads are JSON documents. Frames on the socket are length-prefixed with a
//! 4-byte big-endian header (see [`frame_codec`]). Decoding inspects the
//! document before deserializing the operation so that truncation, version
//! skew and unknown variants are reported distinctly instead of surfacing as a
//! generic parse failure.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::codec::LengthDelimitedCodec;
use uuid::Uuid;

use crate::descriptor::OperationDescriptor;
use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::{DecodeError, EncodeError};
use crate::result::ExecutionResult;

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;
/// Oldest schema version this build still accepts.
pub const MIN_SUPPORTED_SCHEMA_VERSION: u32 = 1;
/// Largest frame accepted on the channel.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;
/// Operation tags this build can decode.
pub const KNOWN_OPERATION_TAGS: &[&str] = &[
    "extract_catalog",
    "create_directory",
    "copy",
    "move",
    "remove",
];

const SCHEMA_VERSION_FIELD: &str = "schema_version";
const OPERATION_FIELD: &str = "operation";
const CORRELATION_FIELD: &str = "correlation_id";
const OUTCOME_FIELD: &str = "outcome";
const TAG_FIELD: &str = "type";

#[derive(Serialize)]
struct OperationPayload<'a> {
    schema_version: u32,
    operation: &'a OperationDescriptor,
}

/// Serialise a bare descriptor as `{ "schema_version", "operation" }`.
///
/// # Errors
///
/// Fails only when a path in the descriptor is not valid UTF-8.
pub fn encode(descriptor: &OperationDescriptor) -> Result<Vec<u8>, EncodeError> {
    let payload = OperationPayload {
        schema_version: SCHEMA_VERSION,
        operation: descriptor,
    };
    serde_json::to_vec(&payload).map_err(|source| EncodeError::json("operation", source))
}

/// Reconstruct a descriptor produced by [`encode`].
///
/// # Errors
///
/// Returns a [`DecodeError`] describing why the payload was rejected.
pub fn decode(bytes: &[u8]) -> Result<OperationDescriptor, DecodeError> {
    let mut document = parse_document(bytes)?;
    check_schema_version(&document)?;
    take_operation(&mut document)
}

/// Serialise a request envelope.
///
/// # Errors
///
/// Fails only when a path in the descriptor is not valid UTF-8.
pub fn encode_request(envelope: &RequestEnvelope) -> Result<Vec<u8>, EncodeError> {
    serde_json::to_vec(envelope).map_err(|source| EncodeError::json("request", source))
}

/// Reconstruct a request envelope.
///
/// # Errors
///
/// Returns a [`DecodeError`] describing why the payload was rejected.
pub fn decode_request(bytes: &[u8]) -> Result<RequestEnvelope, DecodeError> {
    let mut document = parse_document(bytes)?;
    let schema_version = check_schema_version(&document)?;
    let correlation_id = take_field::<Uuid>(&mut document, CORRELATION_FIELD)?;
    let operation = take_operation(&mut document)?;
    Ok(RequestEnvelope {
        correlation_id,
        schema_version,
        operation,
    })
}

/// Serialise a response envelope.
///
/// # Errors
///
/// Fails only when the artifact path is not valid UTF-8.
pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Vec<u8>, EncodeError> {
    serde_json::to_vec(envelope).map_err(|source| EncodeError::json("response", source))
}

/// Reconstruct a response envelope.
///
/// # Errors
///
/// Returns a [`DecodeError`] describing why the payload was rejected.
pub fn decode_response(bytes: &[u8]) -> Result<ResponseEnvelope, DecodeError> {
    let mut document = parse_document(bytes)?;
    let schema_version = check_schema_version(&document)?;
    let correlation_id = take_field::<Uuid>(&mut document, CORRELATION_FIELD)?;
    let outcome = take_field::<ExecutionResult>(&mut document, OUTCOME_FIELD)?;
    Ok(ResponseEnvelope {
        correlation_id,
        schema_version,
        outcome,
    })
}

/// Best-effort recovery of the correlation id from a request that failed to
/// decode, so the helper can still answer it.
#[must_use]
pub fn peek_correlation_id(bytes: &[u8]) -> Option<Uuid> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value
        .get(CORRELATION_FIELD)?
        .as_str()
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

/// Length-delimited framing used on the helper socket.
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

fn parse_document(bytes: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|source| {
        if source.is_eof() {
            DecodeError::Truncated { source }
        } else {
            DecodeError::Syntax { source }
        }
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::Malformed {
            field: "payload",
            reason: "expected a json object",
        }),
    }
}

fn check_schema_version(document: &Map<String, Value>) -> Result<u32, DecodeError> {
    let found = document
        .get(SCHEMA_VERSION_FIELD)
        .ok_or(DecodeError::Malformed {
            field: SCHEMA_VERSION_FIELD,
            reason: "missing",
        })?
        .as_u64()
        .ok_or(DecodeError::Malformed {
            field: SCHEMA_VERSION_FIELD,
            reason: "expected an unsigned integer",
        })?;
    u32::try_from(found)
        .ok()
        .filter(|version| (MIN_SUPPORTED_SCHEMA_VERSION..=SCHEMA_VERSION).contains(version))
        .ok_or(DecodeError::UnsupportedVersion {
            found,
            min: MIN_SUPPORTED_SCHEMA_VERSION,
            max: SCHEMA_VERSION,
        })
}

fn take_operation(document: &mut Map<String, Value>) -> Result<OperationDescriptor, DecodeError> {
    let operation = document
        .remove(OPERATION_FIELD)
        .ok_or(DecodeError::Malformed {
            field: OPERATION_FIELD,
            reason: "missing",
        })?;
    let tag = match operation.get(TAG_FIELD) {
        Some(Value::String(tag)) => tag.clone(),
        Some(_) => {
            return Err(DecodeError::Malformed {
                field: TAG_FIELD,
                reason: "expected a string",
            });
        }
        None => return Err(DecodeError::MissingOperationTag),
    };
    if !KNOWN_OPERATION_TAGS.contains(&tag.as_str()) {
        return Err(DecodeError::UnknownOperation { tag });
    }
    serde_json::from_value(operation).map_err(|source| DecodeError::InvalidField {
        field: OPERATION_FIELD,
        source,
    })
}

fn take_field<T: DeserializeOwned>(
    document: &mut Map<String, Value>,
    field: &'static str,
) -> Result<T, DecodeError> {
    let value = document.remove(field).ok_or(DecodeError::Malformed {
        field,
        reason: "missing",
    })?;
    serde_json::from_value(value).map_err(|source| DecodeError::InvalidField { field, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendition::RenditionRef;
    use crate::result::ErrorKind;

    type TestResult<T> = anyhow::Result<T>;

    fn sample_extract() -> OperationDescriptor {
        OperationDescriptor::extract_catalog(
            vec![
                RenditionRef::image("AppIcon", vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a]),
                RenditionRef::color("Accent", 0.1, 0.2, 0.3, 1.0),
            ],
            "/var/mobile/Documents/Extracted",
        )
    }

    #[test]
    fn descriptor_round_trips() -> TestResult<()> {
        let descriptor = sample_extract();
        let bytes = encode(&descriptor)?;
        assert_eq!(decode(&bytes)?, descriptor);
        Ok(())
    }

    #[test]
    fn encoding_is_deterministic() -> TestResult<()> {
        let descriptor = sample_extract();
        assert_eq!(encode(&descriptor)?, encode(&descriptor.clone())?);
        Ok(())
    }

    #[test]
    fn truncated_payload_is_reported() -> TestResult<()> {
        let bytes = encode(&sample_extract())?;
        let cut = &bytes[..bytes.len() / 2];
        assert!(matches!(decode(cut), Err(DecodeError::Truncated { .. })));
        assert!(matches!(decode(b""), Err(DecodeError::Truncated { .. })));
        Ok(())
    }

    #[test]
    fn unsupported_version_is_reported() {
        let bytes = br#"{"schema_version":99,"operation":{"type":"remove","path":"/var/tmp/x"}}"#;
        match decode(bytes) {
            Err(DecodeError::UnsupportedVersion { found, min, max }) => {
                assert_eq!(found, 99);
                assert_eq!(min, MIN_SUPPORTED_SCHEMA_VERSION);
                assert_eq!(max, SCHEMA_VERSION);
            }
            other => panic!("unexpected decode outcome: {other:?}"),
        }
        let zero = br#"{"schema_version":0,"operation":{"type":"remove","path":"/var/tmp/x"}}"#;
        assert!(matches!(
            decode(zero),
            Err(DecodeError::UnsupportedVersion { found: 0, .. })
        ));
    }

    #[test]
    fn unknown_tag_is_rejected_not_guessed() {
        let bytes = br#"{"schema_version":1,"operation":{"type":"chmod","path":"/var/tmp/x"}}"#;
        match decode(bytes) {
            Err(DecodeError::UnknownOperation { tag }) => assert_eq!(tag, "chmod"),
            other => panic!("unexpected decode outcome: {other:?}"),
        }
    }

    #[test]
    fn missing_tag_and_fields_are_reported() {
        let untagged = br#"{"schema_version":1,"operation":{"path":"/var/tmp/x"}}"#;
        assert!(matches!(
            decode(untagged),
            Err(DecodeError::MissingOperationTag)
        ));

        let no_version = br#"{"operation":{"type":"remove","path":"/var/tmp/x"}}"#;
        assert!(matches!(
            decode(no_version),
            Err(DecodeError::Malformed {
                field: "schema_version",
                ..
            })
        ));

        let missing_path = br#"{"schema_version":1,"operation":{"type":"remove"}}"#;
        assert!(matches!(
            decode(missing_path),
            Err(DecodeError::InvalidField {
                field: "operation",
                ..
            })
        ));

        assert!(matches!(decode(b"[1,2]"), Err(DecodeError::Malformed { .. })));
        assert!(matches!(decode(b"{]"), Err(DecodeError::Syntax { .. })));
    }

    #[test]
    fn envelopes_round_trip_and_keep_correlation() -> TestResult<()> {
        let request = RequestEnvelope::new(OperationDescriptor::copy("/var/tmp/a", "/var/tmp/b"));
        let decoded = decode_request(&encode_request(&request)?)?;
        assert_eq!(decoded, request);

        let response = ResponseEnvelope::new(
            request.correlation_id,
            ExecutionResult::failure(ErrorKind::NotFound, "source missing"),
        );
        let decoded = decode_response(&encode_response(&response)?)?;
        assert_eq!(decoded, response);
        Ok(())
    }

    #[test]
    fn correlation_id_survives_undecodable_operation() -> TestResult<()> {
        let id = Uuid::new_v4();
        let bytes = format!(
            r#"{{"correlation_id":"{id}","schema_version":1,"operation":{{"type":"format_disk"}}}}"#
        );
        assert!(matches!(
            decode_request(bytes.as_bytes()),
            Err(DecodeError::UnknownOperation { .. })
        ));
        assert_eq!(peek_correlation_id(bytes.as_bytes()), Some(id));
        assert_eq!(peek_correlation_id(b"{"), None);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_fail_to_encode() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = OsStr::from_bytes(&[0x2f, 0xff, 0xfe]);
        let descriptor = OperationDescriptor::remove(path);
        assert!(matches!(
            encode(&descriptor),
            Err(EncodeError::Json {
                payload: "operation",
                ..
            })
        ));
    }
}
