use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use santander_ops::{
    DecodeError, EncodeError, ExecutionResult, OperationDescriptor, RenditionRef, RenditionType,
    RequestEnvelope, ResponseEnvelope, decode, decode_request, decode_response, encode,
    encode_request, encode_response, frame_codec,
};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

type TestResult<T> = anyhow::Result<T>;

fn every_variant() -> Vec<OperationDescriptor> {
    vec![
        OperationDescriptor::extract_catalog(
            vec![
                RenditionRef::image("AppIcon", vec![1, 2, 3]),
                RenditionRef::color("Tint", 0.25, 0.5, 0.75, 1.0),
                RenditionRef::raw(
                    "Glyph",
                    RenditionType::Svg,
                    b"<svg/>".to_vec(),
                    Some("svg".to_string()),
                ),
            ],
            "/var/mobile/Documents/Assets",
        ),
        OperationDescriptor::create_directory("/var/mobile/Documents/New Folder"),
        OperationDescriptor::copy("/var/mobile/a.txt", "/var/mobile/b.txt"),
        OperationDescriptor::relocate("/var/mobile/a.txt", "/var/mobile/Archive/a.txt"),
        OperationDescriptor::remove("/var/mobile/Documents/old"),
    ]
}

#[test]
fn every_variant_survives_the_wire() -> TestResult<()> {
    for descriptor in every_variant() {
        let decoded = decode(&encode(&descriptor)?)?;
        assert_eq!(decoded, descriptor);
    }
    Ok(())
}

#[test]
fn payload_layout_is_stable() -> TestResult<()> {
    let bytes = encode(&OperationDescriptor::remove("/var/tmp/x"))?;
    let value: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(value["schema_version"], 1);
    assert_eq!(value["operation"]["type"], "remove");
    assert_eq!(value["operation"]["path"], "/var/tmp/x");
    Ok(())
}

#[test]
fn frames_carry_whole_envelopes() -> TestResult<()> {
    let mut codec = frame_codec();
    let mut buffer = BytesMut::new();

    let request = RequestEnvelope::new(OperationDescriptor::create_directory("/var/tmp/dir"));
    let response = ResponseEnvelope::new(
        request.correlation_id,
        ExecutionResult::success(Some(PathBuf::from("/var/tmp/dir"))),
    );
    codec.encode(Bytes::from(encode_request(&request)?), &mut buffer)?;
    codec.encode(Bytes::from(encode_response(&response)?), &mut buffer)?;

    let first = codec.decode(&mut buffer)?.ok_or_else(|| anyhow::anyhow!("missing frame"))?;
    let second = codec.decode(&mut buffer)?.ok_or_else(|| anyhow::anyhow!("missing frame"))?;
    assert!(codec.decode(&mut buffer)?.is_none());

    assert_eq!(decode_request(&first)?, request);
    assert_eq!(decode_response(&second)?, response);
    Ok(())
}

#[test]
fn partial_frame_waits_for_more_bytes() -> TestResult<()> {
    let mut codec = frame_codec();
    let mut buffer = BytesMut::new();
    let request = RequestEnvelope::new(OperationDescriptor::remove("/var/tmp/x"));
    codec.encode(Bytes::from(encode_request(&request)?), &mut buffer)?;

    let mut partial = buffer.split_to(buffer.len() - 3);
    assert!(codec.decode(&mut partial)?.is_none());
    partial.unsplit(buffer);
    assert!(codec.decode(&mut partial)?.is_some());
    Ok(())
}

#[test]
fn non_finite_color_is_refused_before_it_reaches_the_wire() {
    let descriptor = OperationDescriptor::extract_catalog(
        vec![RenditionRef::color("Tint", f64::NAN, 0.0, 0.0, 1.0)],
        "/var/mobile/Documents/Assets",
    );
    assert!(matches!(
        encode(&descriptor),
        Err(EncodeError::Json {
            payload: "operation",
            ..
        })
    ));
    assert!(encode_request(&RequestEnvelope::new(descriptor)).is_err());
}

#[test]
fn request_from_newer_sender_is_rejected() {
    let bytes = br#"{"correlation_id":"6f1c2f8a-8f0e-4c36-9f68-8f7b2d5a9e10","schema_version":2,"operation":{"type":"remove","path":"/var/tmp/x"}}"#;
    assert!(matches!(
        decode_request(bytes),
        Err(DecodeError::UnsupportedVersion { found: 2, .. })
    ));
}
