//! Translates a third-party CDC push-projection webhook body into a
//! `StoredEvent`, so it can be handed to a `Projection` exactly like an
//! event read from a subscription.
//!
//! This is a pure function, not an HTTP handler: wiring `translate` to a
//! particular web framework's request/response types is left to the
//! caller, matching the teacher's own adapter split between its
//! framework-agnostic core and a thin per-framework wrapper.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::encoder::{DecodeError, Encoder};
use crate::event::{Meta, StoredEvent};
use crate::id::EventId;

#[derive(Deserialize)]
struct Envelope {
    payload: Payload,
}

#[derive(Deserialize)]
struct Payload {
    data: String,
    meta: Option<String>,
    id: String,
    sequence: u64,
    #[serde(rename = "type")]
    type_name: String,
    causation_event_id: Option<String>,
    correlation_event_id: Option<String>,
    stream_id: String,
    stream_version: u64,
    occurred_on: String,
}

/// Everything that can go wrong decoding a webhook body.
///
/// Every variant here is retriable: the body itself is malformed, not the
/// event it carries. An unregistered event type is deliberately *not* an
/// error (see `translate`'s return type).
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("malformed webhook body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("malformed occurred_on timestamp: {0}")]
    InvalidTimestamp(chrono::ParseError),
    #[error("malformed meta JSON: {0}")]
    InvalidMeta(serde_json::Error),
    #[error("malformed event id: {0}")]
    InvalidEventId(uuid::Error),
    #[error(transparent)]
    Decode(DecodeError),
}

/// The response policy a caller's HTTP adapter should report back to the
/// webhook sender, per spec's three-way push-projection contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// The event was decoded and projected.
    Success,
    /// The body could not be parsed; ask the sender to retry.
    MustRetry,
    /// The event's type is not registered with this encoder; not an
    /// error, but nothing was projected either. The sender should move on
    /// rather than retry forever.
    KeepGoing,
}

/// Parses `body` and decodes its event payload with `encoder`.
///
/// Returns `Ok(None)` rather than an error when the event's type is not
/// registered: an unknown type is an expected steady-state condition for
/// a push adapter (the sender's event catalog is a superset of this
/// service's), not a malformed request.
pub fn translate<E: Encoder>(encoder: &E, body: &[u8]) -> Result<Option<StoredEvent>, TranslateError> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    let payload = envelope.payload;

    let decoded = match encoder.decode(&payload.type_name, &payload.data) {
        Ok(payload) => payload,
        Err(DecodeError::EventNotRegistered(_)) => return Ok(None),
        Err(err @ DecodeError::Deserialize(_)) => return Err(TranslateError::Decode(err)),
    };

    let occurred_on: DateTime<Utc> = DateTime::parse_from_rfc3339(&payload.occurred_on)
        .map_err(TranslateError::InvalidTimestamp)?
        .with_timezone(&Utc);

    let meta: Option<Meta> = payload
        .meta
        .as_deref()
        .map(|raw| serde_json::from_str::<HashMap<String, String>>(raw))
        .transpose()
        .map_err(TranslateError::InvalidMeta)?;

    let id = parse_event_id(&payload.id)?;
    let causation_id = payload.causation_event_id.as_deref().map(parse_event_id).transpose()?;
    let correlation_id = payload.correlation_event_id.as_deref().map(parse_event_id).transpose()?;

    Ok(Some(StoredEvent {
        id,
        sequence: payload.sequence,
        stream_id: payload.stream_id,
        stream_version: payload.stream_version,
        type_name: payload.type_name,
        payload: decoded,
        meta,
        causation_id,
        correlation_id,
        occurred_on,
    }))
}

fn parse_event_id(raw: &str) -> Result<EventId, TranslateError> {
    raw.parse().map_err(TranslateError::InvalidEventId)
}

/// Derives the response policy a caller should report for a `translate`
/// result.
pub fn policy(result: &Result<Option<StoredEvent>, TranslateError>) -> Policy {
    match result {
        Ok(Some(_)) => Policy::Success,
        Ok(None) => Policy::KeepGoing,
        Err(_) => Policy::MustRetry,
    }
}
