//! Decoding of streamed listen responses into typed watch events.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::api::snapshot::DocumentSnapshot;
use crate::error::{internal_error, DocstoreError, DocstoreErrorCode, DocstoreResult};
use crate::model::{DocumentKey, Timestamp};
use crate::remote::serializer::ProtoSerializer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetChangeState {
    NoChange,
    Add,
    Remove,
    Current,
    Reset,
}

#[derive(Debug)]
pub struct TargetChange {
    pub state: TargetChangeState,
    pub target_ids: Vec<i32>,
    pub resume_token: Option<Vec<u8>>,
    pub read_time: Option<Timestamp>,
    pub cause: Option<DocstoreError>,
}

/// One decoded frame of the listen stream.
#[derive(Debug)]
pub enum WatchEvent {
    TargetChange(TargetChange),
    /// A document changed or was newly added to some targets.
    DocumentChange {
        target_ids: Vec<i32>,
        removed_target_ids: Vec<i32>,
        document: DocumentSnapshot,
    },
    /// The document was deleted on the backend.
    DocumentDelete {
        key: DocumentKey,
        read_time: Option<Timestamp>,
        removed_target_ids: Vec<i32>,
    },
    /// The document still exists but no longer matches the target.
    DocumentRemove {
        key: DocumentKey,
        read_time: Option<Timestamp>,
        removed_target_ids: Vec<i32>,
    },
    /// Existence filter: the backend's count of documents in the target.
    Filter { target_id: i32, count: i32 },
}

#[derive(Deserialize)]
struct StatusCause {
    code: i32,
    #[serde(default)]
    message: Option<String>,
}

/// Decodes one server frame. Any malformed frame is an error; the watcher
/// treats decode failures as terminal rather than guessing at state.
pub fn decode_watch_event(
    serializer: &ProtoSerializer,
    value: &JsonValue,
) -> DocstoreResult<WatchEvent> {
    if let Some(target_change) = value.get("targetChange") {
        let state = match target_change
            .get("targetChangeType")
            .and_then(JsonValue::as_str)
        {
            None | Some("NO_CHANGE") => TargetChangeState::NoChange,
            Some("ADD") => TargetChangeState::Add,
            Some("REMOVE") => TargetChangeState::Remove,
            Some("CURRENT") => TargetChangeState::Current,
            Some("RESET") => TargetChangeState::Reset,
            Some(other) => {
                return Err(internal_error(format!(
                    "Unknown target change type: {other}"
                )))
            }
        };
        let target_ids = decode_target_ids(target_change.get("targetIds"));
        let resume_token = target_change
            .get("resumeToken")
            .and_then(JsonValue::as_str)
            .map(|token| {
                BASE64_STANDARD
                    .decode(token)
                    .map_err(|err| internal_error(format!("Invalid resume token: {err}")))
            })
            .transpose()?;
        let read_time = serializer.decode_optional_timestamp(target_change.get("readTime"))?;
        let cause = target_change
            .get("cause")
            .map(|cause| serde_json::from_value::<StatusCause>(cause.clone()))
            .transpose()
            .map_err(|err| internal_error(format!("Failed to decode target change cause: {err}")))?
            .map(|cause| {
                error_from_grpc_code(
                    cause.code,
                    cause.message.unwrap_or_else(|| "Target error".to_string()),
                )
            });
        return Ok(WatchEvent::TargetChange(TargetChange {
            state,
            target_ids,
            resume_token,
            read_time,
            cause,
        }));
    }

    if let Some(document_change) = value.get("documentChange") {
        let target_ids = decode_target_ids(document_change.get("targetIds"));
        let removed_target_ids = decode_target_ids(document_change.get("removedTargetIds"));
        let document = document_change
            .get("document")
            .ok_or_else(|| internal_error("documentChange missing document"))?;
        let read_time = serializer.decode_optional_timestamp(document_change.get("readTime"))?;
        let document = serializer.decode_document(document, read_time)?;
        return Ok(WatchEvent::DocumentChange {
            target_ids,
            removed_target_ids,
            document,
        });
    }

    if let Some(document_delete) = value.get("documentDelete") {
        let (key, read_time, removed_target_ids) =
            decode_document_removal(serializer, document_delete, "documentDelete")?;
        return Ok(WatchEvent::DocumentDelete {
            key,
            read_time,
            removed_target_ids,
        });
    }

    if let Some(document_remove) = value.get("documentRemove") {
        let (key, read_time, removed_target_ids) =
            decode_document_removal(serializer, document_remove, "documentRemove")?;
        return Ok(WatchEvent::DocumentRemove {
            key,
            read_time,
            removed_target_ids,
        });
    }

    if let Some(filter) = value.get("filter") {
        let target_id = filter
            .get("targetId")
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| internal_error("filter missing targetId"))? as i32;
        let count = filter.get("count").and_then(JsonValue::as_i64).unwrap_or(0) as i32;
        return Ok(WatchEvent::Filter { target_id, count });
    }

    Err(internal_error("Unknown listen response type"))
}

fn decode_document_removal(
    serializer: &ProtoSerializer,
    payload: &JsonValue,
    label: &str,
) -> DocstoreResult<(DocumentKey, Option<Timestamp>, Vec<i32>)> {
    let name = payload
        .get("document")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| internal_error(format!("{label} missing document field")))?;
    let key = serializer.document_key_from_name(name)?;
    let read_time = serializer.decode_optional_timestamp(payload.get("readTime"))?;
    let removed_target_ids = decode_target_ids(payload.get("removedTargetIds"));
    Ok((key, read_time, removed_target_ids))
}

fn decode_target_ids(value: Option<&JsonValue>) -> Vec<i32> {
    value
        .and_then(JsonValue::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_i64().map(|id| id as i32))
                .collect()
        })
        .unwrap_or_default()
}

/// Maps a gRPC status code number (as carried in target change causes) to
/// an error.
pub fn error_from_grpc_code(code: i32, message: String) -> DocstoreError {
    let code = match code {
        1 => DocstoreErrorCode::Cancelled,
        2 => DocstoreErrorCode::Unknown,
        3 => DocstoreErrorCode::InvalidArgument,
        4 => DocstoreErrorCode::DeadlineExceeded,
        5 => DocstoreErrorCode::NotFound,
        6 => DocstoreErrorCode::AlreadyExists,
        7 => DocstoreErrorCode::PermissionDenied,
        8 => DocstoreErrorCode::ResourceExhausted,
        9 => DocstoreErrorCode::FailedPrecondition,
        10 => DocstoreErrorCode::Aborted,
        13 => DocstoreErrorCode::Internal,
        14 => DocstoreErrorCode::Unavailable,
        16 => DocstoreErrorCode::Unauthenticated,
        _ => DocstoreErrorCode::Unknown,
    };
    DocstoreError::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DatabaseId;
    use serde_json::json;

    fn serializer() -> ProtoSerializer {
        ProtoSerializer::new(DatabaseId::default_database("project"))
    }

    #[test]
    fn decodes_target_change_with_token_and_read_time() {
        let frame = json!({
            "targetChange": {
                "targetChangeType": "CURRENT",
                "targetIds": [1],
                "resumeToken": BASE64_STANDARD.encode([9, 9]),
                "readTime": "2024-01-01T00:00:00Z"
            }
        });
        let event = decode_watch_event(&serializer(), &frame).unwrap();
        match event {
            WatchEvent::TargetChange(change) => {
                assert_eq!(change.state, TargetChangeState::Current);
                assert_eq!(change.target_ids, vec![1]);
                assert_eq!(change.resume_token, Some(vec![9, 9]));
                assert!(change.read_time.is_some());
                assert!(change.cause.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn missing_change_type_is_no_change() {
        let frame = json!({ "targetChange": {} });
        let event = decode_watch_event(&serializer(), &frame).unwrap();
        match event {
            WatchEvent::TargetChange(change) => {
                assert_eq!(change.state, TargetChangeState::NoChange);
                assert!(change.target_ids.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decodes_document_change() {
        let frame = json!({
            "documentChange": {
                "targetIds": [1],
                "document": {
                    "name": "projects/project/databases/(default)/documents/cities/sf",
                    "fields": { "name": { "stringValue": "sf" } },
                    "updateTime": "2024-01-01T00:00:00Z"
                }
            }
        });
        let event = decode_watch_event(&serializer(), &frame).unwrap();
        match event {
            WatchEvent::DocumentChange {
                target_ids,
                document,
                ..
            } => {
                assert_eq!(target_ids, vec![1]);
                assert_eq!(document.id(), "sf");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decodes_cause_into_error() {
        let frame = json!({
            "targetChange": {
                "targetChangeType": "REMOVE",
                "targetIds": [1],
                "cause": { "code": 7, "message": "denied" }
            }
        });
        let event = decode_watch_event(&serializer(), &frame).unwrap();
        match event {
            WatchEvent::TargetChange(change) => {
                let cause = change.cause.unwrap();
                assert_eq!(cause.code, DocstoreErrorCode::PermissionDenied);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_is_an_error() {
        let err = decode_watch_event(&serializer(), &json!({ "mystery": {} })).unwrap_err();
        assert_eq!(err.code, DocstoreErrorCode::Internal);
    }

    #[test]
    fn unknown_change_type_is_an_error() {
        let frame = json!({ "targetChange": { "targetChangeType": "SIDEWAYS" } });
        assert!(decode_watch_event(&serializer(), &frame).is_err());
    }
}
