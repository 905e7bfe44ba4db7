//! Listen request encoding: the frames a watcher sends to attach and detach
//! targets on an open stream.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Value as JsonValue};

use crate::api::query::QueryDefinition;
use crate::model::DocumentKey;
use crate::remote::serializer::ProtoSerializer;

/// What a listen target watches: a single document or a query.
#[derive(Clone, Debug)]
pub enum TargetPayload {
    Documents { documents: Vec<String> },
    Query { parent: String, structured_query: JsonValue },
}

#[derive(Clone, Debug)]
pub struct ListenTarget {
    target_id: i32,
    payload: TargetPayload,
    resume_token: Option<Vec<u8>>,
}

impl ListenTarget {
    pub fn for_document(
        serializer: &ProtoSerializer,
        target_id: i32,
        key: &DocumentKey,
    ) -> Self {
        Self {
            target_id,
            payload: TargetPayload::Documents {
                documents: vec![serializer.document_name(key)],
            },
            resume_token: None,
        }
    }

    pub fn for_query(
        serializer: &ProtoSerializer,
        target_id: i32,
        definition: &QueryDefinition,
    ) -> Self {
        Self {
            target_id,
            payload: TargetPayload::Query {
                parent: serializer.query_parent(definition),
                structured_query: serializer.encode_structured_query(definition),
            },
            resume_token: None,
        }
    }

    pub fn target_id(&self) -> i32 {
        self.target_id
    }

    pub fn with_resume_token(mut self, token: Option<Vec<u8>>) -> Self {
        self.resume_token = token;
        self
    }
}

pub fn encode_add_target(serializer: &ProtoSerializer, target: &ListenTarget) -> JsonValue {
    let mut add_target = serde_json::Map::new();
    add_target.insert("targetId".to_string(), json!(target.target_id));
    if let Some(token) = &target.resume_token {
        add_target.insert(
            "resumeToken".to_string(),
            json!(BASE64_STANDARD.encode(token)),
        );
    }
    match &target.payload {
        TargetPayload::Documents { documents } => {
            add_target.insert("documents".to_string(), json!({ "documents": documents }));
        }
        TargetPayload::Query {
            parent,
            structured_query,
        } => {
            add_target.insert(
                "query".to_string(),
                json!({
                    "parent": parent,
                    "structuredQuery": structured_query
                }),
            );
        }
    }

    json!({
        "database": serializer.database_name(),
        "addTarget": JsonValue::Object(add_target)
    })
}

pub fn encode_remove_target(serializer: &ProtoSerializer, target_id: i32) -> JsonValue {
    json!({
        "database": serializer.database_name(),
        "removeTarget": target_id
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DatabaseId;

    fn serializer() -> ProtoSerializer {
        ProtoSerializer::new(DatabaseId::default_database("project"))
    }

    #[test]
    fn encodes_document_target() {
        let serializer = serializer();
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let target = ListenTarget::for_document(&serializer, 1, &key);
        let request = encode_add_target(&serializer, &target);

        assert_eq!(request["database"], json!(serializer.database_name()));
        assert_eq!(request["addTarget"]["targetId"], json!(1));
        assert_eq!(
            request["addTarget"]["documents"]["documents"][0],
            json!("projects/project/databases/(default)/documents/cities/sf")
        );
        assert!(request["addTarget"].get("resumeToken").is_none());
    }

    #[test]
    fn encodes_resume_token() {
        let serializer = serializer();
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let target =
            ListenTarget::for_document(&serializer, 1, &key).with_resume_token(Some(vec![1, 2]));
        let request = encode_add_target(&serializer, &target);
        assert_eq!(
            request["addTarget"]["resumeToken"],
            json!(BASE64_STANDARD.encode([1, 2]))
        );
    }

    #[test]
    fn encodes_remove() {
        let serializer = serializer();
        let request = encode_remove_target(&serializer, 7);
        assert_eq!(request["removeTarget"], json!(7));
    }
}
