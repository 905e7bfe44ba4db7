use std::collections::BTreeMap;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Value as JsonValue};

use crate::api::query::QueryDefinition;
use crate::api::snapshot::DocumentSnapshot;
use crate::error::{invalid_argument, DocstoreResult};
use crate::model::{DatabaseId, DocumentKey, FieldPath, ResourcePath, Timestamp};
use crate::value::{BytesValue, MapValue, Value, ValueKind};

/// Translates between native types and the JSON-proto wire representation
/// the backend speaks. Pure data marshalling; owns no I/O.
#[derive(Clone, Debug)]
pub struct ProtoSerializer {
    database_id: DatabaseId,
}

impl ProtoSerializer {
    pub fn new(database_id: DatabaseId) -> Self {
        Self { database_id }
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn database_name(&self) -> String {
        self.database_id.name()
    }

    pub fn document_name(&self, key: &DocumentKey) -> String {
        format!(
            "{}/documents/{}",
            self.database_name(),
            key.path().canonical_string()
        )
    }

    /// Parses a fully qualified document name back into a key, validating
    /// that it belongs to this database.
    pub fn document_key_from_name(&self, name: &str) -> DocstoreResult<DocumentKey> {
        let prefix = format!("{}/documents/", self.database_name());
        let relative = name.strip_prefix(&prefix).ok_or_else(|| {
            invalid_argument(format!(
                "Document name '{name}' does not belong to database {}",
                self.database_name()
            ))
        })?;
        DocumentKey::from_path(ResourcePath::from_string(relative)?)
    }

    /// The `parent` resource a query executes under.
    pub fn query_parent(&self, definition: &QueryDefinition) -> String {
        let parent_path = definition.parent_path();
        if parent_path.is_empty() {
            format!("{}/documents", self.database_name())
        } else {
            format!(
                "{}/documents/{}",
                self.database_name(),
                parent_path.canonical_string()
            )
        }
    }

    pub fn encode_document_fields(&self, map: &MapValue) -> JsonValue {
        json!({ "fields": encode_map_fields(map) })
    }

    pub fn decode_document_fields(&self, value: &JsonValue) -> DocstoreResult<MapValue> {
        decode_map_value(value)
    }

    /// Decodes a wire document (`name`, `fields`, `createTime`, `updateTime`)
    /// into a snapshot. Fails if any field value cannot be interpreted.
    pub fn decode_document(
        &self,
        document: &JsonValue,
        read_time: Option<Timestamp>,
    ) -> DocstoreResult<DocumentSnapshot> {
        let name = document
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid_argument("Wire document missing name"))?;
        let key = self.document_key_from_name(name)?;
        let fields = decode_map_value(document)?;
        let create_time = self.decode_optional_timestamp(document.get("createTime"))?;
        let update_time = self.decode_optional_timestamp(document.get("updateTime"))?;
        Ok(DocumentSnapshot::new(
            key,
            Some(fields),
            create_time,
            update_time,
            read_time,
        ))
    }

    pub fn decode_optional_timestamp(
        &self,
        value: Option<&JsonValue>,
    ) -> DocstoreResult<Option<Timestamp>> {
        value
            .and_then(JsonValue::as_str)
            .map(|timestamp| self.decode_timestamp_string(timestamp))
            .transpose()
    }

    pub fn encode_timestamp(&self, timestamp: &Timestamp) -> String {
        encode_timestamp(timestamp)
    }

    pub fn decode_timestamp_string(&self, value: &str) -> DocstoreResult<Timestamp> {
        parse_timestamp(value)
    }

    pub fn encode_value(&self, value: &Value) -> JsonValue {
        encode_value(value)
    }

    pub fn decode_value(&self, value: &JsonValue) -> DocstoreResult<Value> {
        decode_value(value)
    }

    pub fn encode_set_write(
        &self,
        key: &DocumentKey,
        map: &MapValue,
        mask: Option<&[FieldPath]>,
    ) -> JsonValue {
        let mut write = serde_json::Map::new();
        write.insert(
            "update".to_string(),
            json!({
                "name": self.document_name(key),
                "fields": encode_map_fields(map)
            }),
        );
        if let Some(mask) = mask {
            let paths: Vec<String> = mask.iter().map(FieldPath::canonical_string).collect();
            write.insert("updateMask".to_string(), json!({ "fieldPaths": paths }));
        }
        JsonValue::Object(write)
    }

    pub fn encode_update_write(
        &self,
        key: &DocumentKey,
        map: &MapValue,
        field_paths: &[FieldPath],
    ) -> JsonValue {
        let mut write = serde_json::Map::new();
        write.insert(
            "update".to_string(),
            json!({
                "name": self.document_name(key),
                "fields": encode_map_fields(map)
            }),
        );
        let paths: Vec<String> = field_paths.iter().map(FieldPath::canonical_string).collect();
        write.insert("updateMask".to_string(), json!({ "fieldPaths": paths }));
        // Updates require the document to already exist.
        write.insert("currentDocument".to_string(), json!({ "exists": true }));
        JsonValue::Object(write)
    }

    pub fn encode_delete_write(&self, key: &DocumentKey) -> JsonValue {
        json!({ "delete": self.document_name(key) })
    }

    pub fn encode_structured_query(&self, definition: &QueryDefinition) -> JsonValue {
        let mut structured = serde_json::Map::new();

        structured.insert(
            "from".to_string(),
            json!([{ "collectionId": definition.collection_id() }]),
        );

        if !definition.filters().is_empty() {
            structured.insert(
                "where".to_string(),
                encode_filters(self, definition.filters()),
            );
        }

        if !definition.order_by().is_empty() {
            let orders: Vec<_> = definition
                .order_by()
                .iter()
                .map(|order| {
                    json!({
                        "field": { "fieldPath": order.field().canonical_string() },
                        "direction": order.direction().as_str(),
                    })
                })
                .collect();
            structured.insert("orderBy".to_string(), JsonValue::Array(orders));
        }

        if let Some(limit) = definition.limit() {
            structured.insert("limit".to_string(), json!(limit as i64));
        }

        JsonValue::Object(structured)
    }
}

fn encode_filters(
    serializer: &ProtoSerializer,
    filters: &[crate::api::query::FieldFilter],
) -> JsonValue {
    if filters.len() == 1 {
        return encode_field_filter(serializer, &filters[0]);
    }

    let nested: Vec<_> = filters
        .iter()
        .map(|filter| encode_field_filter(serializer, filter))
        .collect();

    json!({
        "compositeFilter": {
            "op": "AND",
            "filters": nested
        }
    })
}

fn encode_field_filter(
    serializer: &ProtoSerializer,
    filter: &crate::api::query::FieldFilter,
) -> JsonValue {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": filter.field().canonical_string() },
            "op": filter.operator().as_str(),
            "value": serializer.encode_value(filter.value())
        }
    })
}

fn encode_map_fields(map: &MapValue) -> JsonValue {
    let mut fields = serde_json::Map::new();
    for (key, value) in map.fields() {
        fields.insert(key.clone(), encode_value(value));
    }
    JsonValue::Object(fields)
}

fn encode_value(value: &Value) -> JsonValue {
    match value.kind() {
        ValueKind::Null => json!({ "nullValue": JsonValue::Null }),
        ValueKind::Boolean(boolean) => json!({ "booleanValue": boolean }),
        ValueKind::Integer(integer) => json!({ "integerValue": integer.to_string() }),
        ValueKind::Double(double) => json!({ "doubleValue": double }),
        ValueKind::Timestamp(timestamp) => json!({ "timestampValue": encode_timestamp(timestamp) }),
        ValueKind::String(string) => json!({ "stringValue": string }),
        ValueKind::Bytes(bytes) => {
            json!({ "bytesValue": BASE64_STANDARD.encode(bytes.as_slice()) })
        }
        ValueKind::Reference(reference) => json!({ "referenceValue": reference }),
        ValueKind::Array(array) => {
            let values = array.values().iter().map(encode_value).collect::<Vec<_>>();
            json!({ "arrayValue": { "values": values } })
        }
        ValueKind::Map(map) => json!({
            "mapValue": {
                "fields": encode_map_fields(map)
            }
        }),
    }
}

fn decode_map_value(value: &JsonValue) -> DocstoreResult<MapValue> {
    let map = value
        .as_object()
        .ok_or_else(|| invalid_argument("Expected object for map value"))?;
    let fields_object = match map.get("fields") {
        Some(fields_value) => fields_value
            .as_object()
            .ok_or_else(|| invalid_argument("Expected 'fields' to be an object"))?,
        // Document exists but has no user fields.
        None => return Ok(MapValue::empty()),
    };

    let mut fields = BTreeMap::new();
    for (key, value) in fields_object {
        fields.insert(key.clone(), decode_value(value)?);
    }
    Ok(MapValue::new(fields))
}

fn decode_value(value: &JsonValue) -> DocstoreResult<Value> {
    let object = value
        .as_object()
        .ok_or_else(|| invalid_argument("Expected wire value object"))?;
    if let Some(null_value) = object.get("nullValue") {
        if null_value.is_null() {
            return Ok(Value::null());
        }
    }
    if let Some(bool_value) = object.get("booleanValue") {
        let value = bool_value
            .as_bool()
            .ok_or_else(|| invalid_argument("booleanValue must be bool"))?;
        return Ok(Value::from_bool(value));
    }
    if let Some(integer_value) = object.get("integerValue") {
        let parsed = match integer_value {
            JsonValue::String(value) => i64::from_str(value)
                .map_err(|err| invalid_argument(format!("Invalid integerValue: {err}")))?,
            JsonValue::Number(number) => number
                .as_i64()
                .ok_or_else(|| invalid_argument("Integer out of range"))?,
            _ => return Err(invalid_argument("integerValue must be a string or number")),
        };
        return Ok(Value::from_integer(parsed));
    }
    if let Some(double_value) = object.get("doubleValue") {
        let parsed = match double_value {
            JsonValue::Number(number) => number
                .as_f64()
                .ok_or_else(|| invalid_argument("Invalid doubleValue"))?,
            JsonValue::String(value) => match value.as_str() {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => other
                    .parse::<f64>()
                    .map_err(|err| invalid_argument(format!("Invalid doubleValue: {err}")))?,
            },
            _ => return Err(invalid_argument("doubleValue must be a number or string")),
        };
        return Ok(Value::from_double(parsed));
    }
    if let Some(timestamp_value) = object.get("timestampValue") {
        let timestamp_str = timestamp_value
            .as_str()
            .ok_or_else(|| invalid_argument("timestampValue must be string"))?;
        return Ok(Value::from_timestamp(parse_timestamp(timestamp_str)?));
    }
    if let Some(string_value) = object.get("stringValue") {
        let str_value = string_value
            .as_str()
            .ok_or_else(|| invalid_argument("stringValue must be string"))?;
        return Ok(Value::from_string(str_value));
    }
    if let Some(bytes_value) = object.get("bytesValue") {
        let str_value = bytes_value
            .as_str()
            .ok_or_else(|| invalid_argument("bytesValue must be base64 string"))?;
        let decoded = BASE64_STANDARD
            .decode(str_value)
            .map_err(|err| invalid_argument(format!("Invalid bytesValue: {err}")))?;
        return Ok(Value::from_bytes(BytesValue::from(decoded)));
    }
    if let Some(reference_value) = object.get("referenceValue") {
        let str_value = reference_value
            .as_str()
            .ok_or_else(|| invalid_argument("referenceValue must be string"))?;
        return Ok(Value::from_reference(str_value));
    }
    if let Some(array_value) = object.get("arrayValue") {
        let decoded = if let Some(values) = array_value.get("values") {
            match values.as_array() {
                Some(entries) => entries
                    .iter()
                    .map(decode_value)
                    .collect::<DocstoreResult<Vec<_>>>()?,
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };
        return Ok(Value::from_array(decoded));
    }
    if let Some(map_value) = object.get("mapValue") {
        let map = decode_map_value(map_value)?;
        return Ok(Value::from_map(map.fields().clone()));
    }

    Err(invalid_argument("Unknown wire value type"))
}

fn encode_timestamp(timestamp: &Timestamp) -> String {
    Utc.timestamp_opt(timestamp.seconds, timestamp.nanos as u32)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("zero timestamp"))
        .to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> DocstoreResult<Timestamp> {
    let datetime = DateTime::parse_from_rfc3339(value)
        .map_err(|err| invalid_argument(format!("Invalid timestamp: {err}")))?;
    let datetime_utc = datetime.with_timezone(&Utc);
    Ok(Timestamp::new(
        datetime_utc.timestamp(),
        datetime_utc.timestamp_subsec_nanos() as i32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::query::{Direction, FilterOperator, Query};

    fn serializer() -> ProtoSerializer {
        ProtoSerializer::new(DatabaseId::default_database("project"))
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::from_string("Ada"));
        map.insert("age".to_string(), Value::from_integer(42));
        map.insert(
            "nested".to_string(),
            Value::from_map({
                let mut inner = BTreeMap::new();
                inner.insert("flag".to_string(), Value::from_bool(true));
                inner
            }),
        );
        let map = MapValue::new(map);
        let serializer = serializer();
        let encoded = serializer.encode_document_fields(&map);
        let decoded = serializer.decode_document_fields(&encoded).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn timestamp_roundtrip() {
        let serializer = serializer();
        let timestamp = Timestamp::new(1_700_000_000, 123_000_000);
        let encoded = serializer.encode_timestamp(&timestamp);
        let decoded = serializer.decode_timestamp_string(&encoded).unwrap();
        assert_eq!(decoded, timestamp);
    }

    #[test]
    fn document_name_roundtrip() {
        let serializer = serializer();
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let name = serializer.document_name(&key);
        assert_eq!(
            name,
            "projects/project/databases/(default)/documents/cities/sf"
        );
        assert_eq!(serializer.document_key_from_name(&name).unwrap(), key);
    }

    #[test]
    fn rejects_foreign_document_name() {
        let serializer = serializer();
        let err = serializer
            .document_key_from_name("projects/other/databases/(default)/documents/cities/sf")
            .unwrap_err();
        assert_eq!(err.code_str(), "docstore/invalid-argument");
    }

    #[test]
    fn decodes_wire_document() {
        let serializer = serializer();
        let document = json!({
            "name": "projects/project/databases/(default)/documents/cities/sf",
            "fields": { "name": { "stringValue": "sf" } },
            "updateTime": "2024-01-01T00:00:00Z"
        });
        let snapshot = serializer
            .decode_document(&document, Some(Timestamp::new(10, 0)))
            .unwrap();
        assert!(snapshot.exists());
        assert_eq!(snapshot.id(), "sf");
        assert_eq!(snapshot.read_time(), Some(Timestamp::new(10, 0)));
        assert!(snapshot.update_time().is_some());
    }

    #[test]
    fn rejects_unknown_value_type() {
        let serializer = serializer();
        let err = serializer
            .decode_value(&json!({ "mysteryValue": 1 }))
            .unwrap_err();
        assert_eq!(err.code_str(), "docstore/invalid-argument");
    }

    #[tokio::test]
    async fn encodes_structured_query() {
        let docstore = crate::api::database::Docstore::with_datastore(
            DatabaseId::default_database("project"),
            std::sync::Arc::new(crate::remote::datastore::InMemoryDatastore::new()),
            None,
        );
        let query: Query = docstore
            .collection("cities")
            .unwrap()
            .query()
            .where_field("population", FilterOperator::GreaterThan, Value::from_integer(1))
            .unwrap()
            .order_by("population", Direction::Descending)
            .unwrap()
            .limit(10);

        let serializer = serializer();
        let encoded = serializer.encode_structured_query(query.definition());
        assert_eq!(encoded["from"][0]["collectionId"], json!("cities"));
        assert_eq!(
            encoded["where"]["fieldFilter"]["op"],
            json!("GREATER_THAN")
        );
        assert_eq!(encoded["orderBy"][0]["direction"], json!("DESCENDING"));
        assert_eq!(encoded["limit"], json!(10));
    }
}
