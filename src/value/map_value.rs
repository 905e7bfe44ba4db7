use std::collections::BTreeMap;

use crate::model::FieldPath;
use crate::value::{Value, ValueKind};

/// An immutable map of field names to values. Field updates produce a new
/// map rather than mutating in place.
#[derive(Clone, Debug, PartialEq)]
pub struct MapValue {
    fields: BTreeMap<String, Value>,
}

impl MapValue {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolves a (possibly nested) field path against this map.
    pub fn field(&self, path: &FieldPath) -> Option<&Value> {
        let mut fields = &self.fields;
        let segments = path.segments();
        for segment in &segments[..segments.len() - 1] {
            match fields.get(segment.as_str()).map(Value::kind) {
                Some(ValueKind::Map(map)) => fields = map.fields(),
                _ => return None,
            }
        }
        fields.get(path.last_segment())
    }

    /// Returns a copy of this map with `value` stored at `path`, creating
    /// intermediate maps as needed.
    pub fn with_field(&self, path: &FieldPath, value: Value) -> Self {
        let mut fields = self.fields.clone();
        set_at(&mut fields, path.segments(), value);
        Self::new(fields)
    }

    /// Returns a copy of this map without the field at `path`. Missing paths
    /// are a no-op.
    pub fn without_field(&self, path: &FieldPath) -> Self {
        let mut fields = self.fields.clone();
        remove_at(&mut fields, path.segments());
        Self::new(fields)
    }
}

pub(crate) fn set_at(fields: &mut BTreeMap<String, Value>, segments: &[String], value: Value) {
    if segments.len() == 1 {
        fields.insert(segments[0].clone(), value);
        return;
    }

    let nested = match fields.get(&segments[0]).map(Value::kind) {
        Some(ValueKind::Map(map)) => map.fields().clone(),
        _ => BTreeMap::new(),
    };
    let mut nested = nested;
    set_at(&mut nested, &segments[1..], value);
    fields.insert(segments[0].clone(), Value::from_map(nested));
}

pub(crate) fn remove_at(fields: &mut BTreeMap<String, Value>, segments: &[String]) {
    if segments.len() == 1 {
        fields.remove(&segments[0]);
        return;
    }

    if let Some(ValueKind::Map(map)) = fields.get(&segments[0]).map(Value::kind) {
        let mut nested = map.fields().clone();
        remove_at(&mut nested, &segments[1..]);
        fields.insert(segments[0].clone(), Value::from_map(nested));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MapValue {
        let mut inner = BTreeMap::new();
        inner.insert("population".to_string(), Value::from_integer(870_000));
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::from_string("sf"));
        map.insert("stats".to_string(), Value::from_map(inner));
        MapValue::new(map)
    }

    #[test]
    fn resolves_nested_field() {
        let map = sample();
        let path = FieldPath::from_dot_separated("stats.population").unwrap();
        assert_eq!(map.field(&path), Some(&Value::from_integer(870_000)));
    }

    #[test]
    fn missing_field_is_none() {
        let map = sample();
        let path = FieldPath::from_dot_separated("stats.area").unwrap();
        assert_eq!(map.field(&path), None);
        let path = FieldPath::from_dot_separated("name.nested").unwrap();
        assert_eq!(map.field(&path), None);
    }

    #[test]
    fn with_field_creates_intermediate_maps() {
        let map = sample();
        let path = FieldPath::from_dot_separated("geo.lat").unwrap();
        let updated = map.with_field(&path, Value::from_double(37.77));
        assert_eq!(updated.field(&path), Some(&Value::from_double(37.77)));
        // Original untouched.
        assert_eq!(map.field(&path), None);
    }

    #[test]
    fn without_field_removes_leaf() {
        let map = sample();
        let path = FieldPath::from_dot_separated("stats.population").unwrap();
        let updated = map.without_field(&path);
        assert_eq!(updated.field(&path), None);
        assert!(updated.field(&FieldPath::from_dot_separated("name").unwrap()).is_some());
    }
}
