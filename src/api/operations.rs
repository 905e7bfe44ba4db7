use std::collections::{BTreeMap, HashSet};

use crate::error::{invalid_argument, DocstoreResult};
use crate::model::FieldPath;
use crate::value::map_value::set_at;
use crate::value::{MapValue, Value, ValueKind};

/// Options for `set` writes: replace (default), merge everything present in
/// the data, or merge an explicit list of fields.
#[derive(Clone, Debug, Default)]
pub struct SetOptions {
    pub merge: bool,
    pub merge_fields: Option<Vec<FieldPath>>,
}

impl SetOptions {
    pub fn merge_all() -> Self {
        Self {
            merge: true,
            merge_fields: None,
        }
    }

    pub fn merge_fields<I>(fields: I) -> DocstoreResult<Self>
    where
        I: IntoIterator<Item = FieldPath>,
    {
        let mut unique = Vec::new();
        let mut seen = HashSet::new();
        for field in fields {
            if seen.insert(field.canonical_string()) {
                unique.push(field);
            }
        }
        if unique.is_empty() {
            return Err(invalid_argument(
                "merge_fields requires at least one field path",
            ));
        }
        Ok(Self {
            merge: false,
            merge_fields: Some(unique),
        })
    }

    pub fn is_merge(&self) -> bool {
        self.merge || self.merge_fields.is_some()
    }

    pub fn field_mask(&self) -> Option<&[FieldPath]> {
        self.merge_fields.as_deref()
    }
}

#[derive(Clone, Debug)]
pub struct EncodedSetData {
    pub map: MapValue,
    pub mask: Option<Vec<FieldPath>>,
}

#[derive(Clone, Debug)]
pub struct EncodedUpdateData {
    pub map: MapValue,
    pub field_paths: Vec<FieldPath>,
}

/// Encodes the data of a `set` write, deriving the merge mask when
/// requested. `merge: true` masks every leaf path present in the data;
/// explicit merge fields must actually appear in the data.
pub fn encode_set_data(
    data: BTreeMap<String, Value>,
    options: &SetOptions,
) -> DocstoreResult<EncodedSetData> {
    let map = MapValue::new(data);
    let mask = if let Some(mask) = options.field_mask() {
        for path in mask {
            if map.field(path).is_none() {
                return Err(invalid_argument(format!(
                    "Field '{}' is specified in merge_fields but missing from the data",
                    path.canonical_string()
                )));
            }
        }
        Some(mask.to_vec())
    } else if options.merge {
        let leaves = collect_leaf_paths(&map);
        if leaves.is_empty() {
            return Err(invalid_argument(
                "A merge set requires at least one field",
            ));
        }
        Some(leaves)
    } else {
        None
    };
    Ok(EncodedSetData { map, mask })
}

/// Encodes `update` data. Keys are dot-separated field paths; the result is
/// the nested document fragment plus the update mask.
pub fn encode_update_data(data: BTreeMap<String, Value>) -> DocstoreResult<EncodedUpdateData> {
    if data.is_empty() {
        return Err(invalid_argument("update requires at least one field"));
    }

    let mut fields = BTreeMap::new();
    let mut field_paths = Vec::new();
    let mut seen = HashSet::new();
    for (dotted, value) in data {
        let path = FieldPath::from_dot_separated(&dotted)?;
        if !seen.insert(path.canonical_string()) {
            return Err(invalid_argument(format!(
                "Duplicate field path in update: {dotted}"
            )));
        }
        set_at(&mut fields, path.segments(), value);
        field_paths.push(path);
    }
    Ok(EncodedUpdateData {
        map: MapValue::new(fields),
        field_paths,
    })
}

fn collect_leaf_paths(map: &MapValue) -> Vec<FieldPath> {
    let mut paths = Vec::new();
    let mut prefix = Vec::new();
    collect_leaf_paths_into(map, &mut prefix, &mut paths);
    paths
}

fn collect_leaf_paths_into(
    map: &MapValue,
    prefix: &mut Vec<String>,
    paths: &mut Vec<FieldPath>,
) {
    for (name, value) in map.fields() {
        prefix.push(name.clone());
        match value.kind() {
            ValueKind::Map(nested) if !nested.is_empty() => {
                collect_leaf_paths_into(nested, prefix, paths);
            }
            _ => {
                if let Ok(path) = FieldPath::new(prefix.clone()) {
                    paths.push(path);
                }
            }
        }
        prefix.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(entries: Vec<(&str, Value)>) -> BTreeMap<String, Value> {
        entries
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    #[test]
    fn plain_set_has_no_mask() {
        let encoded =
            encode_set_data(data(vec![("a", Value::from_integer(1))]), &SetOptions::default())
                .unwrap();
        assert!(encoded.mask.is_none());
    }

    #[test]
    fn merge_masks_leaf_paths() {
        let mut nested = BTreeMap::new();
        nested.insert("b".to_string(), Value::from_integer(2));
        let encoded = encode_set_data(
            data(vec![
                ("a", Value::from_integer(1)),
                ("m", Value::from_map(nested)),
            ]),
            &SetOptions::merge_all(),
        )
        .unwrap();
        let mask: Vec<_> = encoded
            .mask
            .unwrap()
            .iter()
            .map(FieldPath::canonical_string)
            .collect();
        assert_eq!(mask, vec!["a", "m.b"]);
    }

    #[test]
    fn merge_fields_must_exist_in_data() {
        let options =
            SetOptions::merge_fields(vec![FieldPath::from_dot_separated("missing").unwrap()])
                .unwrap();
        let err = encode_set_data(data(vec![("a", Value::from_integer(1))]), &options).unwrap_err();
        assert_eq!(err.code_str(), "docstore/invalid-argument");
    }

    #[test]
    fn update_expands_dotted_keys() {
        let encoded =
            encode_update_data(data(vec![("stats.population", Value::from_integer(1))])).unwrap();
        assert_eq!(encoded.field_paths.len(), 1);
        assert_eq!(
            encoded
                .map
                .field(&FieldPath::from_dot_separated("stats.population").unwrap()),
            Some(&Value::from_integer(1))
        );
    }

    #[test]
    fn empty_update_is_rejected() {
        assert!(encode_update_data(BTreeMap::new()).is_err());
    }
}
