//! The cross-type total order the backend sorts field values by. Queries
//! build their document comparators on top of [`compare_values`].

use std::cmp::Ordering;

use crate::value::{Value, ValueKind};

/// Relative position of each value type in the global sort order.
fn type_rank(value: &Value) -> u8 {
    match value.kind() {
        ValueKind::Null => 0,
        ValueKind::Boolean(_) => 1,
        ValueKind::Integer(_) | ValueKind::Double(_) => 2,
        ValueKind::Timestamp(_) => 3,
        ValueKind::String(_) => 4,
        ValueKind::Bytes(_) => 5,
        ValueKind::Reference(_) => 6,
        ValueKind::Array(_) => 7,
        ValueKind::Map(_) => 8,
    }
}

/// Totally orders two field values: values of different types sort by type
/// rank, values of the same type by their natural order. Integers and
/// doubles compare numerically with NaN ordered before every other number.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    let left_rank = type_rank(left);
    let right_rank = type_rank(right);
    if left_rank != right_rank {
        return left_rank.cmp(&right_rank);
    }

    match (left.kind(), right.kind()) {
        (ValueKind::Null, ValueKind::Null) => Ordering::Equal,
        (ValueKind::Boolean(l), ValueKind::Boolean(r)) => l.cmp(r),
        (ValueKind::Integer(l), ValueKind::Integer(r)) => l.cmp(r),
        (ValueKind::Integer(l), ValueKind::Double(r)) => compare_numbers(*l as f64, *r),
        (ValueKind::Double(l), ValueKind::Integer(r)) => compare_numbers(*l, *r as f64),
        (ValueKind::Double(l), ValueKind::Double(r)) => compare_numbers(*l, *r),
        (ValueKind::Timestamp(l), ValueKind::Timestamp(r)) => l.cmp(r),
        (ValueKind::String(l), ValueKind::String(r)) => l.cmp(r),
        (ValueKind::Bytes(l), ValueKind::Bytes(r)) => l.as_slice().cmp(r.as_slice()),
        (ValueKind::Reference(l), ValueKind::Reference(r)) => l.cmp(r),
        (ValueKind::Array(l), ValueKind::Array(r)) => {
            for (lv, rv) in l.values().iter().zip(r.values()) {
                match compare_values(lv, rv) {
                    Ordering::Equal => continue,
                    non_eq => return non_eq,
                }
            }
            l.len().cmp(&r.len())
        }
        (ValueKind::Map(l), ValueKind::Map(r)) => {
            for ((lk, lv), (rk, rv)) in l.fields().iter().zip(r.fields()) {
                match lk.cmp(rk) {
                    Ordering::Equal => {}
                    non_eq => return non_eq,
                }
                match compare_values(lv, rv) {
                    Ordering::Equal => {}
                    non_eq => return non_eq,
                }
            }
            l.len().cmp(&r.len())
        }
        _ => unreachable!("value types with equal rank always match above"),
    }
}

/// Whether two values belong to the same sort class (integers and doubles
/// share one). Range filters only match values of the filter's own class.
pub fn same_sort_class(left: &Value, right: &Value) -> bool {
    type_rank(left) == type_rank(right)
}

fn compare_numbers(left: f64, right: f64) -> Ordering {
    if left.is_nan() {
        return if right.is_nan() {
            Ordering::Equal
        } else {
            Ordering::Less
        };
    }
    if right.is_nan() {
        return Ordering::Greater;
    }
    left.partial_cmp(&right).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Timestamp;
    use std::collections::BTreeMap;

    #[test]
    fn orders_across_types() {
        let ordered = vec![
            Value::null(),
            Value::from_bool(false),
            Value::from_integer(0),
            Value::from_timestamp(Timestamp::new(0, 0)),
            Value::from_string(""),
            Value::from_bytes(vec![].into()),
            Value::from_reference("projects/p/databases/d/documents/a/b"),
            Value::from_array(vec![]),
            Value::from_map(BTreeMap::new()),
        ];
        for window in ordered.windows(2) {
            assert_eq!(compare_values(&window[0], &window[1]), Ordering::Less);
        }
    }

    #[test]
    fn mixes_integers_and_doubles() {
        assert_eq!(
            compare_values(&Value::from_integer(1), &Value::from_double(1.5)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::from_double(2.0), &Value::from_integer(2)),
            Ordering::Equal
        );
    }

    #[test]
    fn nan_sorts_first_among_numbers() {
        assert_eq!(
            compare_values(&Value::from_double(f64::NAN), &Value::from_integer(i64::MIN)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::from_double(f64::NAN), &Value::from_double(f64::NAN)),
            Ordering::Equal
        );
    }

    #[test]
    fn arrays_compare_elementwise_then_by_length() {
        let short = Value::from_array(vec![Value::from_integer(1)]);
        let long = Value::from_array(vec![Value::from_integer(1), Value::from_integer(2)]);
        assert_eq!(compare_values(&short, &long), Ordering::Less);
        let bigger = Value::from_array(vec![Value::from_integer(2)]);
        assert_eq!(compare_values(&bigger, &long), Ordering::Greater);
    }
}
