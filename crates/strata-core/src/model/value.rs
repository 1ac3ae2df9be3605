use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metadata::ColumnType;

/// A single column value as exchanged with the query-execution layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Text(String),
    Json(serde_json::Value),
}

/// A stored row keyed by storage (column) name
pub type Row = BTreeMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render as plain text (used for path segments and diagnostics)
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Uuid(v) => v.to_string(),
            Value::Timestamp(v) => v.to_rfc3339(),
            Value::Text(v) => v.clone(),
            Value::Json(v) => v.to_string(),
        }
    }

    /// Convert a raw stored value into the representation of `column_type`
    ///
    /// Stores without native uuid/timestamp/bool types hand back integers or
    /// text; values that cannot be converted are returned unchanged.
    pub fn coerce(self, column_type: ColumnType) -> Value {
        match (column_type, self) {
            (_, Value::Null) => Value::Null,
            (ColumnType::Bool, Value::Int(v)) => Value::Bool(v != 0),
            (ColumnType::Int, Value::Float(v)) => Value::Int(v as i64),
            (ColumnType::Int, Value::Text(s)) => match s.parse() {
                Ok(v) => Value::Int(v),
                Err(_) => Value::Text(s),
            },
            (ColumnType::Float, Value::Int(v)) => Value::Float(v as f64),
            (ColumnType::Uuid, Value::Text(s)) => match Uuid::parse_str(&s) {
                Ok(v) => Value::Uuid(v),
                Err(_) => Value::Text(s),
            },
            (ColumnType::Timestamp, Value::Text(s)) => {
                if let Ok(v) = DateTime::parse_from_rfc3339(&s) {
                    Value::Timestamp(v.with_timezone(&Utc))
                } else if let Ok(v) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S") {
                    // SQL CURRENT_TIMESTAMP text
                    Value::Timestamp(v.and_utc())
                } else {
                    Value::Text(s)
                }
            }
            (ColumnType::Json, Value::Text(s)) => match serde_json::from_str(&s) {
                Ok(v) => Value::Json(v),
                Err(_) => Value::Text(s),
            },
            (_, other) => other,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Uuid(_) => 3,
            Value::Timestamp(_) => 4,
            Value::Text(_) => 5,
            Value::Json(_) => 6,
        }
    }
}

// Numbers compare by exact value: an Int equals a Float only when the float
// is integral and holds that same i64. `-0.0 == 0.0`; NaNs sort by total
// order at either end. Hash agrees with this so `Value` can key hash maps.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) if a == b => Ordering::Equal,
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => cmp_int_float(*a, *b),
            (Value::Float(a), Value::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Json(a), Value::Json(b)) => a.to_string().cmp(&b.to_string()),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

/// 2^63 as f64; the first float above every i64
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// The i64 an integral, in-range float holds exactly
fn float_as_int(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&f)).then_some(f as i64)
}

fn cmp_int_float(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return if f.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if f >= I64_BOUND {
        return Ordering::Less;
    }
    if f < -I64_BOUND {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    // in range, so the truncation is exact
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0_f64.total_cmp(&(f - whole)),
        unequal => unequal,
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => match float_as_int(*v) {
                Some(i) => i.hash(state),
                None => v.to_bits().hash(state),
            },
            Value::Uuid(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::Text(v) => v.hash(state),
            Value::Json(v) => v.to_string().hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_int_and_float_compare_numerically() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert!(Value::Int(2) < Value::Float(2.5));
    }

    #[test]
    fn test_large_int_float_equality_is_transitive() {
        // GIVEN: two ints one apart above 2^53 and the float between them rounds to
        let odd = Value::Int(9_007_199_254_740_993);
        let float = Value::Float(9_007_199_254_740_992.0);
        let even = Value::Int(9_007_199_254_740_992);

        // THEN: only the exactly equal pair matches, and ordering stays consistent
        assert_ne!(odd, float);
        assert_eq!(float, even);
        assert_ne!(odd, even);
        assert!(even < odd && float < odd);
        let keys: HashSet<Value> = [odd, float, even].into_iter().collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_float_edges_against_ints() {
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
        assert_eq!(Value::Float(-0.0), Value::Int(0));
        assert!(Value::Int(-1) > Value::Float(-1.5));
        assert!(Value::Int(i64::MAX) < Value::Float(9_223_372_036_854_775_808.0));
        assert!(Value::Int(i64::MIN) == Value::Float(-9_223_372_036_854_775_808.0));
        assert!(Value::Int(i64::MAX) < Value::Float(f64::NAN));
        assert!(Value::Int(i64::MIN) > Value::Float(-f64::NAN));
        let zeros: HashSet<Value> = [Value::Float(-0.0), Value::Float(0.0), Value::Int(0)]
            .into_iter()
            .collect();
        assert_eq!(zeros.len(), 1);
    }

    #[test]
    fn test_values_usable_as_hash_keys() {
        let mut set = HashSet::new();
        set.insert(Value::Int(1));
        set.insert(Value::Float(1.0));
        set.insert(Value::from("1"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_coerce_stored_representations() {
        let id = Uuid::new_v4();
        assert_eq!(
            Value::Text(id.to_string()).coerce(ColumnType::Uuid),
            Value::Uuid(id)
        );
        assert_eq!(Value::Int(1).coerce(ColumnType::Bool), Value::Bool(true));
        assert_eq!(Value::Null.coerce(ColumnType::Int), Value::Null);
        assert_eq!(
            Value::from("not-a-uuid").coerce(ColumnType::Uuid),
            Value::from("not-a-uuid")
        );
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::from("x"));
    }
}
