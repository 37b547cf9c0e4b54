use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use super::expr::{CompareOp, Literal};

/// Runtime values produced while evaluating a program against a [`Txn`](super::Txn).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Double(f64),
    /// A UTF-8 string.
    String(String),
    List(Vec<Value>),
    /// String-keyed map. Ordered so that rendering is stable.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Name of this value's runtime type, as used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null_type",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Compare this value to another using the given operator.
    ///
    /// Equality is defined for every pair of values (values of unrelated
    /// types are simply unequal). Ordering operators return `None` for
    /// incompatible types.
    #[must_use]
    pub fn compare(&self, op: CompareOp, other: &Value) -> Option<bool> {
        match op {
            CompareOp::Eq => Some(self.equals(other)),
            CompareOp::Neq => Some(!self.equals(other)),
            _ => {
                let ord = self.ordering(other)?;
                Some(match op {
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Gte => ord != Ordering::Less,
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Lte => ord != Ordering::Greater,
                    CompareOp::Eq | CompareOp::Neq => unreachable!("handled above"),
                })
            }
        }
    }

    fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Double(b)) | (Value::Double(b), Value::Int(a)) => {
                compare_int_double(*a, *b) == Some(Ordering::Equal)
            }
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.equals(w)))
            }
            _ => self == other,
        }
    }

    fn ordering(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Double(b)) => compare_int_double(*a, *b),
            (Value::Double(a), Value::Int(b)) => compare_int_double(*b, *a).map(Ordering::reverse),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Exact ordering of an integer against a double, without rounding the integer.
#[allow(clippy::cast_possible_truncation)]
fn compare_int_double(i: i64, d: f64) -> Option<Ordering> {
    // 2^63, the first double above every i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if d.is_nan() {
        return None;
    }
    if d >= LIMIT {
        return Some(Ordering::Less);
    }
    if d < -LIMIT {
        return Some(Ordering::Greater);
    }
    let whole = d.trunc();
    // In range, so the cast is exact.
    let ord = i.cmp(&(whole as i64));
    if ord != Ordering::Equal {
        return Some(ord);
    }
    whole.partial_cmp(&d)
}

impl From<&Literal> for Value {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::Null => Value::Null,
            Literal::Bool(v) => Value::Bool(*v),
            Literal::Int(v) => Value::Int(*v),
            Literal::Double(v) => Value::Double(*v),
            Literal::String(v) => Value::String(v.clone()),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(v) => Value::Bool(*v),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v:?}"),
            Value::String(v) => write!(f, "\"{v}\""),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{k}\": {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Double(1_000_000.0).to_string(), "1000000.0");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::String("hello".into()).to_string(), "\"hello\"");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Null]).to_string(),
            "[1, null]"
        );
    }

    #[test]
    fn compare_int() {
        let a = Value::Int(10);
        let b = Value::Int(20);
        assert_eq!(a.compare(CompareOp::Eq, &b), Some(false));
        assert_eq!(a.compare(CompareOp::Neq, &b), Some(true));
        assert_eq!(a.compare(CompareOp::Lt, &b), Some(true));
        assert_eq!(a.compare(CompareOp::Lte, &b), Some(true));
        assert_eq!(a.compare(CompareOp::Gt, &b), Some(false));
        assert_eq!(a.compare(CompareOp::Gte, &a), Some(true));
    }

    #[test]
    fn compare_int_double_cross_type() {
        let i = Value::Int(10);
        let d = Value::Double(10.0);
        assert_eq!(i.compare(CompareOp::Eq, &d), Some(true));
        assert_eq!(d.compare(CompareOp::Eq, &i), Some(true));
        assert_eq!(i.compare(CompareOp::Lt, &Value::Double(10.5)), Some(true));
    }

    #[test]
    fn int_double_comparison_is_exact() {
        let big = Value::Int(9_007_199_254_740_993);
        let near = Value::Double(9_007_199_254_740_992.0);
        assert_eq!(big.compare(CompareOp::Eq, &near), Some(false));
        assert_eq!(near.compare(CompareOp::Eq, &big), Some(false));
        assert_eq!(big.compare(CompareOp::Gt, &near), Some(true));
        assert_eq!(near.compare(CompareOp::Lt, &big), Some(true));
        assert_eq!(
            Value::Int(9_007_199_254_740_992).compare(CompareOp::Eq, &near),
            Some(true)
        );

        assert_eq!(
            Value::Int(i64::MAX).compare(CompareOp::Lt, &Value::Double(9.3e18)),
            Some(true)
        );
        assert_eq!(
            Value::Int(i64::MAX).compare(CompareOp::Eq, &Value::Double(i64::MAX as f64)),
            Some(false)
        );
        assert_eq!(
            Value::Int(i64::MIN).compare(CompareOp::Eq, &Value::Double(i64::MIN as f64)),
            Some(true)
        );
        let zero = Value::Int(0);
        assert_eq!(zero.compare(CompareOp::Lt, &Value::Double(f64::INFINITY)), Some(true));
        assert_eq!(zero.compare(CompareOp::Gt, &Value::Double(f64::NEG_INFINITY)), Some(true));
        assert_eq!(zero.compare(CompareOp::Eq, &Value::Double(f64::NAN)), Some(false));
    }

    #[test]
    fn int_double_fractions_order_correctly() {
        let cases = [
            (-3, -2.5, Ordering::Less),
            (-2, -2.5, Ordering::Greater),
            (2, 2.5, Ordering::Less),
            (3, 2.5, Ordering::Greater),
            (0, -0.0, Ordering::Equal),
        ];
        for (i, d, expected) in cases {
            assert_eq!(compare_int_double(i, d), Some(expected), "{i} vs {d}");
            assert_eq!(
                Value::Double(d).compare(CompareOp::Gt, &Value::Int(i)),
                Some(expected == Ordering::Less),
                "{d} > {i}"
            );
        }
    }

    #[test]
    fn compare_string() {
        let a = Value::String("apple".into());
        let b = Value::String("banana".into());
        assert_eq!(a.compare(CompareOp::Lt, &b), Some(true));
        assert_eq!(a.compare(CompareOp::Eq, &a), Some(true));
    }

    #[test]
    fn equality_across_unrelated_types_is_false() {
        let i = Value::Int(1);
        let s = Value::String("1".into());
        assert_eq!(i.compare(CompareOp::Eq, &s), Some(false));
        assert_eq!(i.compare(CompareOp::Neq, &s), Some(true));
    }

    #[test]
    fn ordering_across_unrelated_types_is_none() {
        let i = Value::Int(1);
        let s = Value::String("1".into());
        assert_eq!(i.compare(CompareOp::Lt, &s), None);
        assert_eq!(Value::Null.compare(CompareOp::Gte, &Value::Null), None);
    }

    #[test]
    fn nan_has_no_ordering() {
        let nan = Value::Double(f64::NAN);
        assert_eq!(nan.compare(CompareOp::Lt, &Value::Double(1.0)), None);
        assert_eq!(nan.compare(CompareOp::Eq, &nan), Some(false));
    }

    #[test]
    fn list_equality_is_elementwise() {
        let a = Value::List(vec![Value::Int(1), Value::Double(2.0)]);
        let b = Value::List(vec![Value::Double(1.0), Value::Int(2)]);
        assert_eq!(a.compare(CompareOp::Eq, &b), Some(true));
    }

    #[test]
    fn from_json() {
        let json = serde_json::json!({"a": 1, "b": [true, 2.5], "c": null});
        let value = Value::from(&json);
        let Value::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(map["a"], Value::Int(1));
        assert_eq!(
            map["b"],
            Value::List(vec![Value::Bool(true), Value::Double(2.5)])
        );
        assert_eq!(map["c"], Value::Null);
    }
}
