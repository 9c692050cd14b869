//! Wire token typing.
//!
//! TCI carries every value as a bare ASCII token with no type marker. The
//! client types each token by attempting, in order, an integer parse, a
//! floating-point parse, and a case-insensitive `true`/`false` match, and
//! otherwise keeps the token as a string. [`coerce`] is that function;
//! [`Value`] is its result.
//!
//! A token like `"1"` always becomes [`Value::Int`], never a boolean. Code
//! that needs boolean semantics for such a command must interpret the
//! integer itself.

use std::fmt;

use serde::Serialize;

/// A single typed value parsed from (or destined for) the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Signed integer token, e.g. `14200000`.
    Int(i64),
    /// Floating-point token, e.g. `-3.5`.
    Float(f64),
    /// `true` / `false` in any letter case.
    Bool(bool),
    /// Anything else, kept verbatim.
    Str(String),
}

/// Convert a wire token to the most specific [`Value`].
///
/// The attempts are deterministic and locale-independent: integer, then
/// float, then boolean, then the original string unchanged.
pub fn coerce(token: &str) -> Value {
    if let Ok(i) = token.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = token.parse::<f64>() {
        return Value::Float(f);
    }
    if token.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if token.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::Str(token.to_string())
}

impl Value {
    /// The integer payload, if this is an [`Value::Int`].
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The numeric payload as `f64`, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The boolean payload, if this is a [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string payload, if this is a [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// The value stored for a parameter: one scalar, or an ordered list when
/// the command carries more than one value parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(Value),
    List(Vec<Value>),
}

impl ParamValue {
    /// Collapse a value list: empty is absent, exactly one is a bare
    /// scalar, more than one stays a list.
    pub fn from_values(mut values: Vec<Value>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(ParamValue::Scalar),
            _ => Some(ParamValue::List(values)),
        }
    }

    /// The scalar, if this is a single value.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            ParamValue::Scalar(v) => Some(v),
            ParamValue::List(_) => None,
        }
    }

    /// All values in wire order (a scalar is a one-element slice).
    pub fn values(&self) -> &[Value] {
        match self {
            ParamValue::Scalar(v) => std::slice::from_ref(v),
            ParamValue::List(vs) => vs,
        }
    }
}

impl From<Value> for ParamValue {
    fn from(v: Value) -> Self {
        ParamValue::Scalar(v)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Scalar(v) => write!(f, "{v}"),
            ParamValue::List(vs) => {
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_integer() {
        assert_eq!(coerce("42"), Value::Int(42));
        assert_eq!(coerce("-7"), Value::Int(-7));
        assert_eq!(coerce("14200000"), Value::Int(14_200_000));
    }

    #[test]
    fn coerce_float() {
        assert_eq!(coerce("3.14"), Value::Float(3.14));
        assert_eq!(coerce("-0.5"), Value::Float(-0.5));
    }

    #[test]
    fn coerce_bool_any_case() {
        assert_eq!(coerce("true"), Value::Bool(true));
        assert_eq!(coerce("TRUE"), Value::Bool(true));
        assert_eq!(coerce("False"), Value::Bool(false));
    }

    #[test]
    fn coerce_string_fallback() {
        assert_eq!(coerce("hello"), Value::Str("hello".into()));
        assert_eq!(coerce("usb"), Value::Str("usb".into()));
        assert_eq!(coerce(""), Value::Str(String::new()));
    }

    #[test]
    fn one_is_integer_not_bool() {
        assert_eq!(coerce("1"), Value::Int(1));
        assert_eq!(coerce("0"), Value::Int(0));
    }

    #[test]
    fn no_partial_matches() {
        assert_eq!(coerce("12abc"), Value::Str("12abc".into()));
        assert_eq!(coerce("truely"), Value::Str("truely".into()));
    }

    #[test]
    fn display_round_trips_through_coerce() {
        for v in [
            Value::Int(50),
            Value::Float(3.25),
            Value::Bool(true),
            Value::Str("cw".into()),
        ] {
            assert_eq!(coerce(&v.to_string()), v);
        }
    }

    #[test]
    fn param_value_collapse() {
        assert_eq!(ParamValue::from_values(vec![]), None);
        assert_eq!(
            ParamValue::from_values(vec![Value::Int(5)]),
            Some(ParamValue::Scalar(Value::Int(5)))
        );
        assert_eq!(
            ParamValue::from_values(vec![Value::Int(-3000), Value::Int(3000)]),
            Some(ParamValue::List(vec![Value::Int(-3000), Value::Int(3000)]))
        );
    }

    #[test]
    fn param_value_display_and_json() {
        let pv = ParamValue::List(vec![Value::Int(-100), Value::Bool(false)]);
        assert_eq!(pv.to_string(), "-100,false");
        assert_eq!(serde_json::to_string(&pv).unwrap(), "[-100,false]");
        let scalar = ParamValue::Scalar(Value::Str("usb".into()));
        assert_eq!(serde_json::to_string(&scalar).unwrap(), "\"usb\"");
    }
}
