//! Dynamic values stored in records.

use crate::record::RecordOutlet;
use std::fmt;
use std::rc::Rc;
use tidal_common::{Result, TidalError};

/// A record member value.
///
/// Records compare by identity: two `Value::Record`s are equal only if they
/// hold the same record node.
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Num(f64),
    Text(String),
    Record(Rc<RecordOutlet>),
}

impl Value {
    /// Name of this value's kind, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Num(_) => "number",
            Value::Text(_) => "text",
            Value::Record(_) => "record",
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(TidalError::type_mismatch("bool", other.type_name())),
        }
    }

    pub fn as_num(&self) -> Result<f64> {
        match self {
            Value::Num(n) => Ok(*n),
            other => Err(TidalError::type_mismatch("number", other.type_name())),
        }
    }

    pub fn as_text(&self) -> Result<&str> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(TidalError::type_mismatch("text", other.type_name())),
        }
    }

    pub fn as_record(&self) -> Result<&Rc<RecordOutlet>> {
        match self {
            Value::Record(record) => Ok(record),
            other => Err(TidalError::type_mismatch("record", other.type_name())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Record(record) => fmt::Debug::fmt(record, f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Num(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Rc<RecordOutlet>> for Value {
    fn from(record: Rc<RecordOutlet>) -> Self {
        Value::Record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert!(Value::from(true).as_bool().unwrap());
        assert_eq!(Value::from(2).as_num().unwrap(), 2.0);
        assert_eq!(Value::from("hi").as_text().unwrap(), "hi");

        let err = Value::from(1.5).as_text().unwrap_err();
        assert!(matches!(err, TidalError::TypeMismatch { .. }));
        assert_eq!(err.to_string(), "Type mismatch: expected text, got number");
    }

    #[test]
    fn test_value_record_identity() {
        let a = RecordOutlet::new();
        let b = RecordOutlet::new();
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
        assert_ne!(Value::from(1), Value::from("1"));
    }
}
