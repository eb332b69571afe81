//! Name-addressed algorithm parameters.
//!
//! A flat `name -> typed value` store filled from defaults, code, or
//! command-line strings. Lookups are type-checked; the only permitted
//! coercion is between the two numeric kinds. Unknown names are accepted
//! silently on write and fail on read.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParamError {
    #[error("parameter not found: {0}")]
    NotFound(String),

    #[error("parameter {name} holds a {found}, expected a {expected}")]
    WrongType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("cannot parse parameter {name} from {value:?}")]
    Parse { name: String, value: String },
}

/// A stored parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    fn kind(&self) -> &'static str {
        match self {
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Bool(_) => "bool",
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) {
        self.values.insert(name.to_owned(), value.into());
    }

    /// Parse a textual value: `true`/`false` become booleans, text without a
    /// decimal point becomes an integer when it parses as one, anything else
    /// that parses as a float becomes a float.
    pub fn set_from_str(&mut self, name: &str, value: &str) -> Result<(), ParamError> {
        if value == "true" {
            self.set(name, true);
            return Ok(());
        }
        if value == "false" {
            self.set(name, false);
            return Ok(());
        }

        if !value.contains('.') {
            if let Ok(i) = value.parse::<i64>() {
                self.set(name, i);
                return Ok(());
            }
        }

        match value.parse::<f64>() {
            Ok(f) => {
                self.set(name, f);
                Ok(())
            }
            Err(_) => Err(ParamError::Parse {
                name: name.to_owned(),
                value: value.to_owned(),
            }),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn lookup(&self, name: &str) -> Result<ParamValue, ParamError> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| ParamError::NotFound(name.to_owned()))
    }

    /// Float read; integer values coerce.
    pub fn get_f64(&self, name: &str) -> Result<f64, ParamError> {
        match self.lookup(name)? {
            ParamValue::Float(f) => Ok(f),
            ParamValue::Int(i) => Ok(i as f64),
            other => Err(ParamError::WrongType {
                name: name.to_owned(),
                expected: "float",
                found: other.kind(),
            }),
        }
    }

    /// Integer read; float values coerce by truncation.
    pub fn get_i64(&self, name: &str) -> Result<i64, ParamError> {
        match self.lookup(name)? {
            ParamValue::Int(i) => Ok(i),
            ParamValue::Float(f) => Ok(f as i64),
            other => Err(ParamError::WrongType {
                name: name.to_owned(),
                expected: "int",
                found: other.kind(),
            }),
        }
    }

    /// Boolean read; no coercion.
    pub fn get_bool(&self, name: &str) -> Result<bool, ParamError> {
        match self.lookup(name)? {
            ParamValue::Bool(b) => Ok(b),
            other => Err(ParamError::WrongType {
                name: name.to_owned(),
                expected: "bool",
                found: other.kind(),
            }),
        }
    }

    /// Float read falling back to `default` when the name is absent.
    pub fn f64_or(&self, name: &str, default: f64) -> Result<f64, ParamError> {
        if self.has(name) {
            self.get_f64(name)
        } else {
            Ok(default)
        }
    }

    /// Integer read falling back to `default` when the name is absent.
    pub fn i64_or(&self, name: &str, default: i64) -> Result<i64, ParamError> {
        if self.has(name) {
            self.get_i64(name)
        } else {
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_from_str_kinds() {
        let mut p = Params::new();
        p.set_from_str("flag", "true").unwrap();
        p.set_from_str("count", "42").unwrap();
        p.set_from_str("ratio", "0.25").unwrap();
        p.set_from_str("sci", "1e3").unwrap();

        assert_eq!(p.get_bool("flag").unwrap(), true);
        assert_eq!(p.get_i64("count").unwrap(), 42);
        assert_eq!(p.get_f64("ratio").unwrap(), 0.25);
        assert_eq!(p.get_f64("sci").unwrap(), 1000.0);
    }

    #[test]
    fn test_parse_failure() {
        let mut p = Params::new();
        let err = p.set_from_str("bad", "not-a-number").unwrap_err();
        assert!(matches!(err, ParamError::Parse { .. }));
    }

    #[test]
    fn test_numeric_coercion_both_ways() {
        let mut p = Params::new();
        p.set("n", 7i64);
        p.set("x", 2.9f64);

        assert_eq!(p.get_f64("n").unwrap(), 7.0);
        assert_eq!(p.get_i64("x").unwrap(), 2); // truncates
    }

    #[test]
    fn test_bool_is_not_coercible() {
        let mut p = Params::new();
        p.set("flag", true);
        assert!(matches!(
            p.get_f64("flag"),
            Err(ParamError::WrongType { .. })
        ));
        p.set("n", 1i64);
        assert!(matches!(p.get_bool("n"), Err(ParamError::WrongType { .. })));
    }

    #[test]
    fn test_missing_name() {
        let p = Params::new();
        assert_eq!(
            p.get_f64("absent").unwrap_err(),
            ParamError::NotFound("absent".into())
        );
        assert!(!p.has("absent"));
        assert_eq!(p.f64_or("absent", 1.5).unwrap(), 1.5);
    }
}
