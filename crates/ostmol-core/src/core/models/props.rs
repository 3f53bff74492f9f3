use nalgebra::Vector3;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// A typed value stored in a [`GenericPropContainer`].
///
/// The set of kinds is closed: strings, 64-bit floats, 32-bit signed integers,
/// booleans and 3-component vectors.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    String(String),
    Float(f64),
    Int(i32),
    Bool(bool),
    Vec3(Vector3<f64>),
}

impl PropValue {
    /// Returns the human readable name of the value kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PropValue::String(_) => "string",
            PropValue::Float(_) => "float",
            PropValue::Int(_) => "int",
            PropValue::Bool(_) => "bool",
            PropValue::Vec3(_) => "vec3",
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::String(s) => write!(f, "{}", s),
            PropValue::Float(v) => write!(f, "{}", v),
            PropValue::Int(v) => write!(f, "{}", v),
            PropValue::Bool(v) => write!(f, "{}", v),
            PropValue::Vec3(v) => write!(f, "{} {} {}", v.x, v.y, v.z),
        }
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::String(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::String(value.to_string())
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Int(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<Vector3<f64>> for PropValue {
    fn from(value: Vector3<f64>) -> Self {
        PropValue::Vec3(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("Property '{key}' does not exist")]
    Missing { key: String },

    #[error("Property '{key}' has type {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// A name-to-value map attached to every node of the molecular graph.
///
/// Keys are unique per container. Typed getters never convert between kinds,
/// with the single exception that [`float`](Self::float) widens an `Int` value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericPropContainer {
    values: HashMap<String, PropValue>,
}

impl GenericPropContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, returning the value previously stored there.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Option<PropValue> {
        self.values.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.values.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropValue> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns all keys in lexicographic order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn lookup(&self, key: &str) -> Result<&PropValue, PropertyError> {
        self.values.get(key).ok_or_else(|| PropertyError::Missing {
            key: key.to_string(),
        })
    }

    fn mismatch(key: &str, expected: &'static str, found: &PropValue) -> PropertyError {
        PropertyError::TypeMismatch {
            key: key.to_string(),
            expected,
            found: found.kind_name(),
        }
    }

    pub fn string(&self, key: &str) -> Result<&str, PropertyError> {
        match self.lookup(key)? {
            PropValue::String(s) => Ok(s),
            other => Err(Self::mismatch(key, "string", other)),
        }
    }

    pub fn float(&self, key: &str) -> Result<f64, PropertyError> {
        match self.lookup(key)? {
            PropValue::Float(v) => Ok(*v),
            PropValue::Int(v) => Ok(f64::from(*v)),
            other => Err(Self::mismatch(key, "float", other)),
        }
    }

    pub fn int(&self, key: &str) -> Result<i32, PropertyError> {
        match self.lookup(key)? {
            PropValue::Int(v) => Ok(*v),
            other => Err(Self::mismatch(key, "int", other)),
        }
    }

    pub fn bool(&self, key: &str) -> Result<bool, PropertyError> {
        match self.lookup(key)? {
            PropValue::Bool(v) => Ok(*v),
            other => Err(Self::mismatch(key, "bool", other)),
        }
    }

    pub fn vec3(&self, key: &str) -> Result<Vector3<f64>, PropertyError> {
        match self.lookup(key)? {
            PropValue::Vec3(v) => Ok(*v),
            other => Err(Self::mismatch(key, "vec3", other)),
        }
    }

    pub fn string_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, PropertyError> {
        if self.has(key) {
            self.string(key)
        } else {
            Ok(default)
        }
    }

    pub fn float_or(&self, key: &str, default: f64) -> Result<f64, PropertyError> {
        if self.has(key) { self.float(key) } else { Ok(default) }
    }

    pub fn int_or(&self, key: &str, default: i32) -> Result<i32, PropertyError> {
        if self.has(key) { self.int(key) } else { Ok(default) }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, PropertyError> {
        if self.has(key) { self.bool(key) } else { Ok(default) }
    }

    /// Renders the stored value in its canonical textual form.
    ///
    /// Floats use the shortest representation that parses back to the same
    /// `f64`, so the rendering is lossless.
    pub fn as_string(&self, key: &str) -> Result<String, PropertyError> {
        Ok(self.lookup(key)?.to_string())
    }
}
