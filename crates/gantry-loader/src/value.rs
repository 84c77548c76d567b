// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Dynamic module export values and factories

use crate::error::Result;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Shared, mutable object value (also used for the live `exports` handle)
pub type SharedObject = Rc<RefCell<BTreeMap<String, Value>>>;

/// Shared, mutable array value
pub type SharedArray = Rc<RefCell<Vec<Value>>>;

/// Native callable value, invoked with positional arguments
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value>>;

/// The export value of a module.
///
/// `Undetermined` is the "not yet determined" sentinel and is distinct from
/// a legitimate `Undefined` or `Null` export. Shared variants (`Array`,
/// `Object`, `Function`) compare by identity, everything else by value.
#[derive(Clone)]
pub enum Value {
    /// The module's export has not been determined yet
    Undetermined,
    /// Explicit absence of a value
    Undefined,
    /// Null value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Numeric value
    Number(f64),
    /// String value
    String(String),
    /// Shared array value
    Array(SharedArray),
    /// Shared object value
    Object(SharedObject),
    /// Native callable value
    Function(NativeFn),
}

impl Value {
    /// Create an empty shared object
    pub fn object() -> Value {
        Value::Object(Rc::new(RefCell::new(BTreeMap::new())))
    }

    /// Create a shared object from key/value pairs
    pub fn object_with<I>(entries: I) -> Value
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Value::Object(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    /// Create a shared array from the given items
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    /// Wrap a native function as a value
    pub fn function(f: impl Fn(&[Value]) -> Result<Value> + 'static) -> Value {
        Value::Function(Rc::new(f))
    }

    /// Whether this is the "not yet determined" sentinel
    pub fn is_undetermined(&self) -> bool {
        matches!(self, Value::Undetermined)
    }

    /// Whether this is the undefined value
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// The string content, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The numeric content, if this is a number value
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean content, if this is a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The shared object, if this is an object value
    pub fn as_object(&self) -> Option<&SharedObject> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The shared array, if this is an array value
    pub fn as_array(&self) -> Option<&SharedArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The native function, if this is a callable value
    pub fn as_function(&self) -> Option<&NativeFn> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Short name of this value's type, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undetermined => "undetermined",
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// Convert a JSON value into a module value
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object_with(
                map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))),
            ),
        }
    }

    /// Convert into a JSON value.
    ///
    /// Functions and the undetermined sentinel have no JSON representation
    /// and yield `None`; `Undefined` maps to JSON null.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::Undetermined | Value::Function(_) => None,
            Value::Undefined | Value::Null => Some(serde_json::Value::Null),
            Value::Boolean(b) => Some(serde_json::Value::Bool(*b)),
            Value::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number),
            Value::String(s) => Some(serde_json::Value::String(s.clone())),
            Value::Array(items) => Some(serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json().unwrap_or(serde_json::Value::Null))
                    .collect(),
            )),
            Value::Object(map) => Some(serde_json::Value::Object(
                map.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json().unwrap_or(serde_json::Value::Null)))
                    .collect(),
            )),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undetermined, Value::Undetermined) => true,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undetermined => write!(f, "Undetermined"),
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(a) => f.debug_tuple("Array").field(&a.borrow()).finish(),
            Value::Object(o) => f.debug_tuple("Object").field(&o.borrow()).finish(),
            Value::Function(_) => write!(f, "Function(..)"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

/// The producer of a module's export value
#[derive(Clone)]
pub enum Factory {
    /// Callable factory, invoked with the resolved dependency values
    Function(NativeFn),
    /// Static-value module: the value itself is the content
    Value(Value),
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Factory::Function(_) => write!(f, "Factory::Function(..)"),
            Factory::Value(v) => f.debug_tuple("Factory::Value").field(v).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_equality() {
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
        assert_eq!(Value::String("a".into()), Value::String("a".into()));
        assert_ne!(Value::Undetermined, Value::Undefined);
        assert_ne!(Value::Null, Value::Undefined);
    }

    #[test]
    fn test_shared_values_compare_by_identity() {
        let a = Value::object();
        let b = Value::object();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());

        let x = Value::array(vec![Value::Number(1.0)]);
        assert_ne!(x, Value::array(vec![Value::Number(1.0)]));
    }

    #[test]
    fn test_json_conversion() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": 1, "b": [true, null], "c": "x"}"#).unwrap();
        let value = Value::from_json(&json);
        let object = value.as_object().unwrap().borrow();
        assert_eq!(object.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(object.get("c"), Some(&Value::String("x".into())));
        let b = object.get("b").unwrap().as_array().unwrap().borrow().clone();
        assert_eq!(b, vec![Value::Boolean(true), Value::Null]);
    }

    #[test]
    fn test_undetermined_has_no_json_form() {
        assert!(Value::Undetermined.to_json().is_none());
        assert_eq!(Value::Undefined.to_json(), Some(serde_json::Value::Null));
    }
}
