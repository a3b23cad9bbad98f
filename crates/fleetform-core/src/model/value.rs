//! Attribute values and cross-resource references

use crate::error::ValidationError;
use crate::model::ResourceAddress;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Reference to another resource's attribute: `type.name.attribute[.path]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub target: ResourceAddress,
    /// Dotted attribute path inside the target
    pub attribute: String,
}

impl Reference {
    pub fn new(target: ResourceAddress, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: attribute.into(),
        }
    }

    /// First segment of the attribute path
    pub fn root_attribute(&self) -> &str {
        self.attribute
            .split_once('.')
            .map(|(root, _)| root)
            .unwrap_or(&self.attribute)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

impl FromStr for Reference {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ty), Some(name), Some(attr))
                if !ty.is_empty() && !name.is_empty() && !attr.is_empty() =>
            {
                Ok(Self::new(ResourceAddress::new(ty, name), attr))
            }
            _ => Err(ValidationError::InvalidDeclaration(format!(
                "'{}' is not a reference (expected type.name.attribute)",
                s
            ))),
        }
    }
}

/// Desired value of an attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<AttrValue>),
    /// Nested block or map
    Block(BTreeMap<String, AttrValue>),
    Ref(Reference),
}

impl AttrValue {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, AttrValue::List(_) | AttrValue::Block(_))
    }

    /// All references contained in this value, depth first
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            AttrValue::Ref(r) => out.push(r),
            AttrValue::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            AttrValue::Block(map) => map.values().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }

    /// Converts to a concrete JSON value.
    ///
    /// Returns `None` when a reference cannot be resolved yet (its value is
    /// only known after the referenced resource is applied).
    pub fn resolve<F>(&self, lookup: &F) -> Option<Value>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        Some(match self {
            AttrValue::Null => Value::Null,
            AttrValue::Bool(b) => Value::Bool(*b),
            AttrValue::Int(i) => Value::from(*i),
            AttrValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            AttrValue::String(s) => Value::String(s.clone()),
            AttrValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(|v| v.resolve(lookup))
                    .collect::<Option<Vec<_>>>()?,
            ),
            AttrValue::Block(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.resolve(lookup)?);
                }
                Value::Object(obj)
            }
            AttrValue::Ref(r) => lookup(r)?,
        })
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Null => write!(f, "null"),
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Int(i) => write!(f, "{}", i),
            AttrValue::Float(x) => write!(f, "{}", x),
            AttrValue::String(s) => write!(f, "{:?}", s),
            AttrValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            AttrValue::Block(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{} = {}", k, v)).collect();
                write!(f, "{{ {} }}", parts.join(", "))
            }
            AttrValue::Ref(r) => write!(f, "${{{}}}", r),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<Reference> for AttrValue {
    fn from(r: Reference) -> Self {
        AttrValue::Ref(r)
    }
}

/// Follows a dotted path (`a.b.c`) through nested JSON objects.
/// Numeric segments index into arrays.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
