//! Reference resolution against declared and live attributes

use crate::state::LiveRecord;
use fleetform_core::{AttrValue, Reference, ResourceAddress, lookup_path};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

pub(crate) type Declared<'a> = HashMap<ResourceAddress, &'a BTreeMap<String, AttrValue>>;

/// Which source wins when a reference target has both
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Precedence {
    /// Planning: the declared value is what will be applied
    Declared,
    /// Applying: committed records carry provider-computed values
    Live,
}

pub(crate) struct Resolver<'a> {
    pub declared: &'a Declared<'a>,
    pub live: &'a BTreeMap<String, LiveRecord>,
    /// Targets whose live attributes are about to be replaced
    pub pending: &'a HashSet<ResourceAddress>,
    pub precedence: Precedence,
}

impl Resolver<'_> {
    /// Concrete value, or `None` when it is only known after apply
    pub fn resolve(&self, value: &AttrValue) -> Option<Value> {
        value.resolve(&|r: &Reference| self.lookup(r))
    }

    pub fn resolve_all(
        &self,
        attributes: &BTreeMap<String, AttrValue>,
    ) -> std::result::Result<BTreeMap<String, Value>, String> {
        let mut out = BTreeMap::new();
        for (name, value) in attributes {
            match self.resolve(value) {
                Some(Value::Null) => {}
                Some(v) => {
                    out.insert(name.clone(), v);
                }
                None => {
                    let refs: Vec<String> = value.references().iter().map(|r| r.to_string()).collect();
                    return Err(format!(
                        "value of '{}' is unknown (references {})",
                        name,
                        refs.join(", ")
                    ));
                }
            }
        }
        Ok(out)
    }

    fn lookup(&self, reference: &Reference) -> Option<Value> {
        match self.precedence {
            Precedence::Declared => match self.from_declared(reference) {
                Some(value) => value,
                None if self.pending.contains(&reference.target) => None,
                None => self.from_live(reference),
            },
            Precedence::Live => self
                .from_live(reference)
                .or_else(|| self.from_declared(reference).flatten()),
        }
    }

    /// `None` when the target does not declare the attribute, `Some(None)`
    /// when it does but the value is still unknown
    fn from_declared(&self, reference: &Reference) -> Option<Option<Value>> {
        let attributes = self.declared.get(&reference.target)?;
        let (root, rest) = split_path(&reference.attribute);
        let declared = attributes.get(root)?;
        Some(self.resolve(declared).and_then(|value| match rest {
            Some(path) => lookup_path(&value, path).cloned(),
            None => Some(value),
        }))
    }

    fn from_live(&self, reference: &Reference) -> Option<Value> {
        record_lookup(self.live.get(&reference.target.key())?, &reference.attribute)
    }
}

/// Dotted path into a record's attributes
pub(crate) fn record_lookup(record: &LiveRecord, path: &str) -> Option<Value> {
    let (root, rest) = split_path(path);
    let value = record.attributes.get(root)?;
    match rest {
        Some(path) => lookup_path(value, path).cloned(),
        None => Some(value.clone()),
    }
}

fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (path, None),
    }
}
