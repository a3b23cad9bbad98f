//! `resource` node parsing

use crate::error::{Result, ValidationError};
use crate::model::{AttrValue, Reference, ResourceAddress, ResourceDecl};
use kdl::{KdlEntry, KdlNode};
use std::collections::{BTreeMap, HashSet};

/// Type annotation marking a string as a reference: `(ref)"network.main.id"`
const REF_ANNOTATION: &str = "ref";

/// Parses `resource "<type>" "<name>" { ... }`
pub fn parse_resource(node: &KdlNode) -> Result<ResourceDecl> {
    let args: Vec<&str> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .collect();

    let (resource_type, name) = match args.as_slice() {
        [ty, name] => (*ty, *name),
        _ => {
            return Err(ValidationError::InvalidDeclaration(
                "resource requires a type and a name: resource \"<type>\" \"<name>\"".to_string(),
            ));
        }
    };

    let mut decl = ResourceDecl::new(resource_type, name);
    let mut repeated = HashSet::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "depends-on" | "depends_on" => {
                    for entry in child.entries() {
                        let target = entry.value().as_string().ok_or_else(|| {
                            invalid(&decl.address, "depends-on expects type.name strings")
                        })?;
                        decl.depends_on.push(target.parse::<ResourceAddress>()?);
                    }
                }
                "deletion-protected" | "deletion_protected" => {
                    decl.flags.deletion_protected = match child.entries().first() {
                        None => true,
                        Some(e) => e.value().as_bool().ok_or_else(|| {
                            invalid(&decl.address, "deletion-protected expects #true or #false")
                        })?,
                    };
                }
                "replace-strategy" | "replace_strategy" => {
                    let strategy = child
                        .entries()
                        .first()
                        .and_then(|e| e.value().as_string())
                        .ok_or_else(|| invalid(&decl.address, "replace-strategy expects a string"))?;
                    decl.flags.replace_strategy = Some(strategy.parse()?);
                }
                attr => {
                    let value = parse_value_node(child, &decl.address)?;
                    insert_attribute(&mut decl.attributes, &mut repeated, attr, value);
                }
            }
        }
    }

    Ok(decl)
}

/// Repeated child nodes of the same name collect into a list
fn insert_attribute(
    map: &mut BTreeMap<String, AttrValue>,
    repeated: &mut HashSet<String>,
    name: &str,
    value: AttrValue,
) {
    match map.remove(name) {
        None => {
            map.insert(name.to_string(), value);
        }
        Some(AttrValue::List(mut items)) if repeated.contains(name) => {
            items.push(value);
            map.insert(name.to_string(), AttrValue::List(items));
        }
        Some(previous) => {
            repeated.insert(name.to_string());
            map.insert(name.to_string(), AttrValue::List(vec![previous, value]));
        }
    }
}

fn parse_value_node(node: &KdlNode, owner: &ResourceAddress) -> Result<AttrValue> {
    let name = node.name().value();
    let positional: Vec<&KdlEntry> = node.entries().iter().filter(|e| e.name().is_none()).collect();
    let properties: Vec<&KdlEntry> = node.entries().iter().filter(|e| e.name().is_some()).collect();

    if let Some(children) = node.children() {
        if !node.entries().is_empty() {
            return Err(invalid(
                owner,
                format!("attribute '{}' mixes arguments with a child block", name),
            ));
        }
        let mut block = BTreeMap::new();
        let mut repeated = HashSet::new();
        for child in children.nodes() {
            let value = parse_value_node(child, owner)?;
            insert_attribute(&mut block, &mut repeated, child.name().value(), value);
        }
        return Ok(AttrValue::Block(block));
    }

    if !properties.is_empty() {
        if !positional.is_empty() {
            return Err(invalid(
                owner,
                format!("attribute '{}' mixes arguments with properties", name),
            ));
        }
        let mut block = BTreeMap::new();
        for entry in properties {
            if let Some(key) = entry.name() {
                block.insert(key.value().to_string(), parse_entry(entry, owner)?);
            }
        }
        return Ok(AttrValue::Block(block));
    }

    match positional.as_slice() {
        [] => Err(invalid(owner, format!("attribute '{}' has no value", name))),
        [single] => parse_entry(single, owner),
        many => Ok(AttrValue::List(
            many.iter()
                .map(|e| parse_entry(e, owner))
                .collect::<Result<Vec<_>>>()?,
        )),
    }
}

fn parse_entry(entry: &KdlEntry, owner: &ResourceAddress) -> Result<AttrValue> {
    let value = entry.value();

    if entry.ty().is_some_and(|t| t.value() == REF_ANNOTATION) {
        let expr = value
            .as_string()
            .ok_or_else(|| invalid(owner, "(ref) annotation expects a string"))?;
        return Ok(AttrValue::Ref(expr.parse::<Reference>()?));
    }

    if let Some(s) = value.as_string() {
        Ok(AttrValue::String(s.to_string()))
    } else if let Some(b) = value.as_bool() {
        Ok(AttrValue::Bool(b))
    } else if let Some(i) = value.as_integer() {
        i64::try_from(i)
            .map(AttrValue::Int)
            .map_err(|_| invalid(owner, format!("integer {} is out of range", i)))
    } else if let Some(f) = value.as_float() {
        Ok(AttrValue::Float(f))
    } else {
        Ok(AttrValue::Null)
    }
}

fn invalid(owner: &ResourceAddress, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidDeclaration(format!("{}: {}", owner, message.into()))
}
