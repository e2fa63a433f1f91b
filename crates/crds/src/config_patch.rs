//! Machine config patches
//!
//! JSON patch style operations attached to servers and server classes and
//! applied to the generated machine configuration. Supports `add`,
//! `replace` and `remove` over JSON pointer paths; a patch set is applied
//! atomically.

use crate::error::CrdError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    /// `add`, `replace` or `remove`
    pub op: String,

    /// JSON pointer, e.g. `/machine/install/disk`
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

fn tokens(path: &str) -> Result<Vec<String>, CrdError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(CrdError::InvalidPatch(format!("path {path:?} must start with '/'")));
    };
    Ok(rest.split('/').map(|t| t.replace("~1", "/").replace("~0", "~")).collect())
}

fn pointer(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("/{}", t.replace('~', "~0").replace('/', "~1")))
        .collect()
}

fn parent_of<'a>(doc: &'a mut Value, path: &str, tokens: &[String]) -> Result<&'a mut Value, CrdError> {
    let parent_tokens = &tokens[..tokens.len() - 1];
    doc.pointer_mut(&pointer(parent_tokens))
        .ok_or_else(|| CrdError::InvalidPatch(format!("parent of {path:?} does not exist")))
}

fn array_index(token: &str, len: usize, allow_end: bool) -> Result<usize, CrdError> {
    if allow_end && token == "-" {
        return Ok(len);
    }
    let idx: usize = token
        .parse()
        .map_err(|_| CrdError::InvalidPatch(format!("invalid array index {token:?}")))?;
    let limit = if allow_end { len } else { len.saturating_sub(1) };
    if idx > limit || (!allow_end && len == 0) {
        return Err(CrdError::InvalidPatch(format!("array index {idx} out of bounds")));
    }
    Ok(idx)
}

fn apply_one(doc: &mut Value, patch: &ConfigPatch) -> Result<(), CrdError> {
    let toks = tokens(&patch.path)?;
    let value = || {
        patch
            .value
            .clone()
            .ok_or_else(|| CrdError::InvalidPatch(format!("{} {:?} requires a value", patch.op, patch.path)))
    };

    match patch.op.as_str() {
        "replace" => {
            let new = value()?;
            let target = doc
                .pointer_mut(&patch.path)
                .ok_or_else(|| CrdError::InvalidPatch(format!("path {:?} does not exist", patch.path)))?;
            *target = new;
        }
        "add" => {
            let new = value()?;
            let Some(last) = toks.last() else {
                *doc = new;
                return Ok(());
            };
            match parent_of(doc, &patch.path, &toks)? {
                Value::Object(map) => {
                    map.insert(last.clone(), new);
                }
                Value::Array(items) => {
                    let idx = array_index(last, items.len(), true)?;
                    items.insert(idx, new);
                }
                _ => return Err(CrdError::InvalidPatch(format!("parent of {:?} is not a container", patch.path))),
            }
        }
        "remove" => {
            let Some(last) = toks.last() else {
                return Err(CrdError::InvalidPatch("cannot remove the document root".to_string()));
            };
            match parent_of(doc, &patch.path, &toks)? {
                Value::Object(map) => {
                    if map.remove(last).is_none() {
                        return Err(CrdError::InvalidPatch(format!("path {:?} does not exist", patch.path)));
                    }
                }
                Value::Array(items) => {
                    let idx = array_index(last, items.len(), false)?;
                    items.remove(idx);
                }
                _ => return Err(CrdError::InvalidPatch(format!("parent of {:?} is not a container", patch.path))),
            }
        }
        op => return Err(CrdError::InvalidPatch(format!("unsupported op {op:?}"))),
    }

    Ok(())
}

/// Applies patches in order. On error the document is left untouched.
pub fn apply_config_patches(doc: &mut Value, patches: &[ConfigPatch]) -> Result<(), CrdError> {
    let mut patched = doc.clone();
    for patch in patches {
        apply_one(&mut patched, patch)?;
    }
    *doc = patched;
    Ok(())
}
