//! JSON document paths.
//!
//! Path grammar: `$` or `.` denotes the root; the rest is dot-separated
//! field names with bracketed array indices, e.g. `$.items[0].name` or
//! `.users[-1]`. Negative indices count from the end of an array.
//!
//! Mutation helpers operate on an owned `serde_json::Value`; callers clone
//! the stored root first and swap the edited copy back in, so readers never
//! see a half-applied update.

use serde_json::Value;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    /// Object field access
    Field(String),
    /// Array index access; negative counts from the end
    Index(i64),
}

/// Parse a path string into segments. An empty segment list is the root.
///
/// Returns `None` on malformed bracket syntax.
pub fn parse_path(path: &str) -> Option<Vec<PathSeg>> {
    let mut rest = path.trim();
    rest = rest.strip_prefix('$').unwrap_or(rest);
    rest = rest.strip_prefix('.').unwrap_or(rest);

    let mut segs = Vec::new();
    if rest.is_empty() {
        return Some(segs);
    }

    for part in rest.split('.') {
        if part.is_empty() {
            return None;
        }

        // A part can be `name`, `name[idx]...`, or `[idx]` alone.
        let (name, mut brackets) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };

        if !name.is_empty() {
            segs.push(PathSeg::Field(name.to_string()));
        }

        while !brackets.is_empty() {
            let inner = brackets.strip_prefix('[')?;
            let close = inner.find(']')?;
            let idx: i64 = inner[..close].parse().ok()?;
            segs.push(PathSeg::Index(idx));
            brackets = &inner[close + 1..];
        }
    }

    Some(segs)
}

/// Resolve a path to a reference within `root`.
pub fn resolve<'a>(root: &'a Value, path: &[PathSeg]) -> Option<&'a Value> {
    let mut current = root;
    for seg in path {
        current = match seg {
            PathSeg::Field(name) => current.as_object()?.get(name)?,
            PathSeg::Index(idx) => {
                let arr = current.as_array()?;
                arr.get(normalize_index(*idx, arr.len())?)?
            }
        };
    }
    Some(current)
}

/// Resolve a path to a mutable reference within `root`.
pub fn resolve_mut<'a>(root: &'a mut Value, path: &[PathSeg]) -> Option<&'a mut Value> {
    let mut current = root;
    for seg in path {
        current = match seg {
            PathSeg::Field(name) => current.as_object_mut()?.get_mut(name)?,
            PathSeg::Index(idx) => {
                let len = current.as_array()?.len();
                current.as_array_mut()?.get_mut(normalize_index(*idx, len)?)?
            }
        };
    }
    Some(current)
}

/// Set the value at a path, creating intermediate objects along the way
/// when the missing parent would be an object field. Intermediate arrays
/// are never auto-extended. Returns false when the path cannot be applied.
pub fn set_path(root: &mut Value, path: &[PathSeg], new_value: Value) -> bool {
    if path.is_empty() {
        *root = new_value;
        return true;
    }

    let Some((last, parents)) = path.split_last() else {
        return false;
    };

    let mut current = root;
    for seg in parents {
        current = match seg {
            PathSeg::Field(name) => {
                let Some(obj) = current.as_object_mut() else {
                    return false;
                };
                obj.entry(name.clone())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()))
            }
            PathSeg::Index(idx) => {
                let Some(arr) = current.as_array_mut() else {
                    return false;
                };
                let len = arr.len();
                let Some(i) = normalize_index(*idx, len) else {
                    return false;
                };
                &mut arr[i]
            }
        };
    }

    match last {
        PathSeg::Field(name) => match current.as_object_mut() {
            Some(obj) => {
                obj.insert(name.clone(), new_value);
                true
            }
            None => false,
        },
        PathSeg::Index(idx) => match current.as_array_mut() {
            Some(arr) => {
                let len = arr.len();
                match normalize_index(*idx, len) {
                    Some(i) => {
                        arr[i] = new_value;
                        true
                    }
                    // Appending exactly one past the end is allowed.
                    None if *idx >= 0 && *idx as usize == len => {
                        arr.push(new_value);
                        true
                    }
                    None => false,
                }
            }
            None => false,
        },
    }
}

/// Delete the value at a path. Returns true when something was removed.
pub fn delete_path(root: &mut Value, path: &[PathSeg]) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };
    let Some(parent) = resolve_mut(root, parents) else {
        return false;
    };

    match last {
        PathSeg::Field(name) => parent
            .as_object_mut()
            .is_some_and(|obj| obj.remove(name).is_some()),
        PathSeg::Index(idx) => match parent.as_array_mut() {
            Some(arr) => {
                let len = arr.len();
                match normalize_index(*idx, len) {
                    Some(i) => {
                        arr.remove(i);
                        true
                    }
                    None => false,
                }
            }
            None => false,
        },
    }
}

/// The JSON.TYPE name of a value.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalize a possibly negative index into an array of length `len`.
fn normalize_index(idx: i64, len: usize) -> Option<usize> {
    let i = if idx < 0 { idx + len as i64 } else { idx };
    if i < 0 || i as usize >= len {
        None
    } else {
        Some(i as usize)
    }
}
