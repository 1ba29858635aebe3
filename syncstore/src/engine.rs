//! Path-addressed get/put/delete against a [`Document`].
//!
//! Traversal rules:
//! ```text
//! put    ["x","y"] = v   missing or non-map "x"  → replaced by {} (lossy)
//! delete ["x","y"]       missing or non-map "x"  → no-op
//! get_at ["x","y"]       missing or non-map "x"  → None
//! ```
//!
//! The functions are pure with respect to I/O; persisting after a
//! mutation is the caller's job (see [`crate::router`]).

use thiserror::Error;

use crate::value::{Document, Value};

/// Path operation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Path must not be empty")]
    EmptyPath,
}

/// Full snapshot of the document.
pub fn get(doc: &Document) -> Document {
    doc.clone()
}

/// Look up the value at `path`. The empty path is not a location.
pub fn get_at<'a>(doc: &'a Document, path: &[String]) -> Option<&'a Value> {
    let (last, parents) = path.split_last()?;
    let mut node = doc;
    for key in parents {
        node = node.get(key)?.as_map()?;
    }
    node.get(last)
}

/// Assign `value` at `path`, creating intermediate containers.
///
/// Any non-map value sitting on an intermediate key is discarded and
/// replaced by an empty map.
pub fn put(doc: &mut Document, path: &[String], value: Value) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::EmptyPath);
    }
    put_in(doc, path, value);
    Ok(())
}

fn put_in(node: &mut Document, path: &[String], value: Value) {
    match path {
        [] => {}
        [last] => {
            node.insert(last.clone(), value);
        }
        [key, rest @ ..] => match node.entry(key.clone()).or_insert_with(Value::map) {
            Value::Map(inner) => put_in(inner, rest, value),
            slot => {
                let mut inner = Document::new();
                put_in(&mut inner, rest, value);
                *slot = Value::Map(inner);
            }
        },
    }
}

/// Remove the key at `path`.
///
/// Returns `Ok(true)` if something was removed, `Ok(false)` when the walk
/// stopped early or the final key was absent.
pub fn delete(doc: &mut Document, path: &[String]) -> Result<bool, PathError> {
    let (last, parents) = path.split_last().ok_or(PathError::EmptyPath)?;
    let mut node = doc;
    for key in parents {
        match node.get_mut(key).and_then(Value::as_map_mut) {
            Some(inner) => node = inner,
            None => return Ok(false),
        }
    }
    Ok(node.remove(last).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::path;

    #[test]
    fn test_put_then_get() {
        let mut doc = Document::new();
        put(&mut doc, &path(&["a", "b", "c"]), Value::Int(7)).unwrap();
        assert_eq!(get_at(&doc, &path(&["a", "b", "c"])), Some(&Value::Int(7)));
    }

    #[test]
    fn test_put_autovivifies() {
        let mut doc = Document::new();
        put(&mut doc, &path(&["x", "y"]), Value::from("v")).unwrap();

        let mut inner = Document::new();
        inner.insert("y".into(), Value::from("v"));
        let mut expected = Document::new();
        expected.insert("x".into(), Value::Map(inner));
        assert_eq!(doc, expected);
    }

    #[test]
    fn test_put_overwrites_scalar_intermediate() {
        let mut doc = Document::new();
        doc.insert("x".into(), Value::from("scalar"));
        put(&mut doc, &path(&["x", "y"]), Value::from("v")).unwrap();

        let x = doc["x"].as_map().expect("x replaced by a map");
        assert_eq!(x.len(), 1);
        assert_eq!(x["y"], Value::from("v"));
    }

    #[test]
    fn test_put_overwrites_list_intermediate() {
        let mut doc = Document::new();
        doc.insert("x".into(), Value::List(vec![Value::Int(1)]));
        put(&mut doc, &path(&["x", "0"]), Value::Int(2)).unwrap();
        assert_eq!(doc["x"].as_map().unwrap()["0"], Value::Int(2));
    }

    #[test]
    fn test_put_replaces_scalars_at_every_depth() {
        let mut doc = Document::new();
        put(&mut doc, &path(&["a"]), Value::Int(1)).unwrap();
        put(&mut doc, &path(&["a", "b"]), Value::Bool(true)).unwrap();
        put(&mut doc, &path(&["a", "b", "c", "d"]), Value::from("deep")).unwrap();

        assert_eq!(
            get_at(&doc, &path(&["a", "b", "c", "d"])),
            Some(&Value::from("deep"))
        );
        assert_eq!(doc["a"].as_map().unwrap().len(), 1);
    }

    #[test]
    fn test_put_keeps_siblings() {
        let mut doc = Document::new();
        put(&mut doc, &path(&["a", "one"]), Value::Int(1)).unwrap();
        put(&mut doc, &path(&["a", "two"]), Value::Int(2)).unwrap();
        assert_eq!(doc["a"].as_map().unwrap().len(), 2);
    }

    #[test]
    fn test_put_empty_path_rejected() {
        let mut doc = Document::new();
        assert_eq!(put(&mut doc, &[], Value::Null), Err(PathError::EmptyPath));
        assert!(doc.is_empty());
    }

    #[test]
    fn test_delete_removes_and_is_idempotent() {
        let mut doc = Document::new();
        put(&mut doc, &path(&["a", "b"]), Value::Int(1)).unwrap();

        assert_eq!(delete(&mut doc, &path(&["a", "b"])), Ok(true));
        assert_eq!(get_at(&doc, &path(&["a", "b"])), None);
        assert_eq!(delete(&mut doc, &path(&["a", "b"])), Ok(false));
        // Parent container survives
        assert!(doc["a"].as_map().unwrap().is_empty());
    }

    #[test]
    fn test_delete_does_not_vivify() {
        let mut doc = Document::new();
        assert_eq!(delete(&mut doc, &path(&["missing", "key"])), Ok(false));
        assert!(doc.is_empty());
    }

    #[test]
    fn test_delete_through_scalar_is_noop() {
        let mut doc = Document::new();
        doc.insert("x".into(), Value::from("scalar"));
        assert_eq!(delete(&mut doc, &path(&["x", "y"])), Ok(false));
        assert_eq!(doc["x"], Value::from("scalar"));
    }

    #[test]
    fn test_delete_empty_path_rejected() {
        let mut doc = Document::new();
        assert_eq!(delete(&mut doc, &[]), Err(PathError::EmptyPath));
    }

    #[test]
    fn test_get_at_through_scalar_is_miss() {
        let mut doc = Document::new();
        doc.insert("x".into(), Value::Int(1));
        assert_eq!(get_at(&doc, &path(&["x", "y"])), None);
        assert_eq!(get_at(&doc, &[]), None);
    }

    #[test]
    fn test_get_returns_detached_snapshot() {
        let mut doc = Document::new();
        put(&mut doc, &path(&["k"]), Value::Int(1)).unwrap();
        let mut snapshot = get(&doc);
        snapshot.insert("other".into(), Value::Null);
        assert!(!doc.contains_key("other"));
    }
}
