//! Dotted path normalization and nested access over a [`Value`] tree.
//!
//! A [`Path`] is the normalized form of a dotted string (`"user.profile.name"`)
//! or of a list of parts (`["items", 0, "title"]`): every part is stringified,
//! split on `.`, and empty segments are dropped. `"a..b."`, `".a.b"` and
//! `"a.b"` all normalize to `["a", "b"]`; `""` and `"..."` normalize to the
//! root path `[]`.
//!
//! [`get_in`], [`set_in`] and [`delete_in`] never mutate their input. Updates
//! return a new tree that shares every untouched branch with the original.
//!
//! # Index segments
//!
//! A segment made only of ASCII digits addresses a list element when the node
//! it is applied to is a list, or when the container has to be created. On an
//! existing map it is an ordinary string key.

use std::fmt;

use im::{OrdMap, Vector};

use crate::value::Value;

/// Keys rejected by the prototype-pollution guard, in paths and payloads alike.
const RESERVED_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Whether `key` is one of the reserved prototype-chain keys.
#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Parse a segment as a list index (`^\d+$`).
pub(crate) fn as_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// A normalized sequence of non-empty path segments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// The empty path, addressing the whole tree.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Normalize a dotted string.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        Self {
            segments: split_segments(input).collect(),
        }
    }

    /// Normalize a list of parts; each part may itself contain dots.
    pub fn from_parts<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: fmt::Display,
    {
        let segments = parts
            .into_iter()
            .flat_map(|part| split_segments(&part.to_string()).collect::<Vec<_>>())
            .collect();
        Self { segments }
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Extend this path by one normalized part.
    #[must_use]
    pub fn child(&self, part: impl fmt::Display) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(split_segments(&part.to_string()));
        Self { segments }
    }

    /// The enclosing path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, init) = self.segments.split_last()?;
        Some(Self {
            segments: init.to_vec(),
        })
    }

    /// True if `self` equals `other` or is one of its ancestors.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// True if a change at one path can change what is read at the other.
    #[must_use]
    pub fn related_to(&self, other: &Path) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    /// The first segment that is a reserved prototype-chain key.
    #[must_use]
    pub fn reserved_segment(&self) -> Option<&str> {
        self.segments
            .iter()
            .map(String::as_str)
            .find(|s| is_reserved_key(s))
    }

    /// Dotted form, e.g. `"user.profile.name"`; empty for the root.
    #[must_use]
    pub fn to_dotted(&self) -> String {
        self.segments.join(".")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_dotted())
    }
}

fn split_segments(input: &str) -> impl Iterator<Item = String> + '_ {
    input
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

// ---------------------------------------------------------------------------
// IntoPath
// ---------------------------------------------------------------------------

/// Anything that can address a location in the state tree.
pub trait IntoPath {
    fn into_path(self) -> Path;
}

impl IntoPath for Path {
    fn into_path(self) -> Path {
        self
    }
}

impl IntoPath for &Path {
    fn into_path(self) -> Path {
        self.clone()
    }
}

impl IntoPath for &str {
    fn into_path(self) -> Path {
        Path::parse(self)
    }
}

impl IntoPath for String {
    fn into_path(self) -> Path {
        Path::parse(&self)
    }
}

impl IntoPath for &String {
    fn into_path(self) -> Path {
        Path::parse(self)
    }
}

impl IntoPath for usize {
    fn into_path(self) -> Path {
        Path::from_parts([self])
    }
}

impl<T: fmt::Display, const N: usize> IntoPath for [T; N] {
    fn into_path(self) -> Path {
        Path::from_parts(self)
    }
}

impl<T: fmt::Display> IntoPath for &[T] {
    fn into_path(self) -> Path {
        Path::from_parts(self)
    }
}

impl<T: fmt::Display> IntoPath for Vec<T> {
    fn into_path(self) -> Path {
        Path::from_parts(self)
    }
}

/// Normalize any path-like input into its segment list.
pub fn resolve_path(input: impl IntoPath) -> Vec<String> {
    input.into_path().segments
}

// ---------------------------------------------------------------------------
// Nested access
// ---------------------------------------------------------------------------

/// Read the value at `path`. Missing keys, out-of-range indices and scalar
/// intermediates all yield `None`.
#[must_use]
pub fn get_in<'a>(tree: &'a Value, path: &Path) -> Option<&'a Value> {
    path.segments
        .iter()
        .try_fold(tree, |node, segment| node.child(segment))
}

/// Return a new tree with `value` installed at `path`.
///
/// Missing intermediate containers are created (a list when the segment that
/// indexes into them is numeric, a map otherwise); scalar intermediates are
/// replaced. Setting an index past the end of a list pads it with `Null`.
/// An empty path replaces the whole tree.
#[must_use]
pub fn set_in(tree: &Value, path: &Path, value: Value) -> Value {
    set_segments(Some(tree), &path.segments, value)
}

fn set_segments(node: Option<&Value>, segments: &[String], value: Value) -> Value {
    let Some((head, rest)) = segments.split_first() else {
        return value;
    };

    match (node, as_index(head)) {
        (Some(Value::Map(map)), _) => {
            let mut map = map.clone();
            let child = set_segments(map.get(head.as_str()), rest, value);
            map.insert(head.clone(), child);
            Value::Map(map)
        }
        (Some(Value::List(items)), Some(index)) => {
            let mut items = items.clone();
            let child = set_segments(items.get(index), rest, value);
            put_index(&mut items, index, child);
            Value::List(items)
        }
        (Some(Value::List(items)), None) => {
            // A named key on a list turns it into a map keyed by index.
            let mut map: OrdMap<String, Value> = items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect();
            map.insert(head.clone(), set_segments(None, rest, value));
            Value::Map(map)
        }
        (_, Some(index)) => {
            let mut items = Vector::new();
            put_index(&mut items, index, set_segments(None, rest, value));
            Value::List(items)
        }
        (_, None) => {
            let mut map = OrdMap::new();
            map.insert(head.clone(), set_segments(None, rest, value));
            Value::Map(map)
        }
    }
}

fn put_index(items: &mut Vector<Value>, index: usize, value: Value) {
    if index < items.len() {
        items.set(index, value);
        return;
    }
    while items.len() < index {
        items.push_back(Value::Null);
    }
    items.push_back(value);
}

/// Return a new tree without the key or list element at `path`.
///
/// A path that does not exist returns an unchanged clone. Deleting the root
/// yields an empty map.
#[must_use]
pub fn delete_in(tree: &Value, path: &Path) -> Value {
    match path.segments.split_last() {
        None => Value::map(),
        Some((last, init)) => delete_segments(tree, init, last).unwrap_or_else(|| tree.clone()),
    }
}

fn delete_segments(node: &Value, init: &[String], last: &str) -> Option<Value> {
    match init.split_first() {
        None => match node {
            Value::Map(map) => {
                let mut map = map.clone();
                map.remove(last)?;
                Some(Value::Map(map))
            }
            Value::List(items) => {
                let index = as_index(last).filter(|i| *i < items.len())?;
                let mut items = items.clone();
                items.remove(index);
                Some(Value::List(items))
            }
            _ => None,
        },
        Some((head, rest)) => {
            let child = delete_segments(node.child(head)?, rest, last)?;
            Some(match node {
                Value::Map(map) => Value::Map(map.update(head.clone(), child)),
                Value::List(items) => {
                    let index = as_index(head)?;
                    Value::List(items.update(index, child))
                }
                _ => return None,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn tree(v: serde_json::Value) -> Value {
        Value::from(v)
    }

    // --- Normalization ---

    #[test]
    fn splits_dotted_string() {
        assert_eq!(resolve_path("a.b.c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_string_is_root() {
        assert!(resolve_path("").is_empty());
        assert!(Path::parse("").is_root());
    }

    #[test]
    fn consecutive_dots_are_ignored() {
        assert_eq!(resolve_path("a..b...c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn leading_and_trailing_dots_are_ignored() {
        assert_eq!(resolve_path(".a.b."), vec!["a", "b"]);
    }

    #[test]
    fn only_dots_is_root() {
        assert!(resolve_path("....").is_empty());
    }

    #[test]
    fn parts_are_stringified_and_split() {
        assert_eq!(resolve_path(["items", "0.title"]), vec!["items", "0", "title"]);
        assert_eq!(resolve_path(vec![1, 2]), vec!["1", "2"]);
        assert_eq!(resolve_path(3usize), vec!["3"]);
        let parts: &[&str] = &["", "a", ".."];
        assert_eq!(resolve_path(parts), vec!["a"]);
    }

    #[test]
    fn index_detection() {
        assert_eq!(as_index("0"), Some(0));
        assert_eq!(as_index("42"), Some(42));
        assert_eq!(as_index("-1"), None);
        assert_eq!(as_index("1a"), None);
        assert_eq!(as_index(""), None);
    }

    #[test]
    fn relation_and_parent() {
        let user = Path::parse("user");
        let name = Path::parse("user.name");
        let other = Path::parse("username");
        assert!(user.is_prefix_of(&name));
        assert!(!name.is_prefix_of(&user));
        assert!(name.related_to(&user));
        assert!(!other.related_to(&user));
        assert!(Path::root().related_to(&name));
        assert_eq!(name.parent(), Some(user.clone()));
        assert_eq!(Path::root().parent(), None);
        assert_eq!(user.child("a.b").to_dotted(), "user.a.b");
    }

    #[test]
    fn reserved_segments() {
        assert_eq!(Path::parse("a.__proto__.b").reserved_segment(), Some("__proto__"));
        assert_eq!(Path::parse("a.proto").reserved_segment(), None);
    }

    // --- get ---

    #[test]
    fn get_nested_value() {
        let t = tree(json!({"a": {"b": {"c": 1}}}));
        assert_eq!(get_in(&t, &Path::parse("a.b.c")), Some(&Value::from(1)));
    }

    #[test]
    fn get_missing_path_is_none() {
        let t = tree(json!({"a": {"b": 1}}));
        assert_eq!(get_in(&t, &Path::parse("a.x.y")), None);
        assert_eq!(get_in(&t, &Path::parse("a.b.c")), None);
    }

    #[test]
    fn get_root_returns_tree() {
        let t = tree(json!({"a": 1}));
        assert_eq!(get_in(&t, &Path::root()), Some(&t));
    }

    #[test]
    fn get_through_list() {
        let t = tree(json!({"items": [{"id": 7}]}));
        assert_eq!(get_in(&t, &Path::parse("items.0.id")), Some(&Value::from(7)));
    }

    // --- set ---

    #[test]
    fn set_nested_value() {
        let t = tree(json!({"a": {"b": 1}}));
        let next = set_in(&t, &Path::parse("a.c"), Value::from(2));
        assert_eq!(next, tree(json!({"a": {"b": 1, "c": 2}})));
    }

    #[test]
    fn set_creates_missing_containers() {
        let t = Value::map();
        let next = set_in(&t, &Path::parse("a.b.c"), Value::from("x"));
        assert_eq!(next, tree(json!({"a": {"b": {"c": "x"}}})));
    }

    #[test]
    fn set_creates_lists_for_numeric_segments() {
        let t = Value::map();
        let next = set_in(&t, &Path::parse("items.1.name"), Value::from("b"));
        assert_eq!(next, tree(json!({"items": [null, {"name": "b"}]})));
    }

    #[test]
    fn set_into_existing_list() {
        let t = tree(json!({"items": [1, 2, 3]}));
        let next = set_in(&t, &Path::parse("items.1"), Value::from(20));
        assert_eq!(next, tree(json!({"items": [1, 20, 3]})));
    }

    #[test]
    fn numeric_key_on_existing_map_stays_a_key() {
        let t = tree(json!({"byId": {"a": 1}}));
        let next = set_in(&t, &Path::parse("byId.42"), Value::from(2));
        assert_eq!(next, tree(json!({"byId": {"a": 1, "42": 2}})));
    }

    #[test]
    fn named_key_on_list_converts_to_map() {
        let t = tree(json!({"items": ["x"]}));
        let next = set_in(&t, &Path::parse("items.extra"), Value::from(true));
        assert_eq!(next, tree(json!({"items": {"0": "x", "extra": true}})));
    }

    #[test]
    fn set_replaces_scalar_intermediate() {
        let t = tree(json!({"a": 5}));
        let next = set_in(&t, &Path::parse("a.b"), Value::from(1));
        assert_eq!(next, tree(json!({"a": {"b": 1}})));
    }

    #[test]
    fn set_root_replaces_tree() {
        let t = tree(json!({"a": 1}));
        let next = set_in(&t, &Path::root(), Value::from(9));
        assert_eq!(next, Value::from(9));
    }

    #[test]
    fn set_leaves_original_untouched() {
        let t = tree(json!({"a": {"b": 1}, "z": [1, 2]}));
        let before = t.clone();
        let _ = set_in(&t, &Path::parse("a.b"), Value::from(2));
        assert_eq!(t, before);
    }

    #[test]
    fn set_shares_untouched_branches() {
        let t = tree(json!({"a": {"b": 1}, "z": {"big": [1, 2, 3]}}));
        let next = set_in(&t, &Path::parse("a.b"), Value::from(2));
        match (t.child("z"), next.child("z")) {
            (Some(Value::Map(before)), Some(Value::Map(after))) => assert!(before.ptr_eq(after)),
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    // --- delete ---

    #[test]
    fn delete_key_and_index() {
        let t = tree(json!({"a": {"b": 1, "c": 2}, "l": [1, 2, 3]}));
        let next = delete_in(&t, &Path::parse("a.b"));
        assert_eq!(next, tree(json!({"a": {"c": 2}, "l": [1, 2, 3]})));
        let next = delete_in(&next, &Path::parse("l.0"));
        assert_eq!(next, tree(json!({"a": {"c": 2}, "l": [2, 3]})));
    }

    #[test]
    fn delete_missing_is_unchanged() {
        let t = tree(json!({"a": {"b": 1}}));
        assert_eq!(delete_in(&t, &Path::parse("a.x")), t);
        assert_eq!(delete_in(&t, &Path::parse("q.r.s")), t);
        assert_eq!(delete_in(&t, &Path::root()), Value::map());
    }

    // --- Properties ---

    fn segment() -> impl Strategy<Value = String> {
        prop_oneof!["[a-z]{1,6}", "[0-9]{1,2}"]
    }

    proptest! {
        #[test]
        fn round_trip(segments in prop::collection::vec(segment(), 1..6), n in any::<i64>()) {
            let path = Path::from_parts(&segments);
            let t = tree(json!({"seed": {"x": 1}}));
            let next = set_in(&t, &path, Value::from(n));
            prop_assert_eq!(get_in(&next, &path), Some(&Value::from(n)));
        }

        #[test]
        fn original_is_never_mutated(segments in prop::collection::vec(segment(), 1..6)) {
            let t = tree(json!({"a": {"b": [1, 2, {"c": 3}]}, "0": "zero"}));
            let snapshot = t.to_json();
            let _ = set_in(&t, &Path::from_parts(&segments), Value::from("new"));
            prop_assert_eq!(t.to_json(), snapshot);
        }

        #[test]
        fn normalization_is_idempotent(input in "[a-z.]{0,20}") {
            let once = Path::parse(&input);
            let twice = Path::parse(&once.to_dotted());
            prop_assert_eq!(once, twice);
        }
    }
}
