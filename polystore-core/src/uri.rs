//! `ObjectUri` - Record Addressing
//!
//! TigerStyle: Addresses are validated at construction, never at use.
//!
//! # Literal Form
//!
//! ```text
//! [backend:]collection/uid[/collection/uid...]
//! ```
//!
//! The last `(collection, uid)` pair names the record itself. Every pair
//! before it names a parent record, so `users/u1/posts/p9` is post `p9`
//! stored under user `u1`.

use std::fmt;
use std::str::FromStr;

use crate::constants::{
    BACKEND_SEPARATOR, MISSING_COLLECTION, PATH_DEPTH_COUNT_MAX, PATH_SEPARATOR,
};
use crate::error::{CoreError, CoreResult};

// =============================================================================
// ObjectUri
// =============================================================================

/// Address of a record, optionally qualified by a backend alias and nested
/// under parent records.
///
/// An `ObjectUri` is either empty (not yet persisted) or set. Once set, its
/// path cannot be reassigned; only the display label may change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ObjectUri {
    backend: Option<String>,
    collection: Option<String>,
    uid: Option<String>,
    label: Option<String>,
    parent: Option<Box<ObjectUri>>,
}

impl ObjectUri {
    /// Create an empty address.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse an address literal.
    ///
    /// # Errors
    /// Returns `MalformedPath` for empty paths, empty segments, odd segment
    /// counts on non-file paths, or paths deeper than the supported depth.
    ///
    /// # Example
    /// ```
    /// use polystore_core::ObjectUri;
    ///
    /// let uri = ObjectUri::parse("pg:users/u1/posts/p9").unwrap();
    /// assert_eq!(uri.backend(), Some("pg"));
    /// assert_eq!(uri.collection(), Some("posts"));
    /// assert_eq!(uri.uid(), Some("p9"));
    /// assert_eq!(uri.parent().and_then(ObjectUri::uid), Some("u1"));
    /// ```
    pub fn parse(literal: &str) -> CoreResult<Self> {
        let (backend, path) = split_backend(literal)?;
        let mut uri = parse_path(path)?;
        uri.backend = backend;
        Ok(uri)
    }

    /// Build an address from a collection and uid.
    ///
    /// # Errors
    /// Returns `MalformedPath` if either part is empty or contains a separator.
    pub fn build(collection: &str, uid: &str) -> CoreResult<Self> {
        validate_segment(collection, collection)?;
        validate_segment(uid, uid)?;

        Ok(Self {
            backend: None,
            collection: Some(collection.to_string()),
            uid: Some(uid.to_string()),
            label: None,
            parent: None,
        })
    }

    /// Nest this address under a parent record.
    #[must_use]
    pub fn with_parent(mut self, parent: ObjectUri) -> Self {
        debug_assert!(parent.is_set(), "parent address must be set");
        self.parent = Some(Box::new(parent));
        self
    }

    /// Qualify this address with a backend alias.
    #[must_use]
    pub fn with_backend(mut self, alias: impl Into<String>) -> Self {
        self.backend = Some(alias.into());
        self
    }

    /// Attach a display label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Resolve a missing collection supplied by the caller.
    ///
    /// # Errors
    /// Returns `MalformedPath` if the collection is empty or contains a
    /// separator.
    pub fn with_collection(mut self, collection: &str) -> CoreResult<Self> {
        validate_segment(collection, collection)?;
        if self.has_missing_collection() {
            self.collection = Some(collection.to_string());
        }
        Ok(self)
    }

    /// Assign the path of an empty address.
    ///
    /// # Errors
    /// Returns `PathAlreadySet` on a second assignment and `MalformedPath`
    /// if the literal is invalid.
    pub fn set_path(&mut self, literal: &str) -> CoreResult<()> {
        if self.is_set() {
            return Err(CoreError::path_already_set(self.path()));
        }

        let parsed = Self::parse(literal)?;
        self.collection = parsed.collection;
        self.uid = parsed.uid;
        self.parent = parsed.parent;
        if parsed.backend.is_some() {
            self.backend = parsed.backend;
        }
        Ok(())
    }

    /// Whether a path has been assigned.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.uid.is_some()
    }

    /// Backend alias, if qualified.
    #[must_use]
    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    /// Backend alias, falling back to the given default.
    #[must_use]
    pub fn backend_alias_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.backend.as_deref().unwrap_or(default)
    }

    /// Collection of the record itself.
    #[must_use]
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// Unique identifier of the record within its collection.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    /// Display label. Not authoritative.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Replace the display label.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    /// Owning record for nested storage.
    #[must_use]
    pub fn parent(&self) -> Option<&ObjectUri> {
        self.parent.as_deref()
    }

    /// Whether the collection still has to be supplied externally.
    #[must_use]
    pub fn has_missing_collection(&self) -> bool {
        self.collection.as_deref() == Some(MISSING_COLLECTION)
    }

    /// Number of (collection, uid) pairs including parents.
    #[must_use]
    pub fn depth(&self) -> usize {
        if !self.is_set() {
            return 0;
        }
        1 + self.parent.as_ref().map_or(0, |p| p.depth())
    }

    /// `collection/uid` of the record itself, without parents.
    #[must_use]
    pub fn own_path(&self) -> String {
        match (&self.collection, &self.uid) {
            (Some(collection), Some(uid)) => format!("{collection}{PATH_SEPARATOR}{uid}"),
            (None, Some(uid)) => uid.clone(),
            _ => String::new(),
        }
    }

    /// Full path including every parent.
    #[must_use]
    pub fn path(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}{PATH_SEPARATOR}{}", parent.path(), self.own_path()),
            None => self.own_path(),
        }
    }

    /// Literal form, backend-qualified when an alias is set.
    #[must_use]
    pub fn literal(&self) -> String {
        match &self.backend {
            Some(alias) => format!("{alias}{BACKEND_SEPARATOR}{}", self.path()),
            None => self.path(),
        }
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal())
    }
}

impl FromStr for ObjectUri {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Split an optional `alias:` prefix. The colon must precede the first slash.
fn split_backend(literal: &str) -> CoreResult<(Option<String>, &str)> {
    let colon = literal.find(BACKEND_SEPARATOR);
    let slash = literal.find(PATH_SEPARATOR);

    match (colon, slash) {
        (Some(c), Some(s)) if c < s => split_at_colon(literal, c),
        (Some(c), None) => split_at_colon(literal, c),
        _ => Ok((None, literal)),
    }
}

fn split_at_colon(literal: &str, colon: usize) -> CoreResult<(Option<String>, &str)> {
    let alias = &literal[..colon];
    if alias.is_empty() {
        return Err(CoreError::malformed_path(literal, "empty backend alias"));
    }
    Ok((Some(alias.to_string()), &literal[colon + 1..]))
}

fn parse_path(path: &str) -> CoreResult<ObjectUri> {
    let trimmed = path.trim_matches(PATH_SEPARATOR);
    if trimmed.is_empty() {
        return Err(CoreError::malformed_path(path, "empty path"));
    }

    let segments: Vec<&str> = trimmed.split(PATH_SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::malformed_path(path, "empty segment"));
    }

    match segments.len() {
        1 => Ok(ObjectUri {
            collection: Some(MISSING_COLLECTION.to_string()),
            uid: Some(segments[0].to_string()),
            ..ObjectUri::default()
        }),
        n if n % 2 == 0 => {
            if n / 2 > PATH_DEPTH_COUNT_MAX {
                return Err(CoreError::malformed_path(path, "path too deep"));
            }
            Ok(from_pairs(&segments))
        }
        n if is_file_name(segments[n - 1]) => Ok(ObjectUri {
            collection: Some(segments[..n - 1].join("/")),
            uid: Some(segments[n - 1].to_string()),
            ..ObjectUri::default()
        }),
        _ => Err(CoreError::malformed_path(
            path,
            "odd number of segments, expected collection/uid pairs",
        )),
    }
}

/// Build the address chain from an even list of segments.
fn from_pairs(segments: &[&str]) -> ObjectUri {
    debug_assert!(segments.len() % 2 == 0 && !segments.is_empty());

    let mut current: Option<ObjectUri> = None;
    for pair in segments.chunks(2) {
        current = Some(ObjectUri {
            backend: None,
            collection: Some(pair[0].to_string()),
            uid: Some(pair[1].to_string()),
            label: None,
            parent: current.map(Box::new),
        });
    }

    // Postcondition: non-empty input always yields an address
    current.unwrap_or_default()
}

fn is_file_name(segment: &str) -> bool {
    match segment.rfind('.') {
        Some(dot) => dot > 0 && dot + 1 < segment.len(),
        None => false,
    }
}

fn validate_segment(segment: &str, context: &str) -> CoreResult<()> {
    if segment.is_empty() {
        return Err(CoreError::malformed_path(context, "empty segment"));
    }
    if segment.contains(PATH_SEPARATOR) {
        return Err(CoreError::malformed_path(context, "segment contains '/'"));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DST_PROPERTY_SEEDS_COUNT;
    use crate::dst::DeterministicRng;

    #[test]
    fn test_parse_simple() {
        let uri = ObjectUri::parse("users/abc").unwrap();
        assert_eq!(uri.collection(), Some("users"));
        assert_eq!(uri.uid(), Some("abc"));
        assert_eq!(uri.backend(), None);
        assert_eq!(uri.path(), "users/abc");
        assert!(uri.parent().is_none());
    }

    #[test]
    fn test_parse_backend_qualified() {
        let uri = ObjectUri::parse("docs:users/abc").unwrap();
        assert_eq!(uri.backend(), Some("docs"));
        assert_eq!(uri.literal(), "docs:users/abc");
        assert_eq!(uri.backend_alias_or("@default"), "docs");

        let plain = ObjectUri::parse("users/abc").unwrap();
        assert_eq!(plain.backend_alias_or("@default"), "@default");
    }

    #[test]
    fn test_parse_nested() {
        let uri = ObjectUri::parse("users/u1/posts/p9/comments/c3").unwrap();
        assert_eq!(uri.depth(), 3);
        assert_eq!(uri.own_path(), "comments/c3");
        assert_eq!(uri.path(), "users/u1/posts/p9/comments/c3");

        let parent = uri.parent().unwrap();
        assert_eq!(parent.path(), "users/u1/posts/p9");
        assert_eq!(parent.parent().unwrap().path(), "users/u1");
    }

    #[test]
    fn test_lone_segment_has_missing_collection() {
        let uri = ObjectUri::parse("abc").unwrap();
        assert!(uri.has_missing_collection());

        let resolved = uri.with_collection("users").unwrap();
        assert!(!resolved.has_missing_collection());
        assert_eq!(resolved.path(), "users/abc");
    }

    #[test]
    fn test_odd_segments_rejected() {
        let err = ObjectUri::parse("users/abc/posts").unwrap_err();
        assert!(matches!(err, CoreError::MalformedPath { .. }));
    }

    #[test]
    fn test_file_path_accepted() {
        let uri = ObjectUri::parse("assets/images/logo.png").unwrap();
        assert_eq!(uri.collection(), Some("assets/images"));
        assert_eq!(uri.uid(), Some("logo.png"));
        assert_eq!(uri.path(), "assets/images/logo.png");
    }

    #[test]
    fn test_empty_segments_rejected() {
        assert!(ObjectUri::parse("").is_err());
        assert!(ObjectUri::parse("users//abc").is_err());
        assert!(ObjectUri::parse(":users/abc").is_err());
    }

    #[test]
    fn test_set_path_only_once() {
        let mut uri = ObjectUri::empty();
        assert!(!uri.is_set());
        uri.set_path("users/abc").unwrap();
        assert!(uri.is_set());

        let err = uri.set_path("users/def").unwrap_err();
        assert!(matches!(err, CoreError::PathAlreadySet { ref path } if path == "users/abc"));
    }

    #[test]
    fn test_set_path_keeps_backend() {
        let mut uri = ObjectUri::empty().with_backend("pg");
        uri.set_path("users/abc").unwrap();
        assert_eq!(uri.literal(), "pg:users/abc");
    }

    #[test]
    fn test_build_with_parent() {
        let parent = ObjectUri::build("users", "u1").unwrap();
        let uri = ObjectUri::build("posts", "p1").unwrap().with_parent(parent);
        assert_eq!(uri.path(), "users/u1/posts/p1");
        assert_eq!(uri.to_string(), "users/u1/posts/p1");
        assert!(ObjectUri::build("a/b", "x").is_err());
    }

    #[test]
    fn test_label_does_not_affect_path() {
        let uri = ObjectUri::build("users", "u1").unwrap().with_label("Jane Doe");
        assert_eq!(uri.label(), Some("Jane Doe"));
        assert_eq!(uri.path(), "users/u1");
    }

    /// Any even-segment path reconstructs a (collection, uid) suffix; any odd
    /// non-file path fails.
    #[test]
    fn test_property_address_invariant() {
        for seed in 0..DST_PROPERTY_SEEDS_COUNT as u64 {
            let mut rng = DeterministicRng::new(seed);
            let pairs = rng.next_usize(1, 5);
            let segments: Vec<String> = (0..pairs * 2)
                .map(|i| format!("s{}x{}", i, rng.next_u64() % 1000))
                .collect();
            let path = segments.join("/");

            let uri = ObjectUri::parse(&path).unwrap();
            let suffix = format!("{}/{}", uri.collection().unwrap(), uri.uid().unwrap());
            assert!(path.ends_with(&suffix), "seed {seed}: {path} !~ {suffix}");
            assert_eq!(uri.path(), path, "seed {seed}");
            assert_eq!(uri.depth(), pairs, "seed {seed}");

            let odd = segments[..segments.len() - 1].join("/");
            if segments.len() - 1 > 1 {
                assert!(ObjectUri::parse(&odd).is_err(), "seed {seed}: {odd}");
            }
        }
    }
}
