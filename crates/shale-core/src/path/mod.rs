//! Dotted-path locators over JSON trees.
//!
//! A [`DotPath`] is a non-empty sequence of segments addressing a location in
//! a JSON document. Segments are either literal object keys or array indexes.
//! In the rendered form, index segments display as `[N]` and literal keys
//! escape `.` and `[` with a backslash, so `values.[0]` is the first element
//! of the `values` array while `\[extra\.stuff]` is the literal object key
//! `[extra.stuff]`.
//!
//! Paths have a segment-aware total order that places a parent immediately
//! before its first descendant; update resolution relies on this to detect
//! overlapping locators.

mod locate;

pub use locate::PathMatch;

use std::cmp::Ordering;
use std::fmt;

use crate::error::{ApiError, ErrorCode, Result};

/// One step of a [`DotPath`]: a literal object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Literal object key, unescaped.
    Key(String),
    /// Zero-based array index.
    Index(u32),
}

impl Segment {
    /// The key this segment looks up when traversing an object node.
    ///
    /// Index segments address object properties by their decimal form, so
    /// `a.0` finds both `{"a": {"0": 1}}` and `{"a": [1]}`.
    #[must_use]
    pub fn as_object_key(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Self::Key(key) => std::borrow::Cow::Borrowed(key),
            Self::Index(index) => std::borrow::Cow::Owned(index.to_string()),
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Segment {
    /// Plain lexicographic comparison of the literal segment text, index
    /// segments in their decimal form (so `10` sorts before `2`). An index
    /// ties before an equally-spelled key to stay consistent with equality.
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_object_key().cmp(&other.as_object_key()).then_with(|| match (self, other) {
            (Self::Index(_), Self::Key(_)) => Ordering::Less,
            (Self::Key(_), Self::Index(_)) => Ordering::Greater,
            _ => Ordering::Equal,
        })
    }
}

/// A parsed dotted path.
///
/// # Example
///
/// ```
/// use shale_core::path::{DotPath, Segment};
///
/// let path = DotPath::parse("tags.0").unwrap();
/// assert_eq!(path.segments(), &[Segment::Key("tags".into()), Segment::Index(0)]);
/// assert_eq!(path.to_string(), "tags.[0]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DotPath {
    segments: Vec<Segment>,
}

impl DotPath {
    /// Parse a dotted path, rejecting empty segments.
    ///
    /// Both `[N]` and bare `N` are accepted as index segments; the bare form
    /// is what filter and update clauses use.
    ///
    /// # Errors
    ///
    /// `UNSUPPORTED_UPDATE_OPERATION_PATH` when the path is empty or contains
    /// an empty segment.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        // Unescaped segment text plus a flag telling whether any character
        // was escaped (escaped digits never form an index segment).
        let mut current = String::new();
        let mut escaped = false;
        let mut chars = raw.chars();
        loop {
            match chars.next() {
                Some('\\') => match chars.next() {
                    Some(c) => {
                        current.push(c);
                        escaped = true;
                    }
                    None => {
                        current.push('\\');
                    }
                },
                Some('.') => {
                    segments.push(Self::classify(raw, current, escaped)?);
                    current = String::new();
                    escaped = false;
                }
                Some(c) => current.push(c),
                None => {
                    segments.push(Self::classify(raw, current, escaped)?);
                    break;
                }
            }
        }
        Ok(Self { segments })
    }

    /// Build a path from already-classified segments.
    ///
    /// # Panics
    ///
    /// Panics if `segments` is empty; paths are non-empty by construction.
    #[must_use]
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        assert!(!segments.is_empty(), "a DotPath has at least one segment");
        Self { segments }
    }

    /// Single-key path, used for top-level document fields.
    #[must_use]
    pub fn from_key(key: impl Into<String>) -> Self {
        Self { segments: vec![Segment::Key(key.into())] }
    }

    /// The path's segments, ancestors first.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Child path with one more key segment.
    #[must_use]
    pub fn child_key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.into()));
        Self { segments }
    }

    /// Child path with one more index segment.
    #[must_use]
    pub fn child_index(&self, index: u32) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(index));
        Self { segments }
    }

    /// True iff `other` is a proper ancestor of this path.
    #[must_use]
    pub fn is_sub_path_of(&self, other: &Self) -> bool {
        self.segments.len() > other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// True iff the path is the single segment `_id`.
    #[must_use]
    pub fn is_document_id(&self) -> bool {
        matches!(self.segments.as_slice(), [Segment::Key(key)] if key == crate::DOC_ID_FIELD)
    }

    fn classify(raw: &str, text: String, escaped: bool) -> Result<Segment> {
        if text.is_empty() {
            return Err(ApiError::with_detail(
                ErrorCode::UnsupportedUpdateOperationPath,
                format!("empty segment ('') in path '{raw}'"),
            ));
        }
        if !escaped {
            if let Some(index) = parse_index(&text) {
                return Ok(Segment::Index(index));
            }
            // Bracketed form produced by the shredder.
            if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                if let Some(index) = parse_index(inner) {
                    return Ok(Segment::Index(index));
                }
            }
        }
        Ok(Segment::Key(text))
    }
}

/// Index segments are decimal with no leading zeros, like array subscripts.
fn parse_index(text: &str) -> Option<u32> {
    if text.is_empty() || (text.len() > 1 && text.starts_with('0')) {
        return None;
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

impl PartialOrd for DotPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DotPath {
    fn cmp(&self, other: &Self) -> Ordering {
        // Segment-wise, then shorter before longer: parents sort immediately
        // before their first descendant.
        self.segments.cmp(&other.segments)
    }
}

impl fmt::Display for DotPath {
    /// Renders the canonical form: `[N]` for indexes, escaped literals for
    /// keys. This is the form stored in `exist_keys` and friends.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Key(key) => {
                    for c in key.chars() {
                        if matches!(c, '.' | '[' | '\\') {
                            f.write_str("\\")?;
                        }
                        write!(f, "{c}")?;
                    }
                }
            }
        }
        Ok(())
    }
}
