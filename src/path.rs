//! Field paths - addressing into the field tree.
//!
//! A path is an ordered sequence of segments; each segment is either an
//! object key or an array index. The canonical text form joins keys with `.`
//! and renders indices as `[n]`:
//!
//! ```text
//! user.addresses[0].street
//! ```
//!
//! Keys containing `.`, `[`, `]`, or `\` are escaped with a backslash.
//! Numeric dot segments (`items.0`) parse as keys and are coerced to indices
//! when resolved against an array-typed schema node.

use std::fmt;

use crate::error::FormError;

// =============================================================================
// Segment
// =============================================================================

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// An object property name.
    Key(String),
    /// An array slot.
    Index(usize),
}

impl Segment {
    /// The index this segment addresses, coercing numeric keys.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Key(k) => k.parse().ok(),
        }
    }
}

// =============================================================================
// FieldPath
// =============================================================================

/// Absolute address of a field node, relative to the form root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// The empty path addressing the form root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse the dot/bracket text form. The empty string is the root.
    pub fn parse(input: &str) -> Result<Self, FormError> {
        let mut segments = Vec::new();
        let mut key = String::new();
        let mut has_key = false;
        let mut chars = input.chars().peekable();

        let flush = |key: &mut String, has_key: &mut bool, segments: &mut Vec<Segment>| {
            if *has_key {
                segments.push(Segment::Key(std::mem::take(key)));
                *has_key = false;
            }
        };

        while let Some(ch) = chars.next() {
            match ch {
                '\\' => {
                    let Some(escaped) = chars.next() else {
                        return Err(FormError::path(input, "trailing escape character"));
                    };
                    key.push(escaped);
                    has_key = true;
                }
                '.' => {
                    if !has_key && !matches!(segments.last(), Some(Segment::Index(_))) {
                        return Err(FormError::path(input, "empty path segment"));
                    }
                    flush(&mut key, &mut has_key, &mut segments);
                    // a dot after `]` just separates the next segment
                }
                '[' => {
                    flush(&mut key, &mut has_key, &mut segments);
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            Some(other) => {
                                return Err(FormError::path(
                                    input,
                                    format!("unexpected `{other}` inside index brackets"),
                                ));
                            }
                            None => return Err(FormError::path(input, "unterminated index bracket")),
                        }
                    }
                    let index: usize = digits
                        .parse()
                        .map_err(|_| FormError::path(input, "empty index brackets"))?;
                    segments.push(Segment::Index(index));
                }
                ']' => return Err(FormError::path(input, "unmatched `]`")),
                other => {
                    key.push(other);
                    has_key = true;
                }
            }
        }
        if has_key {
            segments.push(Segment::Key(key));
        } else if input.ends_with('.') {
            return Err(FormError::path(input, "trailing separator"));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Extend with an object key.
    pub fn child_key(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.to_owned()));
        Self { segments }
    }

    /// Extend with an array index.
    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(index));
        Self { segments }
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Whether `self` is `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// The remainder of `self` after `prefix`, or `None` when `self` does
    /// not lie beneath `prefix`.
    pub fn strip_prefix(&self, prefix: &Self) -> Option<Self> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(Self {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    for ch in key.chars() {
                        if matches!(ch, '.' | '[' | ']' | '\\') {
                            f.write_str("\\")?;
                        }
                        write!(f, "{ch}")?;
                    }
                }
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
            first = false;
        }
        Ok(())
    }
}
