//! Dot-path codec for patch keys.
//!
//! Patches are keyed by dot-separated path strings on the wire
//! (`"weather.entity"`). Internally, diff and patch logic works on
//! [`KeyPath`] segment lists; the string form is only produced and parsed at
//! the patch boundary. Dots and backslashes inside a segment are escaped
//! (`\.` and `\\`), so map keys that themselves contain dots stay
//! unambiguous.

use std::fmt;

/// Ordered list of string segments addressing a value inside a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// The empty path (addresses the snapshot root; never stored in a
    /// patch).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments<S: Into<String>, I: IntoIterator<Item = S>>(segments: I) -> Self {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse an encoded dot-path. A backslash escapes the next character;
    /// an unescaped dot separates segments. The empty string is the empty
    /// path.
    pub fn parse(encoded: &str) -> Self {
        if encoded.is_empty() {
            return Self::new();
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = encoded.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => current.push('\\'),
                },
                '.' => {
                    segments.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            }
        }
        segments.push(current);

        Self { segments }
    }

    /// Encode to the wire form, escaping dots and backslashes inside
    /// segments.
    pub fn encode(&self) -> String {
        let mut encoded = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                encoded.push('.');
            }
            for ch in segment.chars() {
                if ch == '\\' || ch == '.' {
                    encoded.push('\\');
                }
                encoded.push(ch);
            }
        }
        encoded
    }

    /// A new path with `segment` appended.
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(segment.to_string());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
