//! Fixed-length text value (`TEXT(n)`). Right-padded with zero bytes,
//! compared lexicographically on the padded bytes (ties broken by the
//! shorter *declared* size being less, matching the byte codec's
//! offset/size discipline). Two variants mirror the owning/viewing split
//! used throughout the page layer: `Text::Owned` carries an allocation the
//! caller controls the lifetime of, `Text::Borrowed` views bytes inside a
//! pinned page and must not outlive it.

use std::cmp::Ordering;
use std::fmt;

#[derive(Clone)]
pub enum Text<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a [u8]),
}

impl<'a> Text<'a> {
    pub fn empty(size: usize) -> Text<'static> {
        Text::Owned(vec![0u8; size])
    }

    /// Build an owning value from `s`, right-padded (or truncated — callers
    /// validate width before this point; this is the raw codec, not the
    /// validator) to exactly `size` bytes.
    pub fn from_str_padded(s: &str, size: usize) -> Text<'static> {
        let mut bytes = vec![0u8; size];
        let src = s.as_bytes();
        let n = src.len().min(size);
        bytes[..n].copy_from_slice(&src[..n]);
        Text::Owned(bytes)
    }

    pub fn borrowed(bytes: &'a [u8]) -> Self {
        Text::Borrowed(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Text::Owned(v) => v,
            Text::Borrowed(b) => b,
        }
    }

    pub fn size(&self) -> usize {
        self.as_bytes().len()
    }

    /// Text with trailing zero padding stripped, as a lossy UTF-8 string for
    /// display purposes.
    pub fn trimmed_str(&self) -> String {
        let bytes = self.as_bytes();
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    /// Copy this value so it no longer borrows from any buffer.
    pub fn materialize(&self) -> Text<'static> {
        Text::Owned(self.as_bytes().to_vec())
    }
}

impl<'a> PartialEq for Text<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}
impl<'a> Eq for Text<'a> {}

impl<'a> PartialOrd for Text<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for Text<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.as_bytes();
        let b = other.as_bytes();
        match a.cmp(b) {
            Ordering::Equal => a.len().cmp(&b.len()),
            other => other,
        }
    }
}

impl<'a> fmt::Debug for Text<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Text({:?})", self.trimmed_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_and_trims() {
        let t = Text::from_str_padded("hi", 5);
        assert_eq!(t.as_bytes(), b"hi\0\0\0");
        assert_eq!(t.trimmed_str(), "hi");
    }

    #[test]
    fn empty_is_minimum() {
        let empty = Text::empty(4);
        let nonempty = Text::from_str_padded("a", 4);
        assert!(empty < nonempty);
    }

    #[test]
    fn orders_lexicographically() {
        let a = Text::from_str_padded("aaaa", 4);
        let b = Text::from_str_padded("aaab", 4);
        assert!(a < b);
    }
}
