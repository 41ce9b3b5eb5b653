//! Interned strings for package names and versions.
//!
//! Package names are compared and hashed constantly during resolution and
//! scheduling; interning makes those operations pointer-sized.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{LazyLock, RwLock};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

static INTERNER: LazyLock<RwLock<HashSet<&'static str>>> =
    LazyLock::new(|| RwLock::new(HashSet::new()));

/// A string stored once for the lifetime of the process.
///
/// Equal contents always share the same address, so equality and hashing
/// work on the pointer.
#[derive(Clone, Copy)]
pub struct InternedString {
    inner: &'static str,
}

impl InternedString {
    pub fn new(s: impl AsRef<str>) -> Self {
        let s = s.as_ref();

        if let Some(&interned) = INTERNER
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(s)
        {
            return InternedString { inner: interned };
        }

        let mut interner = INTERNER
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Another thread may have won the race for the write lock.
        if let Some(&interned) = interner.get(s) {
            return InternedString { inner: interned };
        }

        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        interner.insert(leaked);
        InternedString { inner: leaked }
    }

    #[inline]
    pub fn as_str(&self) -> &'static str {
        self.inner
    }
}

impl Deref for InternedString {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        self.inner
    }
}

impl AsRef<str> for InternedString {
    #[inline]
    fn as_ref(&self) -> &str {
        self.inner
    }
}

impl Borrow<str> for InternedString {
    #[inline]
    fn borrow(&self) -> &str {
        self.inner
    }
}

impl PartialEq for InternedString {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.inner, other.inner)
    }
}

impl Eq for InternedString {}

impl PartialEq<str> for InternedString {
    fn eq(&self, other: &str) -> bool {
        self.inner == other
    }
}

impl PartialEq<&str> for InternedString {
    fn eq(&self, other: &&str) -> bool {
        self.inner == *other
    }
}

impl PartialOrd for InternedString {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordering is lexical so that sorted output is stable across runs.
impl Ord for InternedString {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.cmp(other.inner)
    }
}

impl Hash for InternedString {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with `Borrow<str>` so map lookups by &str work.
        self.inner.hash(state)
    }
}

impl fmt::Debug for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.inner, f)
    }
}

impl fmt::Display for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.inner, f)
    }
}

impl From<&str> for InternedString {
    fn from(s: &str) -> Self {
        InternedString::new(s)
    }
}

impl From<String> for InternedString {
    fn from(s: String) -> Self {
        InternedString::new(s)
    }
}

impl From<&String> for InternedString {
    fn from(s: &String) -> Self {
        InternedString::new(s)
    }
}

impl Serialize for InternedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.inner)
    }
}

impl<'de> Deserialize<'de> for InternedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(InternedString::new(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_same_name_shares_storage() {
        let a = InternedString::new("libx11");
        let b = InternedString::new(String::from("libx11"));

        assert_eq!(a, b);
        assert!(std::ptr::eq(a.as_str(), b.as_str()));
        assert_ne!(a, InternedString::new("libxkbfile"));
    }

    #[test]
    fn test_lookup_by_str() {
        let mut installed = HashMap::new();
        installed.insert(InternedString::new("pkgconf"), "2.1.0");

        assert_eq!(installed.get("pkgconf"), Some(&"2.1.0"));
        assert_eq!(installed.get("bison"), None);
    }

    #[test]
    fn test_ordering_is_lexical() {
        let mut names = vec![
            InternedString::new("xorgproto"),
            InternedString::new("autoconf"),
            InternedString::new("libtool"),
        ];
        names.sort();

        let names: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["autoconf", "libtool", "xorgproto"]);
    }
}
