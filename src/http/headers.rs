//! Header table: an insertion-ordered, case-insensitive multimap.

use std::fmt;

/// Header name/value multimap.
///
/// Insertion order is preserved; name comparisons are case-insensitive.
/// Names are stored as inserted and canonicalized to
/// Title-Case-Hyphenated form only when written to the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderTable {
    entries: Vec<(String, String)>,
}

impl HeaderTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, keeping existing entries with the same name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every entry named `name` with a single one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Removes every entry named `name`.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// First value for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Number of entries named `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.get_all(name).count()
    }

    /// True if at least one entry is named `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Every entry, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Total entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for HeaderTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{}: {value}", canonical_name(name))?;
        }
        Ok(())
    }
}

/// Normalizes a header name to Title-Case-Hyphenated wire form:
/// `content-length` becomes `Content-Length`.
#[must_use]
pub fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_start = true;
    for c in name.chars() {
        if at_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        at_start = c == '-';
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut table = HeaderTable::new();
        table.add("Content-Type", "text/html");
        assert_eq!(table.get("content-type"), Some("text/html"));
        assert_eq!(table.get("CONTENT-TYPE"), Some("text/html"));
        assert!(table.contains("Content-type"));
        assert_eq!(table.get("content-length"), None);
    }

    #[test]
    fn multimap_preserves_insertion_order() {
        let mut table = HeaderTable::new();
        table.add("Set-Cookie", "a=1");
        table.add("X-Other", "y");
        table.add("set-cookie", "b=2");
        let cookies: Vec<_> = table.get_all("Set-Cookie").collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(table.count("set-COOKIE"), 2);
        assert_eq!(table.get("Set-Cookie"), Some("a=1"));
    }

    #[test]
    fn set_replaces_all_entries() {
        let mut table = HeaderTable::new();
        table.add("X-N", "1");
        table.add("x-n", "2");
        table.set("X-N", "3");
        assert_eq!(table.count("x-n"), 1);
        assert_eq!(table.get("X-N"), Some("3"));
    }

    #[test]
    fn canonicalization() {
        assert_eq!(canonical_name("content-length"), "Content-Length");
        assert_eq!(canonical_name("TRANSFER-ENCODING"), "Transfer-Encoding");
        assert_eq!(canonical_name("x-b3-traceid"), "X-B3-Traceid");
        assert_eq!(canonical_name("etag"), "Etag");
    }
}
