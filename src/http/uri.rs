//! Request-target parsing and query decoding.

use super::error::HttpError;
use percent_encoding::percent_decode_str;

/// A parsed request target.
///
/// Origin-form targets (`/path?q`) leave scheme and authority empty;
/// absolute-form targets carry their scheme and authority; authority-form
/// (CONNECT) targets carry only the authority; `*` is kept as the path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uri {
    /// URI scheme: `http`, `https`, or empty.
    pub scheme: String,
    /// Authority (host with optional port), possibly empty.
    pub authority: String,
    /// Path component, percent-encoded as received.
    pub path: String,
    /// Raw query string without the leading `?`, possibly empty.
    pub query: String,
}

/// Query parameters: an insertion-ordered multimap with case-sensitive
/// keys, decoded from the query string or an urlencoded form body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTable {
    entries: Vec<(String, String)>,
}

impl QueryTable {
    /// First value for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every pair, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no pairs are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, key: String, value: String) {
        self.entries.push((key, value));
    }
}

/// Percent-decodes a URI component. With `plus_as_space`, `+` decodes to a
/// space (form convention). Fails with 400 on invalid UTF-8.
pub(crate) fn url_decode(s: &str, plus_as_space: bool) -> Result<String, HttpError> {
    let s = if plus_as_space {
        std::borrow::Cow::Owned(s.replace('+', " "))
    } else {
        std::borrow::Cow::Borrowed(s)
    };
    percent_decode_str(&s)
        .decode_utf8()
        .map(|v| v.into_owned())
        .map_err(|_| HttpError::critical(400, "invalid percent-encoding"))
}

/// Splits a query (or urlencoded form body) on `&`, then each pair on the
/// first `=`, decoding both sides. Pairs with empty keys are skipped.
pub(crate) fn parse_query(raw: &str) -> Result<QueryTable, HttpError> {
    let mut table = QueryTable::default();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = url_decode(key, true)?;
        if key.is_empty() {
            continue;
        }
        table.push(key, url_decode(value, true)?);
    }
    Ok(table)
}

/// Parses an HTTP/1.x request-target into a [`Uri`] and its decoded query
/// table.
pub(crate) fn parse_request_target(target: &str) -> Result<(Uri, QueryTable), HttpError> {
    if target.is_empty() {
        return Err(HttpError::critical(400, "empty request target"));
    }
    let mut uri = Uri::default();

    if target == "*" {
        uri.path = "*".into();
        return Ok((uri, QueryTable::default()));
    }

    let rest = if let Some(pos) = target.find("://") {
        uri.scheme = target[..pos].to_ascii_lowercase();
        if uri.scheme != "http" && uri.scheme != "https" {
            return Err(HttpError::critical(400, "unsupported URI scheme"));
        }
        let after = &target[pos + 3..];
        let path_start = after.find(['/', '?']).unwrap_or(after.len());
        uri.authority = after[..path_start].to_owned();
        if uri.authority.is_empty() {
            return Err(HttpError::critical(400, "empty authority"));
        }
        &after[path_start..]
    } else if target.starts_with('/') {
        target
    } else {
        // Authority-form (CONNECT).
        uri.authority = target.to_owned();
        ""
    };

    match rest.split_once('?') {
        Some((path, query)) => {
            uri.path = path.to_owned();
            uri.query = query.to_owned();
        }
        None => uri.path = rest.to_owned(),
    }
    if uri.path.is_empty() && uri.authority.is_empty() {
        return Err(HttpError::critical(400, "empty request path"));
    }
    let query = parse_query(&uri.query)?;
    Ok((uri, query))
}
