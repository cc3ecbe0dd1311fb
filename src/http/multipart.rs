//! Minimal multipart/form-data parsing.
//!
//! Parses a fully-buffered body against the boundary from the request's
//! `Content-Type`, yielding `(name, body-as-text)` pairs for each part.
//! File metadata beyond the form name is ignored.

use super::error::HttpError;

fn malformed() -> HttpError {
    HttpError::critical(400, "malformed multipart body")
}

/// Extracts the `boundary` parameter from a `multipart/form-data`
/// content-type value.
pub(crate) fn boundary_from_content_type(value: &str) -> Result<String, HttpError> {
    for param in value.split(';').skip(1) {
        let Some((name, raw)) = param.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("boundary") {
            continue;
        }
        let raw = raw.trim();
        let boundary = raw
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .unwrap_or(raw);
        if boundary.is_empty() {
            break;
        }
        return Ok(boundary.to_owned());
    }
    Err(HttpError::critical(400, "missing multipart boundary"))
}

/// Extracts the `name` parameter from a `Content-Disposition: form-data`
/// header value.
fn form_name(disposition: &str) -> Option<String> {
    for param in disposition.split(';').skip(1) {
        let (name, raw) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("name") {
            continue;
        }
        let raw = raw.trim();
        let value = raw
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .unwrap_or(raw);
        return Some(value.to_owned());
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parses the whole multipart message, one `(name, text)` pair per part.
pub(crate) fn parse_parts(
    body: &[u8],
    boundary: &str,
) -> Result<Vec<(String, String)>, HttpError> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();

    let mut pos = find(body, delimiter.as_bytes()).ok_or_else(malformed)? + delimiter.len();
    loop {
        // After a delimiter: either the closing "--" or CRLF into a part.
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        let rest = rest.strip_prefix(b"\r\n").ok_or_else(malformed)?;
        pos = body.len() - rest.len();

        // Part headers end at the empty line.
        let headers_end = find(rest, b"\r\n\r\n").ok_or_else(malformed)?;
        let headers = std::str::from_utf8(&rest[..headers_end]).map_err(|_| malformed())?;
        let mut name = None;
        for line in headers.split("\r\n") {
            let Some((header, value)) = line.split_once(':') else {
                return Err(malformed());
            };
            if header.trim().eq_ignore_ascii_case("content-disposition") {
                name = form_name(value.trim());
            }
        }
        let name = name.ok_or_else(malformed)?;

        // Part data runs to the CRLF preceding the next delimiter.
        let data_start = headers_end + 4;
        let terminator = format!("\r\n{delimiter}");
        let data_len =
            find(&rest[data_start..], terminator.as_bytes()).ok_or_else(malformed)?;
        let data = &rest[data_start..data_start + data_len];
        parts.push((name, String::from_utf8_lossy(data).into_owned()));

        pos += data_start + data_len + terminator.len();
    }
}
