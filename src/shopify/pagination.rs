//! Cursor extraction for the admin API's `Link` response header.
//!
//! Each listing response carries adjacent-page URLs in `Link`; the cursor is
//! the `page_info` query parameter of the `rel="next"` URL. Cursors are
//! opaque and replayed as-is.

pub fn next_page_cursor(link_header: Option<&str>) -> Option<String> {
    let header = link_header?;
    for segment in header.split(',') {
        let segment = segment.trim();
        if !segment.contains(r#"rel="next""#) {
            continue;
        }
        let url = match bracketed_url(segment) {
            Some(url) => url,
            None => continue,
        };
        if let Some(cursor) = query_value(url, "page_info") {
            return Some(cursor);
        }
    }
    None
}

fn bracketed_url(segment: &str) -> Option<&str> {
    let start = segment.find('<')? + 1;
    let end = segment.find('>')?;
    if start >= end {
        return None;
    }
    Some(&segment[start..end])
}

// Cursors are base64url; no percent-decoding needed.
fn query_value(url: &str, key: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    let prefix = format!("{key}=");
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix(prefix.as_str()) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
