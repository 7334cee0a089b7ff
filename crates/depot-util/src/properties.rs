//! Line-oriented `key=value` codec for repository sidecar files.
//!
//! Both the origin-tracking file (`_remote.repositories`) and the
//! `.lastUpdated` timestamp file use this format: UTF-8, one entry per line,
//! `#` comment lines, keys sorted on write so files diff cleanly.

use std::collections::BTreeMap;
use std::path::Path;

/// Parse properties from raw bytes.
///
/// Unparseable lines are skipped; a line without `=` becomes a key with an
/// empty value.
pub fn parse(data: &[u8]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let content = String::from_utf8_lossy(data);
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match split_unescaped(trimmed) {
            Some((key, value)) => {
                map.insert(unescape(key), value.trim().to_string());
            }
            None => {
                map.insert(unescape(trimmed), String::new());
            }
        }
    }
    map
}

/// Render properties to bytes, with an optional `#`-prefixed header comment.
pub fn render(map: &BTreeMap<String, String>, header: Option<&str>) -> Vec<u8> {
    let mut out = String::new();
    if let Some(header) = header {
        for line in header.lines() {
            out.push('#');
            out.push_str(line);
            out.push('\n');
        }
    }
    for (key, value) in map {
        out.push_str(&escape(key));
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out.into_bytes()
}

/// Load a properties file, returning an empty map when the file is absent.
pub fn load(path: &Path) -> std::io::Result<BTreeMap<String, String>> {
    match std::fs::read(path) {
        Ok(data) => Ok(parse(&data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e),
    }
}

/// Split on the first `=` that is not preceded by a backslash.
fn split_unescaped(line: &str) -> Option<(&str, &str)> {
    let bytes = line.as_bytes();
    let mut prev_backslash = false;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'=' && !prev_backslash {
            return Some((&line[..i], &line[i + 1..]));
        }
        prev_backslash = b == b'\\' && !prev_backslash;
    }
    None
}

fn escape(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for ch in key.chars() {
        match ch {
            '\\' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut map = BTreeMap::new();
        map.insert("a-1.0.jar>central".to_string(), String::new());
        map.insert("a-1.0.jar>".to_string(), String::new());
        let bytes = render(&map, None);
        assert_eq!(parse(&bytes), map);
    }

    #[test]
    fn header_is_skipped_on_parse() {
        let mut map = BTreeMap::new();
        map.insert("key".to_string(), "value".to_string());
        let bytes = render(&map, Some("NOTE: internal format"));
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("#NOTE"));
        assert_eq!(parse(&bytes), map);
    }

    #[test]
    fn keys_with_equals_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("odd=name.jar>repo".to_string(), String::new());
        let bytes = render(&map, None);
        assert_eq!(parse(&bytes), map);
    }

    #[test]
    fn blank_and_comment_lines_ignored() {
        let map = parse(b"\n# comment\n  \nkey=v\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("key").map(String::as_str), Some("v"));
    }

    #[test]
    fn load_missing_file_is_empty() {
        let map = load(Path::new("/nonexistent/depot.properties")).unwrap();
        assert!(map.is_empty());
    }
}
