//! IP list loading.
//!
//! One IPv4 address or CIDR per line; blank lines and `#` comments are
//! ignored. Invalid lines, including lines that are not valid UTF-8, are
//! logged and skipped.

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

use crate::validation::validate_ipv4_entry;

/// Result of loading an IP list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedList {
    /// Validated, sorted and deduplicated entries
    pub entries: Vec<Ipv4Net>,
    /// Number of lines rejected by validation
    pub rejected: usize,
    /// Number of valid lines collapsed as duplicates
    pub duplicates: usize,
}

impl LoadedList {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Load an IP list file.
///
/// A missing file is not an error: a warning is logged and an empty list is
/// returned, so the chain can still run with no explicit entries. Any other
/// read failure is fatal, before the filter is touched.
pub fn load(path: &Path) -> Result<LoadedList> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("IP list {:?} not found, continuing with no entries", path);
            return Ok(LoadedList::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read IP list {:?}", path));
        }
    };

    let list = parse_bytes(&content);
    if list.is_empty() {
        warn!("IP list {:?} contains no valid entries", path);
    } else {
        debug!(
            "Loaded {} entries from {:?} ({} rejected, {} duplicates)",
            list.entries.len(),
            path,
            list.rejected,
            list.duplicates
        );
    }
    Ok(list)
}

/// Parse IP list content
pub fn parse(content: &str) -> LoadedList {
    parse_bytes(content.as_bytes())
}

/// Parse raw IP list content.
///
/// Each line is decoded on its own; a line that is not valid UTF-8 is
/// rejected like any other malformed line.
pub fn parse_bytes(content: &[u8]) -> LoadedList {
    let mut entries = Vec::new();
    let mut rejected = 0;

    for (idx, raw) in content.split(|&b| b == b'\n').enumerate() {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!("Line {}: not valid UTF-8 ({}) (skipped)", idx + 1, e);
                rejected += 1;
                continue;
            }
        };

        let candidate = match line.split_once('#') {
            Some((before, _)) => before.trim(),
            None => line.trim(),
        };
        if candidate.is_empty() {
            continue;
        }

        match validate_ipv4_entry(candidate) {
            Ok(net) => entries.push(net),
            Err(e) => {
                warn!("Line {}: {} (skipped)", idx + 1, e);
                rejected += 1;
            }
        }
    }

    let valid = entries.len();
    entries.sort_unstable();
    entries.dedup();

    LoadedList {
        duplicates: valid - entries.len(),
        entries,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn nets(list: &LoadedList) -> Vec<String> {
        list.entries.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_parse_mixed_content() {
        let content = "10.0.0.1\n10.0.0.1\nbad.ip\n# comment\n  10.0.0.2  \n";
        let list = parse(content);
        assert_eq!(nets(&list), vec!["10.0.0.1/32", "10.0.0.2/32"]);
        assert_eq!(list.rejected, 1);
        assert_eq!(list.duplicates, 1);
    }

    #[test]
    fn test_parse_sorts_numerically() {
        let list = parse("10.0.0.10\n10.0.0.9\n9.255.255.255\n");
        assert_eq!(
            nets(&list),
            vec!["9.255.255.255/32", "10.0.0.9/32", "10.0.0.10/32"]
        );
    }

    #[test]
    fn test_parse_collapses_equivalent_spellings() {
        let list = parse("10.0.0.1\n10.0.0.1/32\n192.168.1.7/24\n192.168.1.0/24\n");
        assert_eq!(nets(&list), vec!["10.0.0.1/32", "192.168.1.0/24"]);
        assert_eq!(list.duplicates, 2);
    }

    #[test]
    fn test_parse_inline_comment() {
        let list = parse("10.1.2.3   # office gateway\n");
        assert_eq!(nets(&list), vec!["10.1.2.3/32"]);
    }

    #[test]
    fn test_parse_rejects_malformed_keeps_valid() {
        let content = "1.2.3.4.5\n300.1.1.1\nabc\n10.0.0.0/40\n172.16.0.0/12\n::1\n";
        let list = parse(content);
        assert_eq!(nets(&list), vec!["172.16.0.0/12"]);
        assert_eq!(list.rejected, 5);
    }

    #[test]
    fn test_parse_empty_and_comment_only() {
        assert!(parse("").is_empty());
        assert!(parse("\n   \n# nothing here\n").is_empty());
    }

    #[test]
    fn test_parse_crlf_line_endings() {
        let list = parse("10.0.0.1\r\n10.0.0.2\r\n");
        assert_eq!(list.entries.len(), 2);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let list = load(&temp_dir.path().join("absent.list")).unwrap();
        assert_eq!(list, LoadedList::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ip.list");
        std::fs::write(&path, "# allowed\n10.0.0.2\n10.0.0.1\n").unwrap();

        let list = load(&path).unwrap();
        assert_eq!(nets(&list), vec!["10.0.0.1/32", "10.0.0.2/32"]);
    }

    #[test]
    fn test_load_directory_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = load(temp_dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read IP list"));
    }

    #[test]
    fn test_load_non_utf8_comment_keeps_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ip.list");
        std::fs::write(&path, b"203.0.113.1\n203.0.113.2\n# caf\xE9\n203.0.113.3\n").unwrap();

        let list = load(&path).unwrap();
        assert_eq!(
            nets(&list),
            vec!["203.0.113.1/32", "203.0.113.2/32", "203.0.113.3/32"]
        );
        assert_eq!(list.rejected, 1);
    }

    #[test]
    fn test_parse_bytes_rejects_only_invalid_utf8_line() {
        let list = parse_bytes(b"10.0.0.1\r\n10.0.\xFF.2\r\n10.0.0.3 # ok\r\n");
        assert_eq!(nets(&list), vec!["10.0.0.1/32", "10.0.0.3/32"]);
        assert_eq!(list.rejected, 1);
    }
}
