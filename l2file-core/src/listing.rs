//! Directory listing text: `"{size}:{name}\n"` per entry, block terminated by an extra `"\n"`.

use serde::{Deserialize, Serialize};

/// Two consecutive newlines end a listing stream.
pub const SENTINEL: &[u8] = b"\n\n";

/// One listing line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub size: u64,
    pub name: String,
}

impl ListingEntry {
    pub fn new(size: u64, name: impl Into<String>) -> Self {
        Self {
            size,
            name: name.into(),
        }
    }

    /// Whether the name survives the text format unchanged (no `:` and no newline).
    pub fn is_encodable(&self) -> bool {
        !self.name.contains(':') && !self.name.contains('\n')
    }
}

/// Encode entries into a sentinel-terminated block.
pub fn encode_listing(entries: &[ListingEntry]) -> Vec<u8> {
    let mut out = String::new();
    for e in entries {
        out.push_str(&e.size.to_string());
        out.push(':');
        out.push_str(&e.name);
        out.push('\n');
    }
    out.push('\n');
    out.into_bytes()
}

/// Whether an accumulated buffer holds a complete listing block.
///
/// An empty listing encodes as a lone `"\n"`, which is accepted as complete too.
pub fn is_terminated(data: &[u8]) -> bool {
    data.ends_with(SENTINEL) || data == b"\n"
}

/// Decode a listing block.
///
/// Lenient: any line that does not split into exactly two `:`-separated fields, or whose
/// size is not a decimal integer, is dropped. The blank lines produced by the sentinel fall
/// out under the same rule.
pub fn decode_listing(data: &[u8]) -> Vec<ListingEntry> {
    let text = String::from_utf8_lossy(data);
    text.split('\n').filter_map(decode_line).collect()
}

fn decode_line(line: &str) -> Option<ListingEntry> {
    let mut fields = line.split(':');
    let (size, name) = (fields.next()?, fields.next()?);
    if fields.next().is_some() {
        return None;
    }
    let size = size.parse::<u64>().ok()?;
    Some(ListingEntry::new(size, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_two_entries() {
        let entries = vec![
            ListingEntry::new(10, "a.txt"),
            ListingEntry::new(2048, "b.bin"),
        ];
        let text = encode_listing(&entries);
        assert_eq!(text, b"10:a.txt\n2048:b.bin\n\n".to_vec());
        assert!(is_terminated(&text));
        assert_eq!(decode_listing(&text), entries);
    }

    #[test]
    fn empty_listing() {
        let text = encode_listing(&[]);
        assert_eq!(text, b"\n".to_vec());
        assert!(is_terminated(&text));
        assert!(decode_listing(&text).is_empty());
    }

    #[test]
    fn single_entry() {
        let entries = vec![ListingEntry::new(0, "empty")];
        assert_eq!(decode_listing(&encode_listing(&entries)), entries);
    }

    #[test]
    fn unusual_names() {
        let entries = vec![
            ListingEntry::new(1, "with space.txt"),
            ListingEntry::new(2, "ünïcødé-文件"),
            ListingEntry::new(3, ".hidden"),
            ListingEntry::new(4, "semi;colon,comma=eq"),
            ListingEntry::new(u64::from(u32::MAX) + 1, "big.dat"),
        ];
        assert!(entries.iter().all(ListingEntry::is_encodable));
        assert_eq!(decode_listing(&encode_listing(&entries)), entries);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let text = b"10:a.txt\nno-separator\n1:b:c\nx:bad-size\n:empty-size\n2048:b.bin\n\n";
        assert_eq!(
            decode_listing(text),
            vec![
                ListingEntry::new(10, "a.txt"),
                ListingEntry::new(2048, "b.bin")
            ]
        );
    }

    #[test]
    fn truncated_final_line_is_dropped() {
        assert_eq!(
            decode_listing(b"10:a.txt\n20"),
            vec![ListingEntry::new(10, "a.txt")]
        );
    }

    #[test]
    fn colon_in_name_not_encodable() {
        assert!(!ListingEntry::new(1, "a:b").is_encodable());
        assert!(!ListingEntry::new(1, "a\nb").is_encodable());
    }

    #[test]
    fn termination() {
        assert!(!is_terminated(b""));
        assert!(!is_terminated(b"10:a\n"));
        assert!(is_terminated(b"10:a\n\n"));
    }
}
