//! Content normalization and hashing for deduplication
//!
//! Two turns with the same normalized-content hash are the same logical
//! message: case, surrounding whitespace, and internal whitespace runs do not
//! distinguish them.

use sha2::{Digest, Sha256};

/// Normalize text for dedup comparison: lowercase, trim, collapse whitespace.
pub fn normalize_content(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Hex SHA-256 of the normalized content.
pub fn content_hash(text: &str) -> String {
    let normalized = normalize_content(text);
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_content("  Book   Hotel\n\tExample  "),
            "book hotel example"
        );
    }

    #[test]
    fn test_equivalent_content_hashes_equal() {
        assert_eq!(content_hash("Book Hotel Example"), content_hash("  book   HOTEL example "));
    }

    #[test]
    fn test_distinct_content_hashes_differ() {
        assert_ne!(content_hash("Book Hotel Example"), content_hash("Book Hostel Example"));
    }

    #[test]
    fn test_empty_content() {
        assert_eq!(normalize_content("   "), "");
        assert_eq!(content_hash(""), content_hash("  \n "));
    }
}
