//! Content fingerprints for change detection.
//!
//! Four hashes are computed over distinct projections of the extracted
//! content; equality of any one implies equality of that projection:
//!
//! - `content_hash`: Blake3 of the normalized text
//! - `structure_hash`: Blake2b-256 of the DOM outline signature sequence
//! - `text_block_hash`: Blake2b-256 of the text blocks sorted
//!   lexicographically (catches reordering)
//! - `semantic_hash`: Blake2b-256 of the normalized text with
//!   non-alphanumerics collapsed (catches formatting-only edits)

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::extract::OutlineNode;

type Blake2b256 = Blake2b<U32>;

/// The four content fingerprints of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintSet {
    pub content_hash: String,
    pub structure_hash: String,
    pub text_block_hash: String,
    pub semantic_hash: String,
}

impl FingerprintSet {
    pub fn compute(normalized_text: &str, outline: &[OutlineNode], text_blocks: &[String]) -> Self {
        Self {
            content_hash: content_hash(normalized_text),
            structure_hash: structure_hash(outline),
            text_block_hash: text_block_hash(text_blocks),
            semantic_hash: semantic_hash(normalized_text),
        }
    }

    /// True when all four projections are identical.
    pub fn matches(&self, other: &FingerprintSet) -> bool {
        self == other
    }
}

/// Blake3 over the normalized text, hex-encoded.
pub fn content_hash(normalized_text: &str) -> String {
    blake3::hash(normalized_text.as_bytes()).to_hex().to_string()
}

/// Blake2b-256 over `|`-joined outline signatures.
pub fn structure_hash(outline: &[OutlineNode]) -> String {
    let joined = outline
        .iter()
        .map(OutlineNode::signature)
        .collect::<Vec<_>>()
        .join("|");
    blake2b_hex(joined.as_bytes())
}

/// Blake2b-256 over text blocks sorted lexicographically and newline-joined.
pub fn text_block_hash(text_blocks: &[String]) -> String {
    let mut sorted: Vec<&str> = text_blocks
        .iter()
        .map(String::as_str)
        .filter(|b| !b.is_empty())
        .collect();
    sorted.sort_unstable();
    blake2b_hex(sorted.join("\n").as_bytes())
}

/// Blake2b-256 over the text with every non-alphanumeric run collapsed to
/// a single space.
pub fn semantic_hash(normalized_text: &str) -> String {
    let mut collapsed = String::with_capacity(normalized_text.len());
    let mut in_gap = false;
    for c in normalized_text.chars() {
        if c.is_alphanumeric() {
            collapsed.push(c);
            in_gap = false;
        } else if !in_gap {
            collapsed.push(' ');
            in_gap = true;
        }
    }
    blake2b_hex(collapsed.trim().as_bytes())
}

fn blake2b_hex(bytes: &[u8]) -> String {
    let mut hasher = Blake2b256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(tag: &str, depth: usize) -> OutlineNode {
        OutlineNode {
            tag: tag.to_string(),
            depth,
            classes: vec![],
            id: None,
        }
    }

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash("hello world"), content_hash("hello world"));
        assert_ne!(content_hash("hello"), content_hash("world"));
        assert_eq!(content_hash("x").len(), 64);
    }

    #[test]
    fn structure_hash_orders_by_outline() {
        let a = vec![node("div", 0), node("p", 1)];
        let b = vec![node("p", 1), node("div", 0)];
        assert_ne!(structure_hash(&a), structure_hash(&b));
        assert_eq!(structure_hash(&a), structure_hash(&a.clone()));
    }

    #[test]
    fn structure_hash_sensitive_to_classes() {
        let plain = vec![node("div", 0)];
        let classed = vec![OutlineNode {
            tag: "div".into(),
            depth: 0,
            classes: vec!["hero".into()],
            id: None,
        }];
        assert_ne!(structure_hash(&plain), structure_hash(&classed));
    }

    #[test]
    fn text_block_hash_ignores_order() {
        let a = vec!["alpha".to_string(), "beta".to_string()];
        let b = vec!["beta".to_string(), "alpha".to_string()];
        assert_eq!(text_block_hash(&a), text_block_hash(&b));
    }

    #[test]
    fn text_block_hash_skips_empty_blocks() {
        let a = vec!["alpha".to_string(), String::new()];
        let b = vec!["alpha".to_string()];
        assert_eq!(text_block_hash(&a), text_block_hash(&b));
    }

    #[test]
    fn semantic_hash_ignores_formatting() {
        assert_eq!(
            semantic_hash("breaking news: site updated!"),
            semantic_hash("breaking   news -- site,, updated")
        );
        assert_ne!(semantic_hash("breaking news"), semantic_hash("broken news"));
    }

    #[test]
    fn fingerprint_set_matches_itself() {
        let outline = vec![node("body", 0), node("p", 1)];
        let blocks = vec!["welcome to the site".to_string()];
        let fp = FingerprintSet::compute("welcome to the site", &outline, &blocks);
        assert!(fp.matches(&fp.clone()));

        let other = FingerprintSet::compute("hacked by someone", &outline, &blocks);
        assert!(!fp.matches(&other));
    }
}
