//! HTML content extraction and preprocessing.
//!
//! Transforms raw fetched HTML into a stable [`ExtractedContent`]
//! representation: normalized text, keyword set, DOM outline, text blocks,
//! links and forms. Fingerprints are derived from these projections by
//! [`crate::hashing`].

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ExtractorConfig;
use crate::error::AppError;
use crate::hashing::FingerprintSet;

/// Nesting cap for the DOM outline walk; avoids runaway nesting on
/// adversarial documents.
const MAX_OUTLINE_DEPTH: usize = 10;

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "up", "about", "into", "through", "during", "before", "after", "above", "below",
        "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
        "did", "will", "would", "could", "should", "may", "might", "must", "can", "this", "that",
        "these", "those", "you", "he", "she", "it", "we", "they",
    ]
    .into_iter()
    .collect()
});

static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("static selector"));
static META_DESCRIPTION_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("meta[name='description'], meta[property='og:description']")
        .expect("static selector")
});
static BODY_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("static selector"));
static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));
static FORM_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("form").expect("static selector"));
static INPUT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input, textarea, select").expect("static selector"));

/// One element in the DOM outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub tag: String,
    pub depth: usize,
    pub classes: Vec<String>,
    pub id: Option<String>,
}

impl OutlineNode {
    /// Stable signature `tag:depth[.class1.class2…][#id]`, classes sorted.
    pub fn signature(&self) -> String {
        let mut sig = format!("{}:{}", self.tag, self.depth);
        if !self.classes.is_empty() {
            let mut classes = self.classes.clone();
            classes.sort_unstable();
            sig.push('.');
            sig.push_str(&classes.join("."));
        }
        if let Some(id) = &self.id {
            sig.push('#');
            sig.push_str(id);
        }
        sig
    }
}

/// A hyperlink found on the page, tagged internal/external.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLink {
    pub url: String,
    pub text: String,
    pub external: bool,
}

/// Metadata of one form input field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub input_type: String,
    pub name: String,
    pub required: bool,
}

/// A form found on the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageForm {
    pub action: String,
    pub method: String,
    pub fields: Vec<FormField>,
}

/// Transient structured representation of a fetched page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub title: String,
    pub meta_description: String,
    pub normalized_text: String,
    pub keywords: BTreeSet<String>,
    pub outline: Vec<OutlineNode>,
    pub text_blocks: Vec<String>,
    pub links: Vec<PageLink>,
    pub forms: Vec<PageForm>,
    pub word_count: usize,
    pub truncated: bool,
}

impl ExtractedContent {
    pub fn fingerprints(&self) -> FingerprintSet {
        FingerprintSet::compute(&self.normalized_text, &self.outline, &self.text_blocks)
    }
}

/// Extracts and preprocesses page content from raw HTML.
///
/// The ignore-set, significant block tags, dynamic-content patterns and
/// the oversize cap all come from [`ExtractorConfig`]; regexes and
/// selectors are compiled once at construction.
pub struct ContentExtractor {
    ignore_tags: HashSet<String>,
    block_selector: Selector,
    dynamic_patterns: Vec<Regex>,
    min_block_len: usize,
    max_content_chars: usize,
}

impl ContentExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self, AppError> {
        let block_selector = Selector::parse(&config.block_tags.join(",")).map_err(|e| {
            AppError::ConfigError(format!("invalid block tag list: {e}"))
        })?;

        let dynamic_patterns = config
            .dynamic_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| AppError::ConfigError(format!("invalid dynamic pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            ignore_tags: config.ignore_tags.iter().cloned().collect(),
            block_selector,
            dynamic_patterns,
            min_block_len: config.min_block_len,
            max_content_chars: config.max_content_chars,
        })
    }

    /// Extract structured content from an HTML document.
    ///
    /// Parsing is best-effort: malformed markup is recovered, never fatal.
    pub fn extract(&self, html: &str, base_url: &str) -> ExtractedContent {
        let doc = Html::parse_document(html);

        let title = doc
            .select(&TITLE_SELECTOR)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .unwrap_or_default();

        let meta_description = doc
            .select(&META_DESCRIPTION_SELECTOR)
            .find_map(|el| el.value().attr("content"))
            .map(|s| collapse_whitespace(s))
            .unwrap_or_default();

        let root = doc.select(&BODY_SELECTOR).next().or(Some(doc.root_element()));
        let mut outline = Vec::new();
        if let Some(body) = root {
            self.walk_outline(body, 0, &mut outline);
        }

        let text_blocks = self.extract_text_blocks(&doc);
        let links = self.extract_links(&doc, base_url);
        let forms = extract_forms(&doc);

        let raw_text = text_blocks.join(" ");
        let (normalized_text, truncated) = self.normalize(&raw_text);
        let keywords = extract_keywords(&normalized_text);
        let word_count = normalized_text.split_whitespace().count();

        ExtractedContent {
            title,
            meta_description,
            normalized_text,
            keywords,
            outline,
            text_blocks,
            links,
            forms,
            word_count,
            truncated,
        }
    }

    fn walk_outline(&self, el: ElementRef<'_>, depth: usize, out: &mut Vec<OutlineNode>) {
        let tag = el.value().name();
        if self.ignore_tags.contains(tag) {
            return;
        }

        out.push(OutlineNode {
            tag: tag.to_string(),
            depth,
            classes: el.value().classes().map(str::to_string).collect(),
            id: el.value().id().map(str::to_string),
        });

        if depth >= MAX_OUTLINE_DEPTH {
            return;
        }
        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                self.walk_outline(child_el, depth + 1, out);
            }
        }
    }

    fn extract_text_blocks(&self, doc: &Html) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut blocks = Vec::new();

        for el in doc.select(&self.block_selector) {
            let text = collapse_whitespace(&el.text().collect::<String>());
            if text.len() < self.min_block_len {
                continue;
            }
            if seen.insert(text.clone()) {
                blocks.push(text);
            }
        }
        blocks
    }

    fn extract_links(&self, doc: &Html, base_url: &str) -> Vec<PageLink> {
        let base = Url::parse(base_url).ok();
        let base_host = base.as_ref().and_then(|u| u.host_str().map(str::to_string));

        let mut links = Vec::new();
        for el in doc.select(&LINK_SELECTOR) {
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            let href = href.trim();
            if href.is_empty() || href.starts_with('#') {
                continue;
            }

            let resolved = match &base {
                Some(b) => match b.join(href) {
                    Ok(u) => u,
                    Err(_) => continue,
                },
                None => match Url::parse(href) {
                    Ok(u) => u,
                    Err(_) => continue,
                },
            };

            let external = match (&base_host, resolved.host_str()) {
                (Some(base), Some(link)) => base != link,
                _ => true,
            };

            links.push(PageLink {
                url: resolved.to_string(),
                text: collapse_whitespace(&el.text().collect::<String>()),
                external,
            });
        }
        links
    }

    /// Lowercase, strip dynamic-content patterns, collapse whitespace and
    /// truncate at the configured cap.
    fn normalize(&self, text: &str) -> (String, bool) {
        let mut normalized = text.to_lowercase();
        for pattern in &self.dynamic_patterns {
            normalized = pattern.replace_all(&normalized, "").into_owned();
        }
        let mut normalized = collapse_whitespace(&normalized);

        let truncated = normalized.chars().count() > self.max_content_chars;
        if truncated {
            normalized = normalized.chars().take(self.max_content_chars).collect();
        }
        (normalized, truncated)
    }
}

fn extract_forms(doc: &Html) -> Vec<PageForm> {
    let mut forms = Vec::new();
    for form in doc.select(&FORM_SELECTOR) {
        let fields = form
            .select(&INPUT_SELECTOR)
            .map(|input| FormField {
                input_type: input.value().attr("type").unwrap_or("text").to_string(),
                name: input.value().attr("name").unwrap_or_default().to_string(),
                required: input.value().attr("required").is_some(),
            })
            .collect();

        forms.push(PageForm {
            action: form.value().attr("action").unwrap_or_default().to_string(),
            method: form
                .value()
                .attr("method")
                .unwrap_or("get")
                .to_lowercase(),
            fields,
        });
    }
    forms
}

/// Tokenize normalized text into the deduplicated keyword set: stopwords
/// dropped, tokens shorter than three characters dropped.
pub fn extract_keywords(normalized_text: &str) -> BTreeSet<String> {
    normalized_text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
