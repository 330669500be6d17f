//! Structured text extraction from raw HTML.
//!
//! Pulls headings, paragraphs, and list items out of a page in document
//! order. Pure: no I/O, same input gives the same record.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use grantbot_shared::{CorpusSnapshot, Diagnostic, PageRecord, Stage};

use crate::engine::FetchOutcome;

static HEADING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("valid selector"));
static PARAGRAPH_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("valid selector"));
static LIST_ITEM_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li").expect("valid selector"));

/// Extraction options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Keep fragments that are empty after trimming.
    pub keep_blank: bool,
}

/// Extract a [`PageRecord`] with default options (blank fragments dropped).
pub fn extract(raw_html: &str, url: &str) -> PageRecord {
    extract_with(raw_html, url, &ExtractOptions::default())
}

/// Extract a [`PageRecord`] from `raw_html`.
pub fn extract_with(raw_html: &str, url: &str, opts: &ExtractOptions) -> PageRecord {
    let doc = Html::parse_document(raw_html);

    let record = PageRecord {
        url: url.to_string(),
        headings: collect_text(&doc, &HEADING_SEL, opts),
        paragraphs: collect_text(&doc, &PARAGRAPH_SEL, opts),
        list_items: collect_text(&doc, &LIST_ITEM_SEL, opts),
    };

    debug!(
        url,
        headings = record.headings.len(),
        paragraphs = record.paragraphs.len(),
        list_items = record.list_items.len(),
        "page extracted"
    );

    record
}

fn collect_text(doc: &Html, selector: &Selector, opts: &ExtractOptions) -> Vec<String> {
    doc.select(selector)
        .map(element_text)
        .filter(|text| opts.keep_blank || !text.is_empty())
        .collect()
}

/// All descendant text of an element, trimmed.
fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Turn a batch of fetch outcomes into a corpus snapshot.
///
/// Successful fetches are extracted in order; each failure becomes a
/// user-facing [`Diagnostic`] and contributes no record.
pub fn build_corpus(
    outcomes: &[FetchOutcome],
    opts: &ExtractOptions,
) -> (CorpusSnapshot, Vec<Diagnostic>) {
    let mut pages = Vec::new();
    let mut diagnostics = Vec::new();

    for outcome in outcomes {
        match &outcome.result {
            Ok(body) => pages.push(extract_with(body, outcome.url.as_str(), opts)),
            Err(failure) => diagnostics.push(Diagnostic::new(
                Stage::Fetch,
                format!("Failed to fetch data from {}: {failure}", outcome.url),
            )),
        }
    }

    (CorpusSnapshot::new(pages), diagnostics)
}
