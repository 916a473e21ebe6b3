//! Positional rewriting. Every edit targets a span recorded at extraction
//! time, so rewriting never re-parses the document.

use std::collections::HashSet;
use std::ops::Range;
use tracing::debug;

use crate::file_manager::relative_href;
use crate::reference::{Locator, Reference};
use crate::registry::{EntryState, Snapshot};
use crate::url_canon;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub span: Range<usize>,
    pub replacement: String,
}

/// How replacement text is escaped for the document it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Html,
    Css,
}

/// Which canonical URLs have a local file to point at.
///
/// Built from the registry snapshot after the last fetch round; entries whose
/// file could not be written are withdrawn with
/// [`mark_unavailable`](LocalView::mark_unavailable).
#[derive(Debug, Clone, Default)]
pub struct LocalView {
    snapshot: Snapshot,
    unavailable: HashSet<String>,
}

impl LocalView {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            unavailable: HashSet::new(),
        }
    }

    pub fn mark_unavailable(&mut self, url: &str) {
        self.unavailable.insert(url.to_string());
    }

    pub fn local_path(&self, url: &str) -> Option<&str> {
        if self.unavailable.contains(url) {
            return None;
        }
        self.snapshot
            .get(url)
            .filter(|e| e.state == EntryState::Fetched)
            .map(|e| e.local_path.as_str())
    }
}

/// New value for a reference, or `None` to leave it verbatim.
///
/// A resource with a local file is pointed at relative to `document_path`.
/// Anything else keeps pointing at the internet: absolute values stay as
/// written, relative ones are replaced by their absolute URL.
pub fn replacement(reference: &Reference, view: &LocalView, document_path: &str) -> Option<String> {
    let url = reference.resolved.as_deref()?;
    match view.local_path(url) {
        Some(local) => Some(relative_href(document_path, local)),
        None if url_canon::is_absolute(&reference.raw) => None,
        None => Some(url.to_string()),
    }
}

/// Edits for every span-addressed reference. Inline elements are left to
/// the caller.
pub fn reference_edits(
    references: &[Reference],
    view: &LocalView,
    document_path: &str,
    context: Context,
) -> Vec<Edit> {
    references
        .iter()
        .filter_map(|reference| {
            let Locator::Span(span) = &reference.origin else {
                return None;
            };
            let value = replacement(reference, view, document_path)?;
            let value = match context {
                Context::Html => html_escape::encode_double_quoted_attribute(&value).into_owned(),
                Context::Css => value,
            };
            Some(Edit {
                span: span.clone(),
                replacement: value,
            })
        })
        .collect()
}

/// Splices edits into `text`. Overlapping or out-of-range edits are dropped.
pub fn apply_edits(text: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.span.start, e.span.end));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for edit in edits {
        if edit.span.start < cursor || edit.span.end > text.len() {
            debug!(span = ?edit.span, "dropping overlapping edit");
            continue;
        }
        out.push_str(&text[cursor..edit.span.start]);
        out.push_str(&edit.replacement);
        cursor = edit.span.end;
    }
    out.push_str(&text[cursor..]);
    out
}
