use once_cell::sync::Lazy;
use regex::{CaptureMatches, Regex};
use std::borrow::Cow;
use std::ops::Range;
use url::Url;

use crate::reference::{Locator, Reference, ResourceKind};
use crate::url_canon;

// `@import` alternatives come first so an import's url() is not also
// reported as a plain url() token.
static CSS_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"(?i)@import\s+(?:url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)|"([^"]*)"|'([^']*)')"#,
        r#"|\burl\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#,
    ))
    .expect("css reference regex")
});

static FONT_FACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)@font-face\s*\{[^}]*\}").expect("font-face regex"));

const IMPORT_GROUPS: [usize; 5] = [1, 2, 3, 4, 5];
const URL_GROUPS: [usize; 3] = [6, 7, 8];

/// Byte ranges of `/* ... */` comments. Strings and unquoted `url(...)`
/// tokens are stepped over, so `url("a/*b.png")` opens no comment.
fn comment_ranges(css: &str) -> Vec<Range<usize>> {
    let bytes = css.as_bytes();
    let mut ranges = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote && bytes[i] != b'\n' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = css[i + 2..].find("*/").map_or(bytes.len(), |p| i + 2 + p + 2);
                ranges.push(i..end);
                i = end;
            }
            b'u' | b'U' if bytes.len() - i >= 4 && bytes[i..i + 4].eq_ignore_ascii_case(b"url(") => {
                let mut j = i + 4;
                while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                i = match bytes.get(j) {
                    Some(b'"') | Some(b'\'') => j,
                    _ => css[j..].find(')').map_or(bytes.len(), |p| j + p + 1),
                };
            }
            _ => i += 1,
        }
    }

    ranges
}

/// URL text of a token taken from an HTML attribute: entities decoded and
/// any quotes that were written as entities removed.
fn decode_attribute_token(raw: &str) -> Cow<'_, str> {
    match html_escape::decode_html_entities(raw) {
        Cow::Borrowed(text) => Cow::Borrowed(text),
        Cow::Owned(text) => Cow::Owned(text.trim().trim_matches(|c| c == '"' || c == '\'').to_string()),
    }
}

/// Lazily yields every `url(...)` and `@import` reference in a CSS text.
///
/// Spans are relative to the text given to [`extract_css`], shifted by the
/// offset given to [`extract_css_at`] when the CSS is embedded in a larger
/// document (a `style="..."` attribute).
pub struct CssReferences<'a> {
    base: Option<Url>,
    offset: usize,
    decode_entities: bool,
    matches: CaptureMatches<'static, 'a>,
    font_faces: Vec<Range<usize>>,
    comments: Vec<Range<usize>>,
}

pub fn extract_css<'a>(css: &'a str, base_url: &str) -> CssReferences<'a> {
    extract_css_at(css, base_url, 0)
}

pub fn extract_css_at<'a>(css: &'a str, base_url: &str, offset: usize) -> CssReferences<'a> {
    CssReferences {
        base: Url::parse(base_url).ok(),
        offset,
        decode_entities: false,
        matches: CSS_REF_RE.captures_iter(css),
        font_faces: FONT_FACE_RE.find_iter(css).map(|m| m.range()).collect(),
        comments: comment_ranges(css),
    }
}

/// CSS of a `style="..."` attribute value as written in the markup. Spans
/// stay on the raw text; URLs are resolved from the entity-decoded token.
pub fn extract_style_attr<'a>(value: &'a str, base_url: &str, offset: usize) -> CssReferences<'a> {
    CssReferences {
        decode_entities: true,
        ..extract_css_at(value, base_url, offset)
    }
}

impl<'a> CssReferences<'a> {
    fn within(ranges: &[Range<usize>], pos: usize) -> bool {
        ranges.iter().any(|r| r.contains(&pos))
    }

    fn kind_for(&self, raw: &str, is_import: bool, pos: usize) -> ResourceKind {
        if is_import {
            return ResourceKind::Stylesheet;
        }
        if Self::within(&self.font_faces, pos) {
            return ResourceKind::Font;
        }
        let ext = self
            .base
            .as_ref()
            .and_then(|base| base.join(raw.trim()).ok())
            .and_then(|url| url_canon::extension_of(url.as_str()));
        match ext.as_deref().and_then(url_canon::classify_extension) {
            Some(ResourceKind::Stylesheet) => ResourceKind::Stylesheet,
            Some(ResourceKind::Font) => ResourceKind::Font,
            _ => ResourceKind::Image,
        }
    }
}

impl<'a> Iterator for CssReferences<'a> {
    type Item = Reference;

    fn next(&mut self) -> Option<Reference> {
        loop {
            let caps = self.matches.next()?;
            let whole = caps.get(0)?;
            if Self::within(&self.comments, whole.start()) {
                continue;
            }

            let (value, is_import) = match IMPORT_GROUPS.iter().find_map(|&i| caps.get(i)) {
                Some(m) => (m, true),
                None => match URL_GROUPS.iter().find_map(|&i| caps.get(i)) {
                    Some(m) => (m, false),
                    None => continue,
                },
            };

            let raw = value.as_str();
            let target = if self.decode_entities {
                decode_attribute_token(raw)
            } else {
                Cow::Borrowed(raw)
            };
            let resolved = self
                .base
                .as_ref()
                .and_then(|base| url_canon::resolve(base.as_str(), &target).ok());

            return Some(Reference {
                raw: raw.to_string(),
                resolved,
                kind: self.kind_for(&target, is_import, whole.start()),
                origin: Locator::Span(value.range()).shifted(self.offset),
            });
        }
    }
}
