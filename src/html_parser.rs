use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::ops::Range;

use crate::css_parser;
use crate::reference::{Locator, Reference, ResourceKind};
use crate::url_canon;

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("attribute regex")
});

/// What the tokenizer reported, reduced to what locating a tag needs.
#[derive(Debug)]
enum Scanned {
    Start(String),
    End(String),
    /// Comment or doctype. Nothing inside it is a tag.
    Markup,
}

/// Collects tag boundaries and switches the tokenizer into raw text where
/// a tree builder would.
#[derive(Default)]
struct TagSink {
    scanned: Vec<Scanned>,
}

impl TokenSink for TagSink {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::TagToken(tag) => {
                let name = String::from(&*tag.name);
                let result = match (tag.kind, name.as_str()) {
                    (TagKind::StartTag, "script") => TokenSinkResult::RawData(RawKind::ScriptData),
                    (TagKind::StartTag, "style" | "xmp" | "iframe" | "noembed" | "noframes") => {
                        TokenSinkResult::RawData(RawKind::Rawtext)
                    }
                    (TagKind::StartTag, "title" | "textarea") => TokenSinkResult::RawData(RawKind::Rcdata),
                    (TagKind::StartTag, "plaintext") => TokenSinkResult::Plaintext,
                    _ => TokenSinkResult::Continue,
                };
                self.scanned.push(match tag.kind {
                    TagKind::StartTag => Scanned::Start(name),
                    TagKind::EndTag => Scanned::End(name),
                });
                result
            }
            Token::CommentToken(_) | Token::DoctypeToken(_) => {
                self.scanned.push(Scanned::Markup);
                TokenSinkResult::Continue
            }
            _ => TokenSinkResult::Continue,
        }
    }
}

/// Offsets of `<name` (or `</name` with `open = "</"`) in `haystack` where
/// the name is complete, compared ASCII case-insensitively.
fn tag_opens<'h>(haystack: &'h str, open: &'h str, name: &'h str) -> impl Iterator<Item = usize> + 'h {
    let bytes = haystack.as_bytes();
    haystack.match_indices(open).map(|(i, _)| i).filter(move |&i| {
        let name_start = i + open.len();
        let name_end = name_start + name.len();
        name_end <= bytes.len()
            && bytes[name_start..name_end].eq_ignore_ascii_case(name.as_bytes())
            && bytes
                .get(name_end)
                .map_or(true, |b| b.is_ascii_whitespace() || *b == b'/' || *b == b'>')
    })
}

#[derive(Debug)]
struct Attr<'a> {
    name: String,
    value: &'a str,
    /// Absolute span of the value inside the document.
    span: Range<usize>,
}

fn parse_attrs(html: &str, attrs: Range<usize>) -> Vec<Attr<'_>> {
    let offset = attrs.start;
    ATTR_RE
        .captures_iter(&html[attrs])
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let (value, span) = match (2..=4).find_map(|i| caps.get(i)) {
                Some(m) => (
                    &html[offset + m.start()..offset + m.end()],
                    (offset + m.start())..(offset + m.end()),
                ),
                None => ("", 0..0),
            };
            Some(Attr { name, value, span })
        })
        .collect()
}

fn attr<'b, 'a>(attrs: &'b [Attr<'a>], name: &str) -> Option<&'b Attr<'a>> {
    attrs.iter().find(|a| a.name == name)
}

/// Spans of the URL tokens in a `srcset` value, descriptors excluded.
fn srcset_candidates(value: &str) -> Vec<Range<usize>> {
    let bytes = value.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut end = i;
        while end > start && bytes[end - 1] == b',' {
            end -= 1;
        }
        if end > start {
            out.push(start..end);
        }
        // A URL ending in a comma has no descriptors.
        if end < i {
            continue;
        }
        while i < bytes.len() && bytes[i] != b',' {
            i += 1;
        }
    }

    out
}

fn is_javascript_type(script_type: Option<&str>) -> bool {
    match script_type.map(|t| t.trim().to_ascii_lowercase()) {
        None => true,
        Some(t) => t.is_empty() || t == "module" || t.contains("javascript") || t.contains("ecmascript"),
    }
}

/// An inline `<style>` or `<script>` whose closing tag has not been seen.
#[derive(Debug)]
struct OpenBlock {
    kind: ResourceKind,
    start: usize,
    attrs: Range<usize>,
    body_start: usize,
}

/// Lazily yields every resource reference in an HTML document.
///
/// Tag boundaries come from the html5ever tokenizer, so comments, quoting
/// and raw-text bodies follow the HTML tokenization rules. The input is fed
/// one `>`-terminated chunk at a time; a tag token therefore ends where its
/// chunk ends, and its start is found in the text since the previous token.
///
/// External references carry the span of their attribute value. Inline
/// `<style>` and `<script>` bodies are yielded once each as a whole element;
/// the CSS inside a `<style>` body is not scanned here.
pub struct HtmlReferences<'a> {
    html: &'a str,
    base_url: String,
    tokenizer: Tokenizer<TagSink>,
    input: BufferQueue,
    cursor: usize,
    last_token_end: usize,
    open: Option<OpenBlock>,
    pending: VecDeque<Reference>,
    finished: bool,
}

pub fn extract_html<'a>(html: &'a str, base_url: &str) -> HtmlReferences<'a> {
    HtmlReferences {
        html,
        base_url: base_url.to_string(),
        tokenizer: Tokenizer::new(TagSink::default(), TokenizerOpts::default()),
        input: BufferQueue::new(),
        cursor: 0,
        last_token_end: 0,
        open: None,
        pending: VecDeque::new(),
        finished: false,
    }
}

impl<'a> HtmlReferences<'a> {
    fn push_value(&mut self, raw: &str, span: Range<usize>, kind: ResourceKind) {
        let decoded = html_escape::decode_html_entities(raw);
        let resolved = url_canon::resolve(&self.base_url, &decoded).ok();
        self.pending.push_back(Reference {
            raw: raw.to_string(),
            resolved,
            kind,
            origin: Locator::Span(span),
        });
    }

    fn push_attr(&mut self, attrs: &[Attr<'_>], name: &str, kind: ResourceKind) {
        match attr(attrs, name) {
            Some(a) if !a.value.trim().is_empty() => self.push_value(a.value, a.span.clone(), kind),
            _ => {}
        }
    }

    fn push_srcset(&mut self, attrs: &[Attr<'_>]) {
        if let Some(a) = attr(attrs, "srcset") {
            for candidate in srcset_candidates(a.value) {
                let raw = &a.value[candidate.clone()];
                let span = (a.span.start + candidate.start)..(a.span.start + candidate.end);
                self.push_value(raw, span, ResourceKind::Image);
            }
        }
    }

    fn visit_link(&mut self, attrs: &[Attr<'_>]) {
        let rel = attr(attrs, "rel").map(|a| a.value.to_ascii_lowercase()).unwrap_or_default();
        let rels: Vec<&str> = rel.split_whitespace().collect();

        let kind = if rels.contains(&"stylesheet") {
            Some(ResourceKind::Stylesheet)
        } else if rels.iter().any(|r| r.ends_with("icon")) {
            Some(ResourceKind::Image)
        } else if rels.contains(&"modulepreload") {
            Some(ResourceKind::Script)
        } else if rels.contains(&"preload") {
            match attr(attrs, "as").map(|a| a.value.to_ascii_lowercase()).as_deref() {
                Some("style") => Some(ResourceKind::Stylesheet),
                Some("script") => Some(ResourceKind::Script),
                Some("font") => Some(ResourceKind::Font),
                Some("image") => Some(ResourceKind::Image),
                _ => None,
            }
        } else {
            None
        };

        if let Some(kind) = kind {
            self.push_attr(attrs, "href", kind);
        }
    }

    fn open_block(&mut self, kind: ResourceKind, start: usize, attrs: Range<usize>, body_start: usize) {
        self.open = Some(OpenBlock {
            kind,
            start,
            attrs,
            body_start,
        });
    }

    /// Yields the open inline block once its body ends at `body_end` and the
    /// whole element at `element_end`.
    fn close_block(&mut self, body_end: usize, element_end: usize) {
        let Some(block) = self.open.take() else {
            return;
        };
        let body = block.body_start..body_end.max(block.body_start);
        let text = &self.html[body.clone()];
        let trimmed = text.trim();
        let skip = match block.kind {
            ResourceKind::InlineScript => trimmed.is_empty() || trimmed.starts_with("<!--"),
            _ => trimmed.is_empty(),
        };
        if skip {
            return;
        }
        self.pending.push_back(Reference {
            raw: text.to_string(),
            resolved: None,
            kind: block.kind,
            origin: Locator::Element {
                element: block.start..element_end,
                attrs: block.attrs,
                body,
            },
        });
    }

    fn visit_tag(&mut self, name: &str, start: usize, tag_end: usize, attrs_span: Range<usize>) {
        let html = self.html;
        let attrs = parse_attrs(html, attrs_span.clone());

        match name {
            "link" => self.visit_link(&attrs),
            "script" => {
                if attr(&attrs, "src").is_some() {
                    self.push_attr(&attrs, "src", ResourceKind::Script);
                } else if is_javascript_type(attr(&attrs, "type").map(|a| a.value)) {
                    self.open_block(ResourceKind::InlineScript, start, attrs_span, tag_end);
                }
            }
            "style" => self.open_block(ResourceKind::InlineStyle, start, attrs_span, tag_end),
            "img" => {
                self.push_attr(&attrs, "src", ResourceKind::Image);
                self.push_srcset(&attrs);
            }
            "source" => {
                self.push_srcset(&attrs);
                self.push_attr(&attrs, "src", ResourceKind::Other);
            }
            "video" => {
                self.push_attr(&attrs, "poster", ResourceKind::Image);
                self.push_attr(&attrs, "src", ResourceKind::Other);
            }
            "audio" => self.push_attr(&attrs, "src", ResourceKind::Other),
            _ => {}
        }

        if let Some(style) = attr(&attrs, "style") {
            let refs = css_parser::extract_style_attr(style.value, &self.base_url, style.span.start);
            self.pending.extend(refs);
        }
    }

    /// Locates a token that ended at `end` in the raw text and visits it.
    fn visit_scanned(&mut self, scanned: Scanned, end: usize) {
        let html = self.html;
        let from = self.last_token_end;
        self.last_token_end = end;
        let since = &html[from..end];

        match scanned {
            Scanned::Markup => {}
            Scanned::Start(name) => {
                let Some(start) = tag_opens(since, "<", &name).next().map(|i| from + i) else {
                    return;
                };
                let attrs_start = start + 1 + name.len();
                let attrs_end = if since.ends_with('>') { end - 1 } else { end };
                self.visit_tag(&name, start, end, attrs_start..attrs_end.max(attrs_start));
            }
            Scanned::End(name) => {
                let matches_open = match (&self.open, name.as_str()) {
                    (Some(block), "script") => block.kind == ResourceKind::InlineScript,
                    (Some(block), "style") => block.kind == ResourceKind::InlineStyle,
                    _ => false,
                };
                if !matches_open {
                    return;
                }
                if let Some(close) = tag_opens(since, "</", &name).last() {
                    self.close_block(from + close, end);
                }
            }
        }
    }

    /// Feeds the next chunk to the tokenizer and visits what it produced.
    fn advance(&mut self) {
        let html = self.html;
        let end = html[self.cursor..]
            .find('>')
            .map_or(html.len(), |i| self.cursor + i + 1);

        if end > self.cursor {
            self.input.push_back(StrTendril::from_slice(&html[self.cursor..end]));
            // The sink never asks for a script to run, so feeding always completes.
            let _ = self.tokenizer.feed(&mut self.input);
            self.cursor = end;
        }
        if self.cursor >= html.len() {
            self.tokenizer.end();
            self.finished = true;
        }

        for scanned in std::mem::take(&mut self.tokenizer.sink.scanned) {
            self.visit_scanned(scanned, end);
        }
        if self.finished {
            // An unterminated raw-text element runs to the end of the document.
            self.close_block(html.len(), html.len());
        }
    }
}

impl<'a> Iterator for HtmlReferences<'a> {
    type Item = Reference;

    fn next(&mut self) -> Option<Reference> {
        loop {
            if let Some(reference) = self.pending.pop_front() {
                return Some(reference);
            }
            if self.finished {
                return None;
            }
            self.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.com/blog/post.html";

    fn collect(html: &str) -> Vec<Reference> {
        extract_html(html, BASE).collect()
    }

    #[test]
    fn test_html_reference_kinds() {
        let html_content = r#"
            <html>
                <head>
                    <link rel="stylesheet" href="/style.css">
                    <link rel="icon" href="favicon.ico">
                    <link rel="preload" as="font" href="/f/brand.woff2" crossorigin>
                    <link rel="canonical" href="https://example.com/blog/post.html">
                    <script src="/script.js"></script>
                </head>
                <body>
                    <img src="/image.jpg" alt="test">
                    <a href="/page">Link</a>
                    <video poster="poster.webp"><source src="clip.mp4" type="video/mp4"></video>
                </body>
            </html>
        "#;

        let refs = collect(html_content);
        let found: Vec<_> = refs
            .iter()
            .map(|r| (r.kind, r.resolved.clone().unwrap()))
            .collect();

        assert_eq!(
            found,
            vec![
                (ResourceKind::Stylesheet, "https://example.com/style.css".to_string()),
                (ResourceKind::Image, "https://example.com/blog/favicon.ico".to_string()),
                (ResourceKind::Font, "https://example.com/f/brand.woff2".to_string()),
                (ResourceKind::Script, "https://example.com/script.js".to_string()),
                (ResourceKind::Image, "https://example.com/image.jpg".to_string()),
                (ResourceKind::Image, "https://example.com/blog/poster.webp".to_string()),
                (ResourceKind::Other, "https://example.com/blog/clip.mp4".to_string()),
            ]
        );
    }

    #[test]
    fn test_spans_address_raw_values() {
        let html_content = r#"<link href='a.css' rel=stylesheet><img src=b.png><img alt="x>y" src="c.png">"#;
        let refs = collect(html_content);

        assert_eq!(refs.len(), 3);
        for reference in &refs {
            assert_eq!(&html_content[reference.origin.span()], reference.raw);
        }
    }

    #[test]
    fn test_srcset_candidates_are_distinct() {
        let html_content = r#"
            <picture>
                <source srcset="hero-800.webp 800w, hero-1600.webp 1600w">
                <img src="hero.jpg" srcset="hero.jpg 1x,hero@2x.jpg 2x">
            </picture>
        "#;

        let refs = collect(html_content);
        let raws: Vec<_> = refs.iter().map(|r| r.raw.as_str()).collect();
        assert_eq!(
            raws,
            vec!["hero-800.webp", "hero-1600.webp", "hero.jpg", "hero.jpg", "hero@2x.jpg"]
        );
        assert!(refs.iter().all(|r| r.kind == ResourceKind::Image));
        for reference in &refs {
            assert_eq!(&html_content[reference.origin.span()], reference.raw);
        }
    }

    #[test]
    fn test_inline_blocks() {
        let html_content = r#"<head><style media="screen">
            body { background: url(bg.png); }
        </style><script>
            document.write('<img src="not-a-resource.png">');
        </script><script type="application/ld+json">{"@type":"Thing"}</script><style>   </style></head>"#;

        let refs = collect(html_content);
        assert_eq!(refs.len(), 2);

        assert_eq!(refs[0].kind, ResourceKind::InlineStyle);
        assert!(refs[0].raw.contains("url(bg.png)"));
        assert_eq!(refs[0].resolved, None);
        match &refs[0].origin {
            Locator::Element { element, attrs, body } => {
                assert!(html_content[element.clone()].starts_with("<style"));
                assert!(html_content[element.clone()].ends_with("</style>"));
                assert_eq!(&html_content[attrs.clone()], r#" media="screen""#);
                assert_eq!(&html_content[body.clone()], refs[0].raw);
            }
            other => panic!("unexpected locator {:?}", other),
        }

        assert_eq!(refs[1].kind, ResourceKind::InlineScript);
        assert!(refs[1].raw.contains("document.write"));
    }

    #[test]
    fn test_unresolvable_and_duplicates_pass_through() {
        let html_content = r##"
            <img src="data:image/gif;base64,R0lGOD">
            <img src="#">
            <img src="/same.png"><img src="/same.png">
            <!-- <img src="/commented.png"> -->
        "##;

        let refs = collect(html_content);
        assert_eq!(refs.len(), 4);
        assert_eq!(refs[0].resolved, None);
        assert_eq!(refs[1].resolved, None);
        assert_eq!(refs[2].resolved, refs[3].resolved);
        assert!(refs.iter().all(|r| !r.raw.contains("commented")));
    }

    #[test]
    fn test_style_attribute_and_entities() {
        let html_content =
            r#"<div style="background-image: url('/bg.png')"></div><img src="/img.php?a=1&amp;b=2">"#;

        let refs = collect(html_content);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].resolved.as_deref(), Some("https://example.com/bg.png"));
        assert_eq!(&html_content[refs[0].origin.span()], "/bg.png");
        assert_eq!(
            refs[1].resolved.as_deref(),
            Some("https://example.com/img.php?a=1&b=2")
        );
    }

    #[test]
    fn test_tags_after_script_with_markup_characters() {
        let html_content = "<script>if (a<b) { msg = `don't`; }</script><img src=\"/x.png\"><p>It's here</p>";

        let refs = collect(html_content);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind, ResourceKind::InlineScript);
        assert_eq!(refs[0].raw, "if (a<b) { msg = `don't`; }");
        assert_eq!(refs[1].kind, ResourceKind::Image);
        assert_eq!(refs[1].resolved.as_deref(), Some("https://example.com/x.png"));
        assert_eq!(&html_content[refs[1].origin.span()], "/x.png");
    }

    #[test]
    fn test_raw_text_and_escaped_script_bodies() {
        let html_content = r#"<title>a <img src="no-title.png"> b</title>
<textarea><img src="no-textarea.png"></textarea>
<script><!-- document.write("<script>x()</script>"); --></script>
<SCRIPT type="text/javascript">var s = "</b>";</SCRIPT >
<img src="after.png">"#;

        let refs = collect(html_content);
        let kinds: Vec<_> = refs.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ResourceKind::InlineScript, ResourceKind::Image]);
        assert_eq!(refs[0].raw, r#"var s = "</b>";"#);
        match &refs[0].origin {
            Locator::Element { element, .. } => {
                assert!(html_content[element.clone()].ends_with("</SCRIPT >"));
            }
            other => panic!("unexpected locator {:?}", other),
        }
        assert_eq!(refs[1].raw, "after.png");
    }

    #[test]
    fn test_unterminated_style_runs_to_end() {
        let html_content = "<img src=a.png><style>body { color: red }";

        let refs = collect(html_content);
        assert_eq!(refs.len(), 2);
        match &refs[1].origin {
            Locator::Element { element, body, .. } => {
                assert_eq!(element.end, html_content.len());
                assert_eq!(&html_content[body.clone()], "body { color: red }");
            }
            other => panic!("unexpected locator {:?}", other),
        }
    }

    #[test]
    fn test_style_attribute_with_entity_quotes() {
        let html_content = r#"<div style="background-image:url(&quot;/bg.png&quot;)"></div>"#;

        let refs = collect(html_content);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].resolved.as_deref(), Some("https://example.com/bg.png"));
        assert_eq!(&html_content[refs[0].origin.span()], "&quot;/bg.png&quot;");
    }

    #[test]
    fn test_srcset_parser() {
        let value = "a.png 1x, b.png 2x,c.png,";
        let spans = srcset_candidates(value);
        let tokens: Vec<_> = spans.into_iter().map(|s| &value[s]).collect();
        assert_eq!(tokens, vec!["a.png", "b.png", "c.png"]);
    }
}
