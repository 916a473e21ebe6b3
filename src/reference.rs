use serde::{Deserialize, Serialize};
use std::ops::Range;

/// What a discovered reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Stylesheet,
    Script,
    Image,
    Font,
    InlineStyle,
    InlineScript,
    Other,
}

impl ResourceKind {
    pub fn asset_dir(self) -> AssetDir {
        match self {
            ResourceKind::Stylesheet | ResourceKind::InlineStyle => AssetDir::Css,
            ResourceKind::Script | ResourceKind::InlineScript => AssetDir::Js,
            ResourceKind::Image => AssetDir::Images,
            ResourceKind::Font => AssetDir::Fonts,
            ResourceKind::Other => AssetDir::Assets,
        }
    }

    /// Extension used when a name has to be synthesized.
    pub fn default_extension(self) -> &'static str {
        match self {
            ResourceKind::Stylesheet | ResourceKind::InlineStyle => "css",
            ResourceKind::Script | ResourceKind::InlineScript => "js",
            ResourceKind::Image => "png",
            ResourceKind::Font => "woff",
            ResourceKind::Other => "bin",
        }
    }

    /// Stem prefix of synthesized names (`main_1.css`, `font_2.woff`).
    pub fn name_prefix(self) -> &'static str {
        match self {
            ResourceKind::Stylesheet | ResourceKind::Script => "main",
            ResourceKind::InlineStyle | ResourceKind::InlineScript => "inline",
            ResourceKind::Image => "image",
            ResourceKind::Font => "font",
            ResourceKind::Other => "asset",
        }
    }

    pub fn is_inline(self) -> bool {
        matches!(self, ResourceKind::InlineStyle | ResourceKind::InlineScript)
    }
}

/// Fixed subdirectories of a normalized project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetDir {
    Css,
    Js,
    Images,
    Fonts,
    Assets,
}

impl AssetDir {
    pub const ALL: [AssetDir; 5] = [
        AssetDir::Css,
        AssetDir::Js,
        AssetDir::Images,
        AssetDir::Fonts,
        AssetDir::Assets,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AssetDir::Css => "css",
            AssetDir::Js => "js",
            AssetDir::Images => "images",
            AssetDir::Fonts => "fonts",
            AssetDir::Assets => "assets",
        }
    }
}

/// Where a reference lives inside the document it was extracted from.
///
/// All ranges are byte offsets into that document's text, fixed at
/// extraction time so rewriting never has to re-scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// The value of an attribute or a CSS `url()`/`@import` token.
    Span(Range<usize>),
    /// A whole `<style>` or `<script>` element together with the text of its
    /// start-tag attributes and its body.
    Element {
        element: Range<usize>,
        attrs: Range<usize>,
        body: Range<usize>,
    },
}

impl Locator {
    /// Range replaced when this reference is rewritten.
    pub fn span(&self) -> Range<usize> {
        match self {
            Locator::Span(span) => span.clone(),
            Locator::Element { element, .. } => element.clone(),
        }
    }

    pub(crate) fn shifted(self, offset: usize) -> Self {
        let shift = |r: Range<usize>| (r.start + offset)..(r.end + offset);
        match self {
            Locator::Span(span) => Locator::Span(shift(span)),
            Locator::Element {
                element,
                attrs,
                body,
            } => Locator::Element {
                element: shift(element),
                attrs: shift(attrs),
                body: shift(body),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Text as written in the document. For inline blocks this is the body.
    pub raw: String,
    /// Canonical absolute URL, or `None` for data URIs, fragments, non-HTTP
    /// schemes and inline blocks.
    pub resolved: Option<String>,
    pub kind: ResourceKind,
    pub origin: Locator,
}
