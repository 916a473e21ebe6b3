//! Advisory check for pages whose content is rendered client-side. Nothing
//! in the pipeline reacts to it; the binary only prints a warning.

use select::document::Document;
use select::node::Node;
use select::predicate::{Attr, Name};

const SCRIPT_HEAVY: usize = 5;
const SPARSE_TEXT: usize = 200;

const MOUNT_IDS: [&str; 4] = ["root", "app", "__next", "app-root"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaVerdict {
    pub script_count: usize,
    pub text_len: usize,
    /// Framework markers found in the page.
    pub markers: Vec<String>,
}

impl SpaVerdict {
    pub fn looks_like_spa(&self) -> bool {
        !self.markers.is_empty() || (self.script_count >= SCRIPT_HEAVY && self.text_len < SPARSE_TEXT)
    }
}

fn visible_text_len(node: Node<'_>) -> usize {
    node.descendants()
        .filter_map(|n| {
            let text = n.as_text()?;
            let hidden = n
                .parent()
                .and_then(|p| p.name())
                .map_or(false, |name| matches!(name, "script" | "style" | "noscript" | "template"));
            (!hidden).then(|| text.split_whitespace().map(str::len).sum::<usize>())
        })
        .sum()
}

pub fn inspect(html: &str) -> SpaVerdict {
    let document = Document::from(html);
    let mut markers = Vec::new();

    for id in MOUNT_IDS {
        if document.find(Attr("id", id)).next().is_some() {
            markers.push(format!("#{}", id));
        }
    }
    if document.find(Attr("ng-app", ())).next().is_some() {
        markers.push("[ng-app]".to_string());
    }
    if document.find(Attr("id", "__NEXT_DATA__")).next().is_some() || html.contains("__NEXT_DATA__") {
        markers.push("__NEXT_DATA__".to_string());
    }

    let text_len = document
        .find(Name("body"))
        .next()
        .map(visible_text_len)
        .unwrap_or(0);

    SpaVerdict {
        script_count: document.find(Name("script")).count(),
        text_len,
        markers,
    }
}
