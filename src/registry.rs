use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::NamingPolicy;
use crate::reference::ResourceKind;
use crate::url_canon;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryState {
    Pending,
    Fetched,
    Failed,
}

/// One distinct resource of a run, keyed by canonical URL.
///
/// `local_path` is relative to the project root and fixed when the entry is
/// created.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub canonical_url: String,
    pub kind: ResourceKind,
    pub state: EntryState,
    pub local_path: String,
    pub content: Option<Arc<[u8]>>,
    pub content_type: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, RegistryEntry>,
    order: Vec<String>,
    sequences: HashMap<ResourceKind, usize>,
    claimed: HashSet<String>,
}

impl RegistryInner {
    fn next_sequence(&mut self, kind: ResourceKind) -> usize {
        let seq = self.sequences.entry(kind).or_insert(0);
        *seq += 1;
        *seq
    }

    fn assign_path(&mut self, canonical_url: &str, kind: ResourceKind, naming: NamingPolicy) -> String {
        let dir = kind.asset_dir().as_str();

        if naming == NamingPolicy::PreferOriginal {
            if let Some(name) = url_canon::original_name(canonical_url) {
                let path = format!("{}/{}", dir, name);
                if self.claimed.insert(path.clone()) {
                    return path;
                }
            }
        }

        loop {
            let seq = self.next_sequence(kind);
            let path = format!("{}/{}", dir, url_canon::safe_name(canonical_url, kind, seq));
            if self.claimed.insert(path.clone()) {
                return path;
            }
        }
    }

    fn finish(&mut self, url: &str, update: impl FnOnce(&mut RegistryEntry)) -> bool {
        match self.entries.get_mut(url) {
            Some(entry) if entry.state == EntryState::Pending => {
                update(entry);
                true
            }
            _ => false,
        }
    }
}

/// Concurrency-safe table of every resource discovered in a run.
///
/// All mutation goes through [`acquire`](Registry::acquire),
/// [`mark_fetched`](Registry::mark_fetched) and
/// [`mark_failed`](Registry::mark_failed), each a short critical section.
/// The registry also owns the name space of the project directories, so
/// inline files and downloaded files can never collide.
pub struct Registry {
    inner: Mutex<RegistryInner>,
    naming: NamingPolicy,
}

impl Registry {
    pub fn new(naming: NamingPolicy) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            naming,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Single-flight get-or-create.
    ///
    /// Returns `true` only to the first caller for `canonical_url`; that
    /// caller is responsible for scheduling the fetch.
    pub fn acquire(&self, canonical_url: &str, kind: ResourceKind) -> (RegistryEntry, bool) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get(canonical_url) {
            return (entry.clone(), false);
        }

        let local_path = inner.assign_path(canonical_url, kind, self.naming);
        let entry = RegistryEntry {
            canonical_url: canonical_url.to_string(),
            kind,
            state: EntryState::Pending,
            local_path,
            content: None,
            content_type: None,
            failure_reason: None,
        };
        inner.order.push(canonical_url.to_string());
        inner.entries.insert(canonical_url.to_string(), entry.clone());
        (entry, true)
    }

    /// Claims the next free inline file name in the kind's directory:
    /// `css/inline.css`, then `css/inline_2.css`, and so on.
    pub fn claim_inline(&self, kind: ResourceKind) -> String {
        let mut inner = self.lock();
        let dir = kind.asset_dir().as_str();
        let ext = kind.default_extension();
        loop {
            let path = match inner.next_sequence(kind) {
                1 => format!("{}/inline.{}", dir, ext),
                n => format!("{}/inline_{}.{}", dir, n, ext),
            };
            if inner.claimed.insert(path.clone()) {
                return path;
            }
        }
    }

    /// Pending → Fetched. No-op (returns `false`) on a terminal entry.
    pub fn mark_fetched(&self, url: &str, content: Vec<u8>, content_type: Option<String>) -> bool {
        self.lock().finish(url, |entry| {
            entry.state = EntryState::Fetched;
            entry.content = Some(content.into());
            entry.content_type = content_type;
        })
    }

    /// Pending → Failed. No-op (returns `false`) on a terminal entry.
    pub fn mark_failed(&self, url: &str, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.lock().finish(url, |entry| {
            entry.state = EntryState::Failed;
            entry.failure_reason = Some(reason);
        })
    }

    pub fn get(&self, url: &str) -> Option<RegistryEntry> {
        self.lock().entries.get(url).cloned()
    }

    pub fn state(&self, url: &str) -> Option<EntryState> {
        self.lock().entries.get(url).map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only copy of every entry in discovery order. Content is shared,
    /// not copied.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        let entries: Vec<RegistryEntry> = inner
            .order
            .iter()
            .filter_map(|url| inner.entries.get(url).cloned())
            .collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.canonical_url.clone(), i))
            .collect();
        Snapshot { entries, index }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<RegistryEntry>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    pub fn get(&self, url: &str) -> Option<&RegistryEntry> {
        self.index.get(url).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_single_flight() {
        let registry = Registry::new(NamingPolicy::Sequential);
        let url = "https://example.com/a.css";

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| registry.acquire(url, ResourceKind::Stylesheet).1))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });

        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(url).unwrap().local_path, "css/main_1.css");
    }

    #[test]
    fn test_sequential_names_per_kind() {
        let registry = Registry::new(NamingPolicy::Sequential);

        let (a, _) = registry.acquire("https://example.com/a.css", ResourceKind::Stylesheet);
        let (b, _) = registry.acquire("https://cdn.example.com/a.css", ResourceKind::Stylesheet);
        let (img, _) = registry.acquire("https://example.com/logo.svg", ResourceKind::Image);
        let (font, _) = registry.acquire("https://example.com/font.woff", ResourceKind::Font);
        let (again, is_new) = registry.acquire("https://example.com/a.css", ResourceKind::Image);

        assert_eq!(a.local_path, "css/main_1.css");
        assert_eq!(b.local_path, "css/main_2.css");
        assert_eq!(img.local_path, "images/image_1.svg");
        assert_eq!(font.local_path, "fonts/font_1.woff");
        assert!(!is_new);
        assert_eq!(again.local_path, a.local_path);
        assert_eq!(again.kind, ResourceKind::Stylesheet);
    }

    #[test]
    fn test_prefer_original_avoids_collisions() {
        let registry = Registry::new(NamingPolicy::PreferOriginal);

        let (first, _) = registry.acquire("https://example.com/theme/style.css", ResourceKind::Stylesheet);
        let (second, _) = registry.acquire("https://cdn.example.com/style.css", ResourceKind::Stylesheet);
        let (odd, _) = registry.acquire("https://example.com/api/css?x=1", ResourceKind::Stylesheet);

        assert_eq!(first.local_path, "css/style.css");
        assert_eq!(second.local_path, "css/main_1.css");
        assert_eq!(odd.local_path, "css/main_2.css");
    }

    #[test]
    fn test_inline_claims_share_name_space() {
        let registry = Registry::new(NamingPolicy::PreferOriginal);

        let (remote, _) = registry.acquire("https://example.com/inline.css", ResourceKind::Stylesheet);
        assert_eq!(remote.local_path, "css/inline.css");

        assert_eq!(registry.claim_inline(ResourceKind::InlineStyle), "css/inline_2.css");
        assert_eq!(registry.claim_inline(ResourceKind::InlineStyle), "css/inline_3.css");
        assert_eq!(registry.claim_inline(ResourceKind::InlineScript), "js/inline.js");
    }

    #[test]
    fn test_terminal_transitions_are_idempotent() {
        let registry = Registry::new(NamingPolicy::Sequential);
        let url = "https://example.com/broken.png";
        registry.acquire(url, ResourceKind::Image);

        assert!(registry.mark_failed(url, "404"));
        assert!(!registry.mark_failed(url, "500"));
        assert!(!registry.mark_fetched(url, b"late".to_vec(), None));
        assert!(!registry.mark_failed("https://example.com/unknown.png", "404"));

        let entry = registry.get(url).unwrap();
        assert_eq!(entry.state, EntryState::Failed);
        assert_eq!(entry.failure_reason.as_deref(), Some("404"));
        assert!(entry.content.is_none());
    }

    #[test]
    fn test_snapshot_keeps_discovery_order() {
        let registry = Registry::new(NamingPolicy::Sequential);
        registry.acquire("https://example.com/b.js", ResourceKind::Script);
        registry.acquire("https://example.com/a.css", ResourceKind::Stylesheet);
        registry.mark_fetched("https://example.com/a.css", b"body{}".to_vec(), Some("text/css".into()));

        let snapshot = registry.snapshot();
        let urls: Vec<_> = snapshot.iter().map(|e| e.canonical_url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/b.js", "https://example.com/a.css"]);

        let css = snapshot.get("https://example.com/a.css").unwrap();
        assert_eq!(css.state, EntryState::Fetched);
        assert_eq!(css.content.as_deref(), Some(&b"body{}"[..]));
    }
}
