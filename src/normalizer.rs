use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::NormalizerConfig;
use crate::css_parser::extract_css;
use crate::downloader::{CancelToken, Fetcher, ReqwestClient, SharedClient};
use crate::error::{FetchFailure, NormalizeError, TransportError};
use crate::file_manager::{relative_href, Project, INDEX_FILE};
use crate::html_parser::extract_html;
use crate::reference::{AssetDir, Locator, Reference, ResourceKind};
use crate::registry::{EntryState, Registry, RegistryEntry};
use crate::report::Report;
use crate::rewriter::{self, Context, Edit, LocalView};
use crate::url_canon;

/// An inline `<style>`/`<script>` block moved out into its own file.
struct InlineFile {
    kind: ResourceKind,
    local_path: String,
    element: Range<usize>,
    attrs: Range<usize>,
    body: Range<usize>,
    /// `url()`s of an inline style, with spans relative to the body.
    css: Vec<Reference>,
}

impl InlineFile {
    /// Element that takes the block's place in the page.
    fn replacement_tag(&self, html: &str) -> String {
        let href = relative_href(INDEX_FILE, &self.local_path);
        let href = html_escape::encode_double_quoted_attribute(&href);
        let attrs = html[self.attrs.clone()].trim_end().trim_end_matches('/');
        match self.kind {
            ResourceKind::InlineScript => format!(r#"<script{} src="{}"></script>"#, attrs, href),
            _ => format!(r#"<link rel="stylesheet" href="{}"{}>"#, href, attrs),
        }
    }

    /// The style's references addressed inside the page instead of the body.
    fn css_in_page(&self) -> Vec<Reference> {
        self.css
            .iter()
            .cloned()
            .map(|r| Reference {
                origin: r.origin.shifted(self.body.start),
                ..r
            })
            .collect()
    }
}

#[derive(Default)]
struct PageScan {
    references: Vec<Reference>,
    inline: Vec<InlineFile>,
    round_one: Vec<String>,
}

/// Acquires every resolvable reference, queueing the URLs this caller won.
fn register(registry: &Registry, references: &[Reference], queue: &mut Vec<String>) {
    for reference in references {
        match &reference.resolved {
            Some(url) => {
                let (_, is_new) = registry.acquire(url, reference.kind);
                if is_new {
                    queue.push(url.clone());
                }
            }
            None => debug!(raw = %reference.raw, "left verbatim"),
        }
    }
}

fn scan_page(html: &str, base_url: &str, registry: &Registry) -> PageScan {
    let mut scan = PageScan::default();

    for reference in extract_html(html, base_url) {
        match &reference.origin {
            Locator::Element {
                element,
                attrs,
                body,
            } if reference.kind.is_inline() => {
                let css: Vec<Reference> = match reference.kind {
                    ResourceKind::InlineStyle => extract_css(&reference.raw, base_url).collect(),
                    _ => Vec::new(),
                };
                register(registry, &css, &mut scan.round_one);
                scan.inline.push(InlineFile {
                    kind: reference.kind,
                    local_path: registry.claim_inline(reference.kind),
                    element: element.clone(),
                    attrs: attrs.clone(),
                    body: body.clone(),
                    css,
                });
            }
            _ => register(registry, std::slice::from_ref(&reference), &mut scan.round_one),
        }
        scan.references.push(reference);
    }

    scan
}

fn is_stylesheet(entry: &RegistryEntry) -> bool {
    entry.state == EntryState::Fetched
        && (entry.kind == ResourceKind::Stylesheet
            || entry
                .content_type
                .as_deref()
                .and_then(url_canon::classify_content_type)
                == Some(ResourceKind::Stylesheet))
}

fn entry_text(entry: &RegistryEntry) -> String {
    String::from_utf8_lossy(entry.content.as_deref().unwrap_or_default()).into_owned()
}

/// Second extraction pass over the stylesheets fetched in round one.
fn scan_stylesheets(
    registry: &Registry,
    round_one: &[String],
) -> (HashMap<String, Vec<Reference>>, Vec<String>) {
    let mut parsed = HashMap::new();
    let mut round_two = Vec::new();

    for url in round_one {
        let Some(entry) = registry.get(url).filter(is_stylesheet) else {
            continue;
        };
        let text = entry_text(&entry);
        let references: Vec<Reference> = extract_css(&text, url).collect();
        register(registry, &references, &mut round_two);
        parsed.insert(url.clone(), references);
    }

    (parsed, round_two)
}

/// Single-threaded write phase, run after the last fetch round has joined.
struct ProjectWriter<'a> {
    project: &'a Project,
    view: LocalView,
    write_failures: HashMap<String, String>,
    downloaded: usize,
}

impl<'a> ProjectWriter<'a> {
    fn save_entry(&mut self, entry: &RegistryEntry, content: &[u8]) {
        match self.project.save_file(&entry.local_path, content) {
            Ok(path) => {
                self.downloaded += 1;
                info!(url = %entry.canonical_url, path = ?path, "saved");
            }
            Err(error) => {
                warn!(url = %entry.canonical_url, %error, "failed to write resource");
                self.view.mark_unavailable(&entry.canonical_url);
                self.write_failures.insert(
                    entry.canonical_url.clone(),
                    FetchFailure::Write(error.to_string()).to_string(),
                );
            }
        }
    }
}

/// Drives one normalization run: extract, fetch twice, write, rewrite.
///
/// The normalizer is reusable; every call to [`run`](StructureNormalizer::run)
/// gets its own registry and naming counters.
pub struct StructureNormalizer {
    config: NormalizerConfig,
    client: SharedClient,
    cancel: CancelToken,
}

impl StructureNormalizer {
    pub fn new(config: NormalizerConfig, client: SharedClient) -> Self {
        Self {
            config,
            client,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_reqwest(config: NormalizerConfig) -> Result<Self, NormalizeError> {
        let client = ReqwestClient::new(&config.user_agent)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Handle for stopping the run from outside. Cancelling stops new fetches;
    /// whatever was already fetched is still written.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn run(&self, target: &str, output_root: &Path) -> Result<Report, NormalizeError> {
        self.config.validate()?;
        let target = url_canon::normalize_target(target)?;
        let deadline = self.config.run_timeout().map(|limit| Instant::now() + limit);
        let fetcher = Fetcher::new(
            Arc::clone(&self.client),
            self.config.concurrency,
            self.config.timeout(),
            self.cancel.clone(),
        )
        .with_deadline(deadline);
        let project = Project::create(output_root, &target)?;

        info!(url = %target, "fetching entry page");
        let html = self.fetch_entry_page(&target).await?;
        let registry = Arc::new(Registry::new(self.config.naming));

        let page = scan_page(&html, &target, &registry);
        let third_party = page
            .round_one
            .iter()
            .filter(|url| !url_canon::same_domain(url, project.domain()))
            .count();
        info!(
            references = page.references.len(),
            resources = page.round_one.len(),
            third_party,
            inline = page.inline.len(),
            "extracted page references"
        );
        fetcher.run_round(&registry, &page.round_one).await;

        let (stylesheets, round_two) = scan_stylesheets(&registry, &page.round_one);
        info!(
            stylesheets = stylesheets.len(),
            resources = round_two.len(),
            "extracted stylesheet references"
        );
        fetcher.run_round(&registry, &round_two).await;

        let report = self.write_project(&project, &registry, &html, page, stylesheets)?;
        info!(
            downloaded = report.downloaded_count,
            failed = report.failed_count(),
            project = ?report.project_dir,
            "normalization complete"
        );
        Ok(report)
    }

    async fn fetch_entry_page(&self, url: &str) -> Result<String, NormalizeError> {
        let failed = |reason: FetchFailure| NormalizeError::EntryPage {
            url: url.to_string(),
            reason,
        };
        if self.cancel.is_cancelled() {
            return Err(failed(FetchFailure::Cancelled));
        }

        let timeout = self.config.timeout();
        let response = match tokio::time::timeout(timeout, self.client.get(url, timeout)).await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => return Err(failed(error.into())),
            Err(_) => return Err(failed(TransportError::Timeout.into())),
        };
        if !response.is_success() {
            return Err(failed(FetchFailure::Status(response.status)));
        }

        Ok(String::from_utf8_lossy(&response.body).into_owned())
    }

    fn write_project(
        &self,
        project: &Project,
        registry: &Registry,
        html: &str,
        page: PageScan,
        mut stylesheets: HashMap<String, Vec<Reference>>,
    ) -> Result<Report, NormalizeError> {
        let snapshot = registry.snapshot();
        let (css, other): (Vec<&RegistryEntry>, Vec<&RegistryEntry>) = snapshot
            .iter()
            .filter(|e| e.state == EntryState::Fetched)
            .partition(|e| is_stylesheet(e));

        let mut writer = ProjectWriter {
            project,
            view: LocalView::new(snapshot.clone()),
            write_failures: HashMap::new(),
            downloaded: 0,
        };

        for entry in other {
            writer.save_entry(entry, entry.content.as_deref().unwrap_or_default());
        }

        // Stylesheets from round two were never scanned; their references are
        // extracted here only to be pointed somewhere that resolves.
        for entry in css {
            let text = entry_text(entry);
            let references = stylesheets
                .remove(&entry.canonical_url)
                .unwrap_or_else(|| extract_css(&text, &entry.canonical_url).collect());
            let edits = rewriter::reference_edits(&references, &writer.view, &entry.local_path, Context::Css);
            let rewritten = rewriter::apply_edits(&text, edits);
            writer.save_entry(entry, rewritten.as_bytes());
        }

        let mut report = Report::new(project.root_dir().to_path_buf());
        report.downloaded_count = writer.downloaded;
        for entry in snapshot.iter() {
            if let Some(reason) = writer.write_failures.get(&entry.canonical_url) {
                report.record_failure(entry.canonical_url.as_str(), reason.as_str());
            } else if entry.state == EntryState::Failed {
                let reason = entry.failure_reason.as_deref().unwrap_or("unknown error");
                report.record_failure(entry.canonical_url.as_str(), reason);
            }
        }

        let mut edits = rewriter::reference_edits(&page.references, &writer.view, INDEX_FILE, Context::Html);
        for inline in &page.inline {
            let body = &html[inline.body.clone()];
            let content = match inline.kind {
                ResourceKind::InlineStyle => {
                    let css_edits =
                        rewriter::reference_edits(&inline.css, &writer.view, &inline.local_path, Context::Css);
                    rewriter::apply_edits(body, css_edits)
                }
                _ => body.to_string(),
            };

            match project.save_file(&inline.local_path, content.as_bytes()) {
                Ok(path) => {
                    info!(path = ?path, "saved inline block");
                    edits.push(Edit {
                        span: inline.element.clone(),
                        replacement: inline.replacement_tag(html),
                    });
                }
                Err(error) => {
                    warn!(path = %inline.local_path, %error, "failed to write inline block, keeping it inline");
                    report.record_failure(
                        inline.local_path.as_str(),
                        FetchFailure::Write(error.to_string()).to_string(),
                    );
                    edits.extend(rewriter::reference_edits(
                        &inline.css_in_page(),
                        &writer.view,
                        INDEX_FILE,
                        Context::Css,
                    ));
                }
            }
        }

        let rewritten = rewriter::apply_edits(html, edits);
        project
            .save_file(INDEX_FILE, rewritten.as_bytes())
            .map_err(|source| NormalizeError::Io {
                path: project.index_path(),
                source,
            })?;
        info!(path = ?project.index_path(), "saved page");

        for dir in AssetDir::ALL {
            report
                .files_by_dir
                .insert(dir.as_str().to_string(), project.count_files(dir));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{HttpResponse, MockHttpClient};
    use std::fs;
    use tempfile::tempdir;

    fn ok(body: &'static str, content_type: &'static str) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: body.as_bytes().to_vec(),
            content_type: Some(content_type.to_string()),
        }
    }

    #[tokio::test]
    async fn test_duplicate_stylesheet_fetched_once() {
        let mut client = MockHttpClient::new();
        client
            .expect_get()
            .withf(|url, _| url.ends_with("example.com/"))
            .times(1)
            .returning(|_, _| {
                Box::pin(async {
                    Ok(ok(
                        r#"<html><head><link rel="stylesheet" href="/a.css"><link rel="stylesheet" href="/a.css"></head></html>"#,
                        "text/html",
                    ))
                })
            });
        client
            .expect_get()
            .withf(|url, _| url.ends_with("/a.css"))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(ok("body { color: red; }", "text/css")) }));

        let temp_dir = tempdir().unwrap();
        let normalizer = StructureNormalizer::new(NormalizerConfig::default(), Arc::new(client));
        let report = normalizer.run("https://example.com", temp_dir.path()).await.unwrap();

        assert_eq!(report.downloaded_count, 1);
        assert!(report.failed_urls.is_empty());
        assert_eq!(report.files_by_dir["css"], 1);

        let index = fs::read_to_string(report.project_dir.join("index.html")).unwrap();
        assert_eq!(index.matches(r#"href="css/main_1.css""#).count(), 2);
    }

    #[tokio::test]
    async fn test_inline_script_moved_out() {
        let mut client = MockHttpClient::new();
        client.expect_get().times(1).returning(|_, _| {
            Box::pin(async {
                Ok(ok(
                    r#"<body><script type="module">init();</script><script type="application/ld+json">{}</script></body>"#,
                    "text/html",
                ))
            })
        });

        let temp_dir = tempdir().unwrap();
        let normalizer = StructureNormalizer::new(NormalizerConfig::default(), Arc::new(client));
        let report = normalizer.run("example.com", temp_dir.path()).await.unwrap();

        let index = fs::read_to_string(report.project_dir.join("index.html")).unwrap();
        assert!(index.contains(r#"<script type="module" src="js/inline.js"></script>"#));
        assert!(index.contains(r#"<script type="application/ld+json">{}</script>"#));
        assert_eq!(
            fs::read_to_string(report.project_dir.join("js").join("inline.js")).unwrap(),
            "init();"
        );
        assert_eq!(report.downloaded_count, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut client = MockHttpClient::new();
        client.expect_get().never();

        let temp_dir = tempdir().unwrap();
        let normalizer = StructureNormalizer::new(NormalizerConfig::default(), Arc::new(client));
        normalizer.cancel_token().cancel();

        let result = normalizer.run("https://example.com", temp_dir.path()).await;
        assert!(matches!(
            result,
            Err(NormalizeError::EntryPage {
                reason: FetchFailure::Cancelled,
                ..
            })
        ));
        assert!(temp_dir.path().join("example.com").join("css").is_dir());
        assert!(!temp_dir.path().join("example.com").join("index.html").exists());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut client = MockHttpClient::new();
        client.expect_get().never();

        let config = NormalizerConfig {
            concurrency: 0,
            ..NormalizerConfig::default()
        };
        let temp_dir = tempdir().unwrap();
        let normalizer = StructureNormalizer::new(config, Arc::new(client));

        let result = normalizer.run("https://example.com", temp_dir.path()).await;
        assert!(matches!(result, Err(NormalizeError::Config(_))));
    }
}
