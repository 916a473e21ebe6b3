pub mod cli;
pub mod config;
pub mod css_parser;
pub mod downloader;
pub mod error;
pub mod file_manager;
pub mod html_parser;
pub mod normalizer;
pub mod reference;
pub mod registry;
pub mod report;
pub mod rewriter;
pub mod spa;
pub mod url_canon;

// Re-export main types for convenience
pub use cli::NormalizeCommand;
pub use config::{NamingPolicy, NormalizerConfig};
pub use css_parser::{extract_css, CssReferences};
pub use downloader::{CancelToken, Fetcher, HttpClient, HttpResponse, ReqwestClient, SharedClient};
pub use error::{ConfigError, FetchFailure, NormalizeError, TransportError, UnresolvableReference};
pub use file_manager::Project;
pub use html_parser::{extract_html, HtmlReferences};
pub use normalizer::StructureNormalizer;
pub use reference::{AssetDir, Locator, Reference, ResourceKind};
pub use registry::{EntryState, Registry, RegistryEntry};
pub use report::{FailedUrl, Report};
