use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUrl {
    pub url: String,
    pub reason: String,
}

/// Outcome of one run, handed to the caller once the project is written.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub project_dir: PathBuf,
    /// Resources fetched and written to disk. Inline files are not counted.
    pub downloaded_count: usize,
    /// Every resource that could not be localized, in discovery order.
    pub failed_urls: Vec<FailedUrl>,
    /// Files per asset directory after the run.
    pub files_by_dir: BTreeMap<String, usize>,
}

impl Report {
    pub fn new(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            ..Self::default()
        }
    }

    pub fn record_failure(&mut self, url: impl Into<String>, reason: impl Into<String>) {
        self.failed_urls.push(FailedUrl {
            url: url.into(),
            reason: reason.into(),
        });
    }

    pub fn failed_count(&self) -> usize {
        self.failed_urls.len()
    }

    pub fn total_files(&self) -> usize {
        self.files_by_dir.values().sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
