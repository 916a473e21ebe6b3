use clap::Parser;
use std::path::PathBuf;

use crate::config::{NamingPolicy, NormalizerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "site-normalizer",
    about = "Download a web page with all of its resources into a self-contained local project",
    version,
    long_about = "Downloads one page together with every stylesheet, script, image and font it references (including fonts and images referenced from its stylesheets), stores them under css/, js/, images/, fonts/ and assets/, and rewrites every reference to a relative local path."
)]
pub struct NormalizeCommand {
    /// The URL of the page to normalize (https:// is assumed when missing)
    #[arg(required = true)]
    pub url: String,

    /// Directory the project folder is created in
    #[arg(short, long, default_value = "./normalized_sites")]
    pub output_dir: PathBuf,

    /// Maximum concurrent downloads
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: Option<u16>,

    /// Timeout for each request in seconds
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Stop starting new downloads after this many seconds
    #[arg(long)]
    pub run_timeout: Option<u64>,

    /// Keep original file names where they are safe and unique
    #[arg(short = 'k', long)]
    pub keep_names: bool,

    /// User agent string to use for requests
    #[arg(long)]
    pub user_agent: Option<String>,

    /// JSON config file; command line flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the run report as JSON to this file
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl NormalizeCommand {
    /// Applies the flags that were given on top of `base`.
    pub fn apply_to(&self, mut base: NormalizerConfig) -> NormalizerConfig {
        if let Some(concurrency) = self.concurrency {
            base.concurrency = usize::from(concurrency);
        }
        if let Some(timeout) = self.timeout {
            base.timeout_secs = timeout;
        }
        if self.run_timeout.is_some() {
            base.run_timeout_secs = self.run_timeout;
        }
        if self.keep_names {
            base.naming = NamingPolicy::PreferOriginal;
        }
        if let Some(user_agent) = &self.user_agent {
            base.user_agent = user_agent.clone();
        }
        base
    }
}
