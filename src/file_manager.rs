use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::NormalizeError;
use crate::reference::AssetDir;
use crate::url_canon;

pub const INDEX_FILE: &str = "index.html";

/// The output tree of one run: `<root>/<project>/` with its fixed asset
/// subdirectories.
#[derive(Debug, Clone)]
pub struct Project {
    root_dir: PathBuf,
    domain: String,
}

impl Project {
    /// Creates `<output_root>/<project name>/` and every asset directory.
    pub fn create(output_root: &Path, target_url: &str) -> Result<Self, NormalizeError> {
        let root_dir = output_root.join(url_canon::project_name(target_url));
        let domain = url_canon::domain_of(target_url).unwrap_or_default();

        for dir in AssetDir::ALL {
            let path = root_dir.join(dir.as_str());
            fs::create_dir_all(&path).map_err(|source| NormalizeError::Io { path, source })?;
        }

        info!(root = ?root_dir, domain = %domain, "created project structure");
        Ok(Self { root_dir, domain })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn asset_dir(&self, dir: AssetDir) -> PathBuf {
        self.root_dir.join(dir.as_str())
    }

    pub fn index_path(&self) -> PathBuf {
        self.resolve(INDEX_FILE)
    }

    /// Absolute path of a project-relative `/`-separated path.
    pub fn resolve(&self, local_path: &str) -> PathBuf {
        let mut path = self.root_dir.clone();
        for segment in local_path.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    pub fn save_file(&self, local_path: &str, content: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.resolve(local_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Number of files directly inside an asset directory.
    pub fn count_files(&self, dir: AssetDir) -> usize {
        fs::read_dir(self.asset_dir(dir))
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().is_file())
                    .count()
            })
            .unwrap_or(0)
    }
}

/// `/`-separated path from the directory of `from_document` to `target`,
/// both relative to the project root.
pub fn relative_href(from_document: &str, target: &str) -> String {
    let base = Path::new(from_document).parent().unwrap_or_else(|| Path::new(""));
    let relative = pathdiff::diff_paths(target, base).unwrap_or_else(|| PathBuf::from(target));
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_project_layout() {
        let temp_dir = tempdir().unwrap();
        let project = Project::create(temp_dir.path(), "https://www.example.com/landing").unwrap();

        assert_eq!(project.root_dir(), temp_dir.path().join("example.com"));
        assert_eq!(project.domain(), "www.example.com");
        for dir in ["css", "js", "images", "fonts", "assets"] {
            assert!(project.root_dir().join(dir).is_dir(), "missing {}", dir);
        }
        assert_eq!(project.index_path(), project.root_dir().join("index.html"));
    }

    #[test]
    fn test_save_file() {
        let temp_dir = tempdir().unwrap();
        let project = Project::create(temp_dir.path(), "https://example.com/").unwrap();

        let saved = project.save_file("fonts/font_1.woff", b"wOFF").unwrap();
        assert_eq!(saved, project.root_dir().join("fonts").join("font_1.woff"));
        assert_eq!(fs::read(&saved).unwrap(), b"wOFF");
        assert_eq!(project.count_files(AssetDir::Fonts), 1);
        assert_eq!(project.count_files(AssetDir::Css), 0);
    }

    #[test]
    fn test_relative_href() {
        let test_cases = vec![
            ("index.html", "css/main_1.css", "css/main_1.css"),
            ("css/main_1.css", "fonts/font_1.woff", "../fonts/font_1.woff"),
            ("css/inline.css", "images/image_2.png", "../images/image_2.png"),
            ("css/main_1.css", "css/main_2.css", "main_2.css"),
        ];

        for (from, to, expected) in test_cases {
            assert_eq!(relative_href(from, to), expected, "Failed for {} -> {}", from, to);
        }
    }

    #[test]
    fn test_relative_href_resolves_back_to_target() {
        let root = url::Url::parse("file:///project/").unwrap();
        let documents = ["index.html", "css/main_1.css", "css/inline.css", "js/inline.js"];
        let targets = ["css/main_1.css", "fonts/font_1.woff", "images/image_3.png", "assets/asset_1.mp4"];

        for document in documents {
            let base = root.join(document).unwrap();
            for target in targets {
                let href = relative_href(document, target);
                assert_eq!(base.join(&href).unwrap(), root.join(target).unwrap(), "{} -> {}", document, href);
            }
        }
    }
}
