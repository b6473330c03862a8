//! File discovery and classification.
//!
//! Walks a project root with ignore rules applied, assigns each candidate
//! a [`FileKind`] and a language tag, and reports truncation instead of
//! failing when the configured caps are hit. Pure discovery: nothing here
//! reads file contents.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use atlas_config::ScanConfig;

use crate::graph::FileKind;

/// Errors that can occur during file discovery. Unreadable entries are
/// skipped and counted, not raised.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Project root does not exist: {0}")]
    MissingRoot(PathBuf),
}

/// A discovered file, classified but not yet read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFile {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the project root, with forward slashes.
    pub rel_path: String,
    pub kind: FileKind,
    pub language: String,
    pub size_bytes: u64,
}

/// Ordered discovery result for one scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanManifest {
    pub files: Vec<CandidateFile>,
    /// True when `max_files` or `max_depth` cut the walk short.
    pub truncated: bool,
    /// Files skipped by ignore rules or walk errors.
    pub skipped: usize,
}

/// Classifies files under a project root.
pub struct Classifier {
    config: ScanConfig,
}

impl Classifier {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Walk the root and classify every candidate file, in sorted order.
    ///
    /// Symlinks are not followed, so cycles cannot occur. Hitting the
    /// file-count cap sets `truncated` rather than erroring.
    pub fn scan_root(&self, root: &Path) -> Result<ScanManifest, ClassifierError> {
        if !root.exists() {
            return Err(ClassifierError::MissingRoot(root.to_path_buf()));
        }

        let ignore_patterns = self.config.ignore_patterns.clone();
        let walker = WalkBuilder::new(root)
            .follow_links(false)
            .max_depth(Some(self.config.max_depth))
            .git_ignore(self.config.respect_gitignore)
            .git_global(false)
            .hidden(false)
            .filter_entry(move |entry| {
                let name = entry.file_name().to_string_lossy();
                !ignore_patterns.iter().any(|p| pattern_matches(p, &name))
            })
            .build();

        let mut manifest = ScanManifest::default();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    manifest.skipped += 1;
                    continue;
                }
            };

            let is_file = entry
                .file_type()
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            if manifest.files.len() >= self.config.max_files {
                debug!(
                    "File cap of {} reached, truncating scan",
                    self.config.max_files
                );
                manifest.truncated = true;
                break;
            }

            let path = entry.path().to_path_buf();
            let rel_path = relative_path(root, &path);
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);

            manifest.files.push(CandidateFile {
                kind: classify_kind(&rel_path),
                language: detect_language(&rel_path),
                path,
                rel_path,
                size_bytes,
            });
        }

        // Deterministic ordering regardless of filesystem iteration order.
        manifest.files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

        debug!(
            "Classified {} files under {:?} ({} skipped)",
            manifest.files.len(),
            root,
            manifest.skipped
        );
        Ok(manifest)
    }

    /// Classify a single known path (incremental scans).
    pub fn classify_path(&self, root: &Path, path: &Path) -> Option<CandidateFile> {
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let rel_path = relative_path(root, path);
        Some(CandidateFile {
            kind: classify_kind(&rel_path),
            language: detect_language(&rel_path),
            path: path.to_path_buf(),
            rel_path,
            size_bytes: metadata.len(),
        })
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Minimal glob matching for ignore patterns: a leading `*` matches any
/// prefix, otherwise the name must match exactly.
fn pattern_matches(pattern: &str, name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else {
        name == pattern
    }
}

/// Infer the file kind from path segments and extension.
pub fn classify_kind(rel_path: &str) -> FileKind {
    let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    let lower = file_name.to_lowercase();
    let stem = lower.split('.').next().unwrap_or(&lower);

    if is_test_path(rel_path, &lower) {
        return FileKind::Test;
    }

    if matches!(
        lower.as_str(),
        "package.json"
            | "cargo.toml"
            | "pyproject.toml"
            | "go.mod"
            | "tsconfig.json"
            | "makefile"
            | "dockerfile"
            | ".env"
    ) || matches!(
        extension(&lower),
        Some("toml" | "yaml" | "yml" | "ini" | "cfg" | "conf")
    ) || stem.starts_with(".eslintrc")
        || stem.starts_with(".prettierrc")
    {
        return FileKind::Config;
    }

    if matches!(extension(&lower), Some("md" | "rst" | "txt" | "adoc"))
        || rel_path.starts_with("docs/")
        || rel_path.contains("/docs/")
    {
        return FileKind::Documentation;
    }

    if matches!(
        lower.as_str(),
        "index.ts" | "index.tsx" | "index.js" | "index.jsx" | "mod.rs" | "lib.rs" | "__init__.py"
    ) {
        return FileKind::Module;
    }

    FileKind::File
}

fn is_test_path(rel_path: &str, file_name: &str) -> bool {
    if rel_path.split('/').any(|seg| {
        matches!(seg, "tests" | "test" | "__tests__" | "spec")
    }) {
        return true;
    }
    let stem = file_name.split('.').next().unwrap_or(file_name);
    file_name.contains(".test.")
        || file_name.contains(".spec.")
        || stem.starts_with("test_")
        || stem.ends_with("_test")
}

fn extension(file_name: &str) -> Option<&str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Detect language from file extension, falling back to "unknown".
pub fn detect_language(rel_path: &str) -> String {
    let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    let lang = match extension(&file_name.to_lowercase()) {
        Some("rs") => "rust",
        Some("py") => "python",
        Some("js" | "jsx" | "mjs" | "cjs") => "javascript",
        Some("ts" | "tsx") => "typescript",
        Some("go") => "go",
        Some("json") => "json",
        Some("toml") => "toml",
        Some("yaml" | "yml") => "yaml",
        Some("md") => "markdown",
        Some("html") => "html",
        Some("css") => "css",
        Some("sh" | "bash") => "shell",
        _ => "unknown",
    };
    lang.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn classifies_kinds_from_paths() {
        assert_eq!(classify_kind("src/auth.ts"), FileKind::File);
        assert_eq!(classify_kind("src/auth.test.ts"), FileKind::Test);
        assert_eq!(classify_kind("tests/helpers.py"), FileKind::Test);
        assert_eq!(classify_kind("package.json"), FileKind::Config);
        assert_eq!(classify_kind("settings.yaml"), FileKind::Config);
        assert_eq!(classify_kind("README.md"), FileKind::Documentation);
        assert_eq!(classify_kind("src/index.ts"), FileKind::Module);
        assert_eq!(classify_kind("src/mod.rs"), FileKind::Module);
    }

    #[test]
    fn detects_languages_with_unknown_fallback() {
        assert_eq!(detect_language("a.rs"), "rust");
        assert_eq!(detect_language("a.tsx"), "typescript");
        assert_eq!(detect_language("a.xyz"), "unknown");
        assert_eq!(detect_language("Makefile"), "unknown");
    }

    #[test]
    fn scan_skips_ignored_directories() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), "node_modules/pkg/index.js", "x");
        write(dir.path(), "target/debug/junk.rs", "x");

        let classifier = Classifier::new(ScanConfig::default());
        let manifest = classifier.scan_root(dir.path()).unwrap();

        let paths: Vec<_> = manifest.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, ["src/main.rs"]);
        assert!(!manifest.truncated);
    }

    #[test]
    fn scan_reports_truncation_at_cap() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            write(dir.path(), &format!("src/f{i}.rs"), "fn f() {}");
        }

        let config = ScanConfig {
            max_files: 3,
            ..ScanConfig::default()
        };
        let manifest = Classifier::new(config).scan_root(dir.path()).unwrap();
        assert_eq!(manifest.files.len(), 3);
        assert!(manifest.truncated);
    }

    #[test]
    fn scan_output_is_sorted() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/zeta.rs", "x");
        write(dir.path(), "src/alpha.rs", "x");

        let manifest = Classifier::new(ScanConfig::default())
            .scan_root(dir.path())
            .unwrap();
        let paths: Vec<_> = manifest.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, ["src/alpha.rs", "src/zeta.rs"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let classifier = Classifier::new(ScanConfig::default());
        assert!(classifier.scan_root(Path::new("/no/such/dir")).is_err());
    }
}
