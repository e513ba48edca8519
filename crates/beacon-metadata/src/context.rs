//! Per-service view over the record and its source tree.

use std::fs;
use std::path::{Path, PathBuf};

use beacon_types::ServiceRecord;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::ExtractorConfig;
use crate::error::{MetadataError, MetadataResult};

/// The record being enriched plus the files found under its location.
///
/// The tree is walked once and shared by every step. Paths are relative to
/// the root, sorted, hidden and skipped directories excluded.
pub struct ServiceContext<'a> {
    pub record: &'a ServiceRecord,
    config: &'a ExtractorConfig,
    root: Option<PathBuf>,
    files: Vec<PathBuf>,
}

impl<'a> ServiceContext<'a> {
    pub fn new(record: &'a ServiceRecord, config: &'a ExtractorConfig) -> Self {
        let root = record.location.as_deref().map(PathBuf::from).and_then(|p| {
            if p.is_dir() {
                Some(p)
            } else if p.is_file() {
                p.parent().map(Path::to_path_buf)
            } else {
                None
            }
        });
        let files = root
            .as_deref()
            .map(|r| collect_files(r, config))
            .unwrap_or_default();
        Self {
            record,
            config,
            root,
            files,
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        self.config
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Shallowest file with exactly this name.
    pub fn find(&self, name: &str) -> Option<&Path> {
        self.files
            .iter()
            .filter(|f| file_name(f) == name)
            .min_by_key(|f| f.components().count())
            .map(PathBuf::as_path)
    }

    /// Every file whose name satisfies `pred`.
    pub fn find_all(&self, pred: impl Fn(&str) -> bool) -> Vec<&Path> {
        self.files
            .iter()
            .filter(|f| pred(file_name(f)))
            .map(PathBuf::as_path)
            .collect()
    }

    pub fn code_files(&self) -> Vec<&Path> {
        let extensions = &self.config.code_extensions;
        self.files
            .iter()
            .filter(|f| {
                f.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| extensions.iter().any(|x| x == e))
                    .unwrap_or(false)
            })
            .map(PathBuf::as_path)
            .collect()
    }

    /// Read a file relative to the root, honoring the size limit.
    pub fn read(&self, relative: &Path) -> MetadataResult<String> {
        let root = self.root.as_deref().unwrap_or_else(|| Path::new("."));
        let path = root.join(relative);
        let io = |source| MetadataError::Io {
            path: path.clone(),
            source,
        };
        let size = fs::metadata(&path).map_err(io)?.len();
        if size > self.config.max_file_bytes {
            return Err(MetadataError::TooLarge {
                path: path.clone(),
                size,
                limit: self.config.max_file_bytes,
            });
        }
        fs::read_to_string(&path).map_err(io)
    }
}

pub fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// Forward-slash display form of a relative path.
pub fn display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn collect_files(root: &Path, config: &ExtractorConfig) -> Vec<PathBuf> {
    let walker = WalkDir::new(root)
        .max_depth(config.max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !name.starts_with('.') && !config.skip_dirs.iter().any(|d| *d == name)
        });

    let mut files = Vec::new();
    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
        if files.len() >= config.max_files {
            debug!(root = %root.display(), limit = config.max_files, "File limit reached");
            break;
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::{RawService, ServiceSource};
    use std::fs;

    #[test]
    fn test_collects_hidden_files_but_skips_hidden_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".env"), "A=1").unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/config"), "").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        fs::write(dir.path().join("node_modules/x/index.js"), "").unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/app.js"), "").unwrap();

        let record = ServiceRecord::from(
            RawService::new("x", "node", ServiceSource::Local).with_location(dir.path().to_string_lossy()),
        );
        let config = ExtractorConfig::default();
        let ctx = ServiceContext::new(&record, &config);

        let names: Vec<String> = ctx.files().iter().map(|f| display(f)).collect();
        assert_eq!(names, vec![".env", "src/app.js"]);
        assert_eq!(ctx.code_files().len(), 1);
        assert!(ctx.find(".env").is_some());
    }

    #[test]
    fn test_read_respects_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.txt"), "x".repeat(64)).unwrap();
        let record = ServiceRecord::from(
            RawService::new("x", "node", ServiceSource::Local).with_location(dir.path().to_string_lossy()),
        );
        let config = ExtractorConfig {
            max_file_bytes: 16,
            ..Default::default()
        };
        let ctx = ServiceContext::new(&record, &config);
        assert!(matches!(
            ctx.read(Path::new("big.txt")),
            Err(MetadataError::TooLarge { size: 64, .. })
        ));
    }

    #[test]
    fn test_no_location_means_no_files() {
        let record = ServiceRecord::from(RawService::new("x", "consul-service", ServiceSource::Consul));
        let config = ExtractorConfig::default();
        let ctx = ServiceContext::new(&record, &config);
        assert!(ctx.root().is_none());
        assert!(ctx.files().is_empty());
    }
}
