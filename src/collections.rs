//! Saved benchmark configurations.
//!
//! Tests live on disk as `<base>/<collection>/<test>.json`, one
//! [`BenchmarkConfig`] per file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BenchmarkConfig;

const CONFIG_DIR_NAME: &str = "rust_wrk";

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("reading directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("collection name cannot be empty")]
    EmptyCollectionName,

    #[error("test name cannot be empty")]
    EmptyTestName,

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize test config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write test file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A named, saved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    pub name: String,
    pub config: BenchmarkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCollection {
    pub name: String,
    pub tests: Vec<Test>,
}

impl TestCollection {
    pub fn find(&self, test_name: &str) -> Option<&Test> {
        self.tests.iter().find(|t| t.name == test_name)
    }
}

/// Loads every collection under `dir`, sorted by name.
///
/// Unreadable, unparsable or invalid test files are skipped with a warning.
/// Collections left without tests are omitted.
pub fn load_test_collections(dir: &Path) -> Result<Vec<TestCollection>, CollectionError> {
    let mut collection_dirs = sorted_entries(dir).map_err(|source| CollectionError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    collection_dirs.retain(|p| p.is_dir());

    let mut collections = Vec::new();
    for collection_path in collection_dirs {
        let Some(name) = file_name(&collection_path) else {
            continue;
        };

        let test_paths = match sorted_entries(&collection_path) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(path = %collection_path.display(), error = %e, "Skipping unreadable collection");
                continue;
            }
        };

        let tests: Vec<Test> = test_paths
            .iter()
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| load_test(p))
            .collect();

        if tests.is_empty() {
            debug!(collection = %name, "Collection has no valid tests");
            continue;
        }
        collections.push(TestCollection { name, tests });
    }

    Ok(collections)
}

fn load_test(path: &Path) -> Option<Test> {
    let name = path.file_stem()?.to_string_lossy().into_owned();

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable test file");
            return None;
        }
    };

    let config: BenchmarkConfig = match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unparsable test file");
            return None;
        }
    };

    if let Err(e) = config.validate() {
        warn!(path = %path.display(), error = %e, "Skipping invalid test config");
        return None;
    }

    Some(Test { name, config })
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Writes `config` as pretty JSON to `<base>/<collection>/<test>.json`,
/// creating directories as needed and overwriting an existing file.
///
/// Both names are sanitized first. Returns the path written.
pub fn save_test_to_collection(
    base_dir: &Path,
    collection_name: &str,
    test_name: &str,
    config: &BenchmarkConfig,
) -> Result<PathBuf, CollectionError> {
    if collection_name.trim().is_empty() {
        return Err(CollectionError::EmptyCollectionName);
    }
    if test_name.trim().is_empty() {
        return Err(CollectionError::EmptyTestName);
    }

    let collection_path = base_dir.join(sanitize_filename(collection_name));
    fs::create_dir_all(&collection_path).map_err(|source| CollectionError::CreateDir {
        path: collection_path.clone(),
        source,
    })?;

    let test_path = collection_path.join(format!("{}.json", sanitize_filename(test_name)));
    let json = serde_json::to_string_pretty(config)?;
    fs::write(&test_path, json).map_err(|source| CollectionError::Write {
        path: test_path.clone(),
        source,
    })?;

    debug!(path = %test_path.display(), "Saved test config");
    Ok(test_path)
}

/// Makes `name` safe to use as a file name.
///
/// Separators and shell-special characters become `_`; anything outside
/// ASCII letters, digits, `_` and `-` is dropped. Never returns an empty
/// string.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            other => other,
        })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if sanitized.is_empty() {
        "unnamed_test".to_string()
    } else {
        sanitized
    }
}

/// Where collections are kept unless `BENCH_CONFIG_DIR` says otherwise.
///
/// `$XDG_CONFIG_HOME/rust_wrk`, then `$HOME/.config/rust_wrk`, then
/// `./rust_wrk`.
pub fn default_config_dir() -> PathBuf {
    if let Some(dir) = env::var_os("BENCH_CONFIG_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join(CONFIG_DIR_NAME);
    }
    if let Some(home) = env::var_os("HOME").filter(|d| !d.is_empty()) {
        return PathBuf::from(home).join(".config").join(CONFIG_DIR_NAME);
    }

    warn!("Could not determine user config directory, using ./{}", CONFIG_DIR_NAME);
    PathBuf::from(CONFIG_DIR_NAME)
}
