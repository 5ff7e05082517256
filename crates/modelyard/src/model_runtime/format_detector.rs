//! Artifact-format detection for model directories.
//!
//! A model directory serves through the gguf backend when it contains any
//! `*.gguf` file, through the safetensors runner when it contains
//! `*.safetensors` or `*.bin` shards, and is unsupported otherwise.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Gguf,
    Safetensors,
    Unknown,
}

impl RuntimeKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeKind::Gguf => "gguf",
            RuntimeKind::Safetensors => "safetensors",
            RuntimeKind::Unknown => "unknown",
        }
    }
}

pub struct FormatDetector;

impl FormatDetector {
    /// Detect the runtime kind for a model directory. gguf wins when both
    /// formats are present, matching the priority of the artifact scanners.
    pub fn detect_dir(dir: &Path) -> RuntimeKind {
        if !Self::files_with_extensions(dir, &["gguf"]).is_empty() {
            RuntimeKind::Gguf
        } else if !Self::files_with_extensions(dir, &["safetensors", "bin"]).is_empty() {
            RuntimeKind::Safetensors
        } else {
            RuntimeKind::Unknown
        }
    }

    /// The path handed to the backend: the first `*.gguf` file for the gguf
    /// backend, the directory itself for the safetensors runner (it reads
    /// shards plus tokenizer/config files from there).
    pub fn artifact_path(dir: &Path, kind: RuntimeKind) -> Option<PathBuf> {
        match kind {
            RuntimeKind::Gguf => Self::files_with_extensions(dir, &["gguf"]).into_iter().next(),
            RuntimeKind::Safetensors => Some(dir.to_path_buf()),
            RuntimeKind::Unknown => None,
        }
    }

    fn files_with_extensions(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
        let mut matches: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .and_then(|e| e.to_str())
                            .map(|e| extensions.contains(&e.to_lowercase().as_str()))
                            .unwrap_or(false)
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        // Directory iteration order is platform-dependent; sort so the same
        // artifact is chosen on every load.
        matches.sort();
        matches
    }
}
