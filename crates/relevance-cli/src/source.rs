//! Directory-backed document source.

use std::fs;
use std::path::{Path, PathBuf};

use relevance_core::source::check_documents;
use relevance_core::{Document, DocumentSource, SourceError};

/// Reads every `*.txt` file in one directory, sorted by file name.
///
/// The file name is the document id. Subdirectories are not searched.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    skip_undecodable: bool,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            skip_undecodable: false,
        }
    }

    /// Skip files that are not valid UTF-8 instead of failing.
    pub fn skip_undecodable(mut self, skip: bool) -> Self {
        self.skip_undecodable = skip;
        self
    }

    fn io_error(path: &Path, source: std::io::Error) -> SourceError {
        SourceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl DocumentSource for DirectorySource {
    fn list_documents(&self) -> Result<Vec<Document>, SourceError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_error(&self.dir, e))?;
            let path = entry.path();
            let is_txt = path.extension().is_some_and(|ext| ext == "txt");
            if is_txt && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = fs::read(&path).map_err(|e| Self::io_error(&path, e))?;
            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) if self.skip_undecodable => {
                    tracing::warn!(path = %path.display(), "Skipping file that is not valid UTF-8");
                    continue;
                }
                Err(_) => return Err(SourceError::InvalidUtf8 { path }),
            };
            let id = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            documents.push(Document::new(id, text));
        }

        check_documents(&documents)?;
        tracing::info!(dir = %self.dir.display(), count = documents.len(), "Loaded documents");
        Ok(documents)
    }
}
