//! Document sources.
//!
//! The pipeline only needs a finite, ordered list of documents with
//! non-empty ids. Where they come from is up to the implementation.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::Document;

/// Errors raised while listing documents.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    InvalidUtf8 { path: PathBuf },

    #[error("document at position {position} has an empty id")]
    EmptyId { position: usize },

    #[error("document id '{0}' appears more than once")]
    DuplicateId(String),
}

/// Supplies the documents for one run, in processing order.
pub trait DocumentSource {
    fn list_documents(&self) -> Result<Vec<Document>, SourceError>;
}

/// An in-memory source.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    documents: Vec<Document>,
}

impl VecSource {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }
}

impl DocumentSource for VecSource {
    fn list_documents(&self) -> Result<Vec<Document>, SourceError> {
        check_documents(&self.documents)?;
        Ok(self.documents.clone())
    }
}

/// Reject empty or repeated ids.
pub fn check_documents(documents: &[Document]) -> Result<(), SourceError> {
    let mut seen = std::collections::HashSet::new();
    for (position, doc) in documents.iter().enumerate() {
        if doc.id.is_empty() {
            return Err(SourceError::EmptyId { position });
        }
        if !seen.insert(doc.id.as_str()) {
            return Err(SourceError::DuplicateId(doc.id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_source_preserves_order() {
        let source = VecSource::new(vec![Document::new("b", "2"), Document::new("a", "1")]);
        let ids: Vec<String> = source
            .list_documents()
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_empty_and_duplicate_ids_rejected() {
        let empty = VecSource::new(vec![Document::new("a", ""), Document::new("", "x")]);
        assert!(matches!(
            empty.list_documents(),
            Err(SourceError::EmptyId { position: 1 })
        ));

        let dup = VecSource::new(vec![Document::new("a", ""), Document::new("a", "x")]);
        assert!(matches!(dup.list_documents(), Err(SourceError::DuplicateId(id)) if id == "a"));
    }
}
