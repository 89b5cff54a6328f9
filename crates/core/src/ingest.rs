use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A training request: which of a client's uploaded files to (re)index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub client_id: String,
    pub file_names: Vec<String>,
}

impl IngestRequest {
    pub fn new(client_id: impl Into<String>, file_names: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            file_names,
        }
    }

    /// Checks the request and returns its file names with duplicates removed,
    /// first occurrence wins.
    pub fn validated_file_names(&self) -> Result<Vec<&str>, IngestError> {
        if self.client_id.trim().is_empty() {
            return Err(IngestError::Validation("Missing clientId".to_string()));
        }
        if self.client_id.contains('/') {
            return Err(IngestError::Validation(format!(
                "clientId must not contain '/': {}",
                self.client_id
            )));
        }
        if self.file_names.is_empty() {
            return Err(IngestError::Validation("Missing fileNames".to_string()));
        }

        let mut seen = HashSet::new();
        let mut names = Vec::with_capacity(self.file_names.len());
        for name in &self.file_names {
            validate_file_name(name)?;
            if seen.insert(name.as_str()) {
                names.push(name.as_str());
            }
        }

        Ok(names)
    }
}

pub fn validate_file_name(name: &str) -> Result<(), IngestError> {
    if name.trim().is_empty() {
        return Err(IngestError::Validation("file name is empty".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name == ".." || name == "." {
        return Err(IngestError::Validation(format!(
            "file name must be a plain object name: {name}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    /// Every batch was written.
    Indexed,
    /// Some batches failed.
    Partial,
    /// Nothing was written for this file.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileReport {
    pub file_name: String,
    pub outcome: FileOutcome,
    pub chunks_total: usize,
    pub chunks_written: usize,
    pub rows_cleared: Option<u64>,
    pub errors: Vec<String>,
}

impl FileReport {
    pub(crate) fn new(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            outcome: FileOutcome::Failed,
            chunks_total: 0,
            chunks_written: 0,
            rows_cleared: None,
            errors: Vec::new(),
        }
    }

    pub(crate) fn fail(mut self, message: String) -> Self {
        self.errors.push(message);
        self.outcome = FileOutcome::Failed;
        self
    }

    pub(crate) fn finish(mut self) -> Self {
        self.outcome = if self.chunks_written == 0 && !self.errors.is_empty() {
            FileOutcome::Failed
        } else if self.errors.is_empty() {
            FileOutcome::Indexed
        } else {
            FileOutcome::Partial
        };
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestionReport {
    pub chunks_processed: usize,
    pub errors: Vec<String>,
    pub files: Vec<FileReport>,
}

impl IngestionReport {
    pub fn from_files(files: Vec<FileReport>) -> Self {
        let chunks_processed = files.iter().map(|file| file.chunks_written).sum();
        let errors = files
            .iter()
            .flat_map(|file| file.errors.iter().cloned())
            .collect();
        Self {
            chunks_processed,
            errors,
            files,
        }
    }

    /// Nothing was written and something went wrong.
    pub fn is_total_failure(&self) -> bool {
        self.chunks_processed == 0 && !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_from_camel_case() {
        let request: IngestRequest =
            serde_json::from_str(r#"{"clientId":"c-1","fileNames":["a.pdf","b.txt"]}"#)
                .expect("valid body");
        assert_eq!(request.client_id, "c-1");
        assert_eq!(request.file_names, vec!["a.pdf", "b.txt"]);
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let missing_client = IngestRequest::new("  ", vec!["a.pdf".to_string()]);
        assert!(matches!(
            missing_client.validated_file_names(),
            Err(IngestError::Validation(_))
        ));

        let missing_files = IngestRequest::new("c-1", Vec::new());
        assert!(matches!(
            missing_files.validated_file_names(),
            Err(IngestError::Validation(_))
        ));
    }

    #[test]
    fn traversal_names_are_rejected() {
        for name in ["../other/a.pdf", "nested/a.pdf", "..", "a\\b.txt", ""] {
            let request = IngestRequest::new("c-1", vec![name.to_string()]);
            assert!(
                request.validated_file_names().is_err(),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn duplicate_names_are_ingested_once() {
        let request = IngestRequest::new(
            "c-1",
            vec!["a.pdf".to_string(), "b.pdf".to_string(), "a.pdf".to_string()],
        );
        assert_eq!(
            request.validated_file_names().expect("valid request"),
            vec!["a.pdf", "b.pdf"]
        );
    }

    #[test]
    fn total_failure_requires_zero_chunks_and_some_error() {
        let mut failed = FileReport::new("a.pdf");
        failed.errors.push("Download failed for a.pdf: not found".to_string());
        let mut indexed = FileReport::new("b.pdf");
        indexed.chunks_written = 4;

        let all_failed = IngestionReport::from_files(vec![failed.clone().finish()]);
        assert!(all_failed.is_total_failure());

        let partial = IngestionReport::from_files(vec![failed.finish(), indexed.finish()]);
        assert!(!partial.is_total_failure());
        assert_eq!(partial.chunks_processed, 4);
        assert_eq!(partial.errors.len(), 1);

        assert!(!IngestionReport::default().is_total_failure());
    }
}
