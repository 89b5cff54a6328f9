use crate::models::IndexedRow;

/// Typed predicate over vector rows: always scoped to one client, optionally
/// to one `metadata.filename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub client_id: String,
    pub filename: Option<String>,
}

impl RowFilter {
    pub fn client(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            filename: None,
        }
    }

    pub fn file(client_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            filename: Some(filename.into()),
        }
    }

    pub fn matches(&self, row: &IndexedRow) -> bool {
        row.client_id == self.client_id
            && self
                .filename
                .as_deref()
                .map_or(true, |filename| row.metadata.filename == filename)
    }
}
