use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("row {row} is missing required fields: {}", .missing.join(", "))]
    IncompleteRecord {
        row: usize,
        missing: Vec<&'static str>,
    },
}

impl DomainError {
    pub fn incomplete(row: usize, missing: Vec<&'static str>) -> Self {
        Self::IncompleteRecord { row, missing }
    }
}
