//! Roster source abstraction consumed by the batch runner.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::domain::entities::ParticipantRecord;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("failed to open roster `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("roster is malformed: {message}")]
    Format { message: String },
}

impl RosterError {
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }
}

/// Reads every participant row up front, in source order.
pub trait RosterSource: Send + Sync {
    fn load_records(&self) -> Result<Vec<ParticipantRecord>, RosterError>;
}

impl RosterSource for Vec<ParticipantRecord> {
    fn load_records(&self) -> Result<Vec<ParticipantRecord>, RosterError> {
        Ok(self.clone())
    }
}
