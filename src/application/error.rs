use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::{notify::DeliveryError, roster::RosterError, template::TemplateError},
    config::LoadError,
    infra::error::InfraError,
};

/// Failures that stop a run before or outside per-record processing.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Stable label for the failing subsystem, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "configuration",
            AppError::Roster(_) => "roster",
            AppError::Template(_) => "template",
            AppError::Delivery(_) => "delivery",
            AppError::Infra(InfraError::Telemetry(_)) => "telemetry",
            AppError::Infra(InfraError::Io(_)) => "io",
            AppError::Unexpected(_) => "unexpected",
        }
    }
}

/// Messages of `error` and every error in its source chain, outermost first.
pub fn error_chain(error: &dyn StdError) -> Vec<String> {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(inner) = current {
        messages.push(inner.to_string());
        current = inner.source();
    }
    messages
}
