use std::collections::BTreeMap;

use serde::Serialize;

use super::error::DomainError;

/// Roster column holding the participant's display name.
pub const NAME_COLUMN: &str = "NOME_PARTICIPANTE";
/// Roster column holding the event date, copied verbatim into the certificate.
pub const EVENT_DATE_COLUMN: &str = "DATA_EVENTO";
/// Roster column holding the recipient address.
pub const EMAIL_COLUMN: &str = "Email";

/// One roster row as read from the source, before validation.
///
/// Recognised columns are lifted into typed fields; everything else is kept in
/// `extra` so nothing from the source row is silently lost.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParticipantRecord {
    /// 1-based data row number (the header row is not counted).
    pub row: usize,
    pub name: Option<String>,
    pub event_date: Option<String>,
    pub email: Option<String>,
    pub extra: BTreeMap<String, String>,
}

/// A roster entry whose required fields are present and trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub row: usize,
    pub name: String,
    pub event_date: String,
    pub email: String,
}

impl ParticipantRecord {
    pub fn new(row: usize) -> Self {
        Self {
            row,
            ..Self::default()
        }
    }

    /// Assign a cell by its column name. Unknown columns land in `extra`.
    pub fn set_field(&mut self, column: &str, value: impl Into<String>) {
        let value = value.into();
        match column {
            NAME_COLUMN => self.name = Some(value),
            EVENT_DATE_COLUMN => self.event_date = Some(value),
            EMAIL_COLUMN => self.email = Some(value),
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
    }

    /// Trim the required fields and check that none of them is blank.
    pub fn validate(&self) -> Result<Participant, DomainError> {
        let name = trimmed(self.name.as_deref());
        let event_date = trimmed(self.event_date.as_deref());
        let email = trimmed(self.email.as_deref());

        let mut missing = Vec::new();
        if name.is_none() {
            missing.push(NAME_COLUMN);
        }
        if event_date.is_none() {
            missing.push(EVENT_DATE_COLUMN);
        }
        if email.is_none() {
            missing.push(EMAIL_COLUMN);
        }

        match (name, event_date, email) {
            (Some(name), Some(event_date), Some(email)) => Ok(Participant {
                row: self.row,
                name: name.to_string(),
                event_date: event_date.to_string(),
                email: email.to_string(),
            }),
            _ => Err(DomainError::incomplete(self.row, missing)),
        }
    }
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
