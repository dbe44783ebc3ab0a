use std::{
    fs::File,
    io::Read,
    path::PathBuf,
};

use csv::{ReaderBuilder, StringRecord};
use tracing::debug;

use crate::{
    application::roster::{RosterError, RosterSource},
    domain::entities::ParticipantRecord,
};

const UTF8_BOM: char = '\u{feff}';

/// CSV-backed roster with a mandatory header row.
#[derive(Debug, Clone)]
pub struct CsvRoster {
    path: PathBuf,
}

impl CsvRoster {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RosterSource for CsvRoster {
    fn load_records(&self) -> Result<Vec<ParticipantRecord>, RosterError> {
        let file = File::open(&self.path).map_err(|source| RosterError::Io {
            path: self.path.clone(),
            source,
        })?;
        let records = parse_roster(file)?;
        debug!(
            target = "certgen::roster",
            path = %self.path.display(),
            rows = records.len(),
            "Roster parsed"
        );
        Ok(records)
    }
}

/// Parse a CSV stream into participant records, preserving row order.
///
/// Rows shorter than the header are accepted; their missing cells stay absent
/// and are caught later by validation.
pub fn parse_roster<R: Read>(reader: R) -> Result<Vec<ParticipantRecord>, RosterError> {
    let mut csv = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv
        .headers()
        .map_err(map_csv_error)?
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            if idx == 0 {
                header.trim_start_matches(UTF8_BOM).to_string()
            } else {
                header.to_string()
            }
        })
        .collect();

    if headers.iter().all(|header| header.trim().is_empty()) {
        return Err(RosterError::format("roster has no header row"));
    }

    let mut records = Vec::new();
    let mut row = StringRecord::new();
    let mut index = 0usize;
    while csv.read_record(&mut row).map_err(map_csv_error)? {
        index += 1;
        let mut record = ParticipantRecord::new(index);
        for (column, value) in headers.iter().zip(row.iter()) {
            record.set_field(column, value);
        }
        records.push(record);
    }

    Ok(records)
}

fn map_csv_error(err: csv::Error) -> RosterError {
    RosterError::format(err.to_string())
}
