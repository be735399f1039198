//! Dataset intake: décode les deux scans CSV (wifi_data, ble_data) en lignes de texte.
//!
//! Adaptateur de format uniquement : aucune validation du nombre de colonnes,
//! des types ou des plages de valeurs. Une table vide (0 ligne) est valide.

use thiserror::Error;

pub const WIFI_FIELD: &str = "wifi_data";
pub const BLE_FIELD: &str = "ble_data";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing payload field: {0}")]
    MissingField(&'static str),
    #[error("error parsing {field} CSV: {source}")]
    Malformed {
        field: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("invalid multipart body: {0}")]
    Multipart(String),
}

/// Suite ordonnée de lignes, chaque ligne une suite ordonnée de champs texte
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Ré-encode en CSV pour l'envoi aux pairs
    pub fn to_csv(&self) -> Result<Vec<u8>, csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))
    }
}

/// Décode la paire (wifi, ble); échoue si l'un des deux est absent ou illisible
pub fn decode(
    raw_wifi: Option<&[u8]>,
    raw_ble: Option<&[u8]>,
) -> Result<(Dataset, Dataset), DecodeError> {
    let raw_wifi = raw_wifi.ok_or(DecodeError::MissingField(WIFI_FIELD))?;
    let raw_ble = raw_ble.ok_or(DecodeError::MissingField(BLE_FIELD))?;

    let wifi = parse_csv(WIFI_FIELD, raw_wifi)?;
    let ble = parse_csv(BLE_FIELD, raw_ble)?;
    Ok((wifi, ble))
}

fn parse_csv(field: &'static str, raw: &[u8]) -> Result<Dataset, DecodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false) // l'en-tête est une ligne comme une autre
        .flexible(true)
        .from_reader(raw);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| DecodeError::Malformed { field, source })?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Dataset::from_rows(rows))
}
