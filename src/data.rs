use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Dataset shipped with the crate, used when no external file is supplied.
pub static BUNDLED_DATASET: &str = include_str!("../data/palabras.json");
/// Version metadata shipped next to the bundled dataset.
pub static BUNDLED_VERSION: &str = include_str!("../data/version.json");

/// One glossary entry as it appears in the dataset file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    #[serde(rename = "palabra", alias = "term")]
    pub term: String,
    #[serde(rename = "traduccion", alias = "translation", default)]
    pub translation: String,
    #[serde(rename = "definicion", alias = "definition", default)]
    pub definition: String,
    #[serde(rename = "ejemplo", alias = "example", default)]
    pub example: String,
    #[serde(rename = "categoria", alias = "category", default)]
    pub category: String,
}

/// Release information displayed in the footer. Purely informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    #[serde(rename = "fecha", alias = "date")]
    pub date: String,
}

impl VersionInfo {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn load(path: &Path) -> Option<Self> {
        fs::read_to_string(path)
            .ok()
            .and_then(|raw| Self::parse(&raw))
    }

    pub fn bundled() -> Option<Self> {
        Self::parse(BUNDLED_VERSION)
    }
}

/// Footer label for optional version metadata.
pub fn describe_version(info: Option<&VersionInfo>) -> String {
    match info {
        Some(info) => format!(
            "Versión {} • Actualizado el {}",
            info.version, info.date
        ),
        None => "Información no disponible".to_string(),
    }
}

#[derive(Debug)]
pub enum DatasetError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Unavailable(String),
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetError::Io(err) => write!(f, "dataset unavailable: {err}"),
            DatasetError::Parse(err) => write!(f, "dataset is not valid JSON: {err}"),
            DatasetError::Unavailable(reason) => write!(f, "dataset unavailable: {reason}"),
        }
    }
}

impl std::error::Error for DatasetError {}

impl From<std::io::Error> for DatasetError {
    fn from(value: std::io::Error) -> Self {
        DatasetError::Io(value)
    }
}

impl From<serde_json::Error> for DatasetError {
    fn from(value: serde_json::Error) -> Self {
        DatasetError::Parse(value)
    }
}

pub fn parse_records(raw: &[u8]) -> Result<Vec<TermRecord>, DatasetError> {
    Ok(serde_json::from_slice(raw)?)
}

pub fn read_records(path: &Path) -> Result<Vec<TermRecord>, DatasetError> {
    let bytes = fs::read(path)?;
    parse_records(&bytes)
}
