use std::path::Path;

use serde::de::DeserializeOwned;

pub mod buffer2;
pub mod group;
pub mod log_setup;
pub mod parallel;

pub use buffer2::Buffer2;
pub use group::{Clash, Group, GroupError};

#[derive(Debug, thiserror::Error)]
pub enum FileExtensionError {
    #[error("Failed to get file extension")]
    MissingFileExtension,
    #[error("Unsupported file extension for file: {0}")]
    UnsupportedFileExtension(String),
}

pub type FileFormatResult<T> = Result<T, FileExtensionError>;

#[derive(Debug, thiserror::Error)]
pub enum SerdeFormatError {
    #[error("YAML deserialization failed")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON deserialization failed")]
    Json(#[from] serde_json::Error),
}

pub type SerdeFormatResult<T> = Result<T, SerdeFormatError>;

#[derive(Debug, thiserror::Error)]
pub enum LoadFileError {
    #[error(transparent)]
    Format(#[from] FileExtensionError),
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse '{path}': {source}")]
    Parse {
        path: String,
        source: SerdeFormatError,
    },
}

pub fn get_file_extension(filename: &str) -> Option<&str> {
    Path::new(filename)
        .extension()
        .and_then(|os_str| os_str.to_str())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

impl FileFormat {
    pub fn from_file_name(file_name: &str) -> FileFormatResult<Self> {
        let extension = get_file_extension(file_name)
            .map(|ext| ext.to_ascii_lowercase())
            .ok_or(FileExtensionError::MissingFileExtension)?;

        match extension.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(FileExtensionError::UnsupportedFileExtension(
                file_name.to_string(),
            )),
        }
    }
}

pub fn deserialize<T: DeserializeOwned>(
    serialized: &str,
    format: FileFormat,
) -> SerdeFormatResult<T> {
    match format {
        FileFormat::Yaml => Ok(serde_yml::from_str(serialized)?),
        FileFormat::Json => Ok(serde_json::from_str(serialized)?),
    }
}

/// Reads and deserializes a YAML or JSON file, picking the format from its extension.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, LoadFileError> {
    let display = path.display().to_string();
    let format = FileFormat::from_file_name(&display)?;
    let text = std::fs::read_to_string(path).map_err(|source| LoadFileError::Io {
        path: display.clone(),
        source,
    })?;
    deserialize(&text, format).map_err(|source| LoadFileError::Parse {
        path: display,
        source,
    })
}
