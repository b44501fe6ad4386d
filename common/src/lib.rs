use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

#[macro_use]
pub mod macros;
pub mod buffer2;
pub mod fnv;
pub mod log_setup;
pub mod parallel;

pub const EPSILON: f64 = 1e-6;

#[derive(Debug, thiserror::Error)]
pub enum FileExtensionError {
    #[error("Failed to get file extension")]
    MissingFileExtension,
    #[error("Unsupported file extension for file: {0}")]
    UnsupportedFileExtension(String),
}

pub type FileFormatResult<T> = Result<T, FileExtensionError>;

pub fn get_file_extension(filename: &Path) -> Option<String> {
    filename
        .extension()
        .and_then(|os_str| os_str.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Checks that `path` carries one of `allowed` extensions (case insensitive, without dot).
pub fn expect_extension(path: &Path, allowed: &[&str]) -> FileFormatResult<()> {
    let extension = get_file_extension(path).ok_or(FileExtensionError::MissingFileExtension)?;
    if allowed.iter().any(|a| a.eq_ignore_ascii_case(&extension)) {
        Ok(())
    } else {
        Err(FileExtensionError::UnsupportedFileExtension(
            path.display().to_string(),
        ))
    }
}

pub fn is_debug() -> bool {
    cfg!(debug_assertions)
}

pub fn to_json_pretty<T: Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value)
}

pub fn from_json<T: DeserializeOwned>(serialized: &str) -> serde_json::Result<T> {
    serde_json::from_str(serialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extension_is_case_insensitive() {
        let path = PathBuf::from("/tmp/project.ICPROJ");
        assert!(expect_extension(&path, &["icproj"]).is_ok());
    }

    #[test]
    fn missing_extension_is_reported() {
        let path = PathBuf::from("/tmp/project");
        assert!(matches!(
            expect_extension(&path, &["icproj"]),
            Err(FileExtensionError::MissingFileExtension)
        ));
    }

    #[test]
    fn wrong_extension_is_reported() {
        let path = PathBuf::from("/tmp/project.json");
        let err = expect_extension(&path, &["icproj", "ictpl"]).unwrap_err();
        assert!(err.to_string().contains("project.json"));
    }
}
