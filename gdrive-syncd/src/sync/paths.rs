use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("object key is empty")]
    Empty,
    #[error("object key contains unsupported segment: {0:?}")]
    UnsupportedSegment(String),
}

/// Builds the sink key for a transferred leaf. The `.csv` suffix is fixed and
/// does not depend on the content actually fetched.
pub fn object_key(owner_id: i64, folder_id: &str, file_name: &str) -> String {
    format!("{owner_id}/{folder_id}/{file_name}.csv")
}

/// Splits an object key into its `/`-separated segments.
pub fn key_segments(key: &str) -> Result<Vec<&str>, KeyError> {
    if key.trim_matches('/').is_empty() {
        return Err(KeyError::Empty);
    }
    let mut segments = Vec::new();
    for segment in key.split('/') {
        match segment {
            "" => continue,
            "." | ".." => return Err(KeyError::UnsupportedSegment(segment.to_string())),
            other => segments.push(other),
        }
    }
    Ok(segments)
}

/// Maps an object key ("180/F1/a.csv.csv") under a local root directory.
pub fn object_path_for(root: &Path, key: &str) -> Result<PathBuf, KeyError> {
    let mut out = root.to_path_buf();
    for segment in key_segments(key)? {
        if segment.contains('\\') || segment.contains('\0') {
            return Err(KeyError::UnsupportedSegment(segment.to_string()));
        }
        out.push(segment);
    }
    Ok(out)
}
