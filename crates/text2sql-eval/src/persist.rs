use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::generate::DatasetRecord;
use crate::response::ResponseRecord;

pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
    }
    let mut bytes = serde_json::to_vec_pretty(value).context("serialize JSON")?;
    bytes.push(b'\n');
    std::fs::write(path, &bytes).with_context(|| format!("write: {}", path.display()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    read_json_with_bytes(path).map(|(_, value)| value)
}

/// Like [`read_json`], but also hands back the raw file contents.
pub fn read_json_with_bytes<T: DeserializeOwned>(path: &Path) -> Result<(Vec<u8>, T)> {
    let bytes = std::fs::read(path).with_context(|| format!("read: {}", path.display()))?;
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse JSON: {}", path.display()))?;
    Ok((bytes, value))
}

/// Reads a JSON array of responses (`generated`, `SQL`, `db_path` required).
pub fn load_responses(path: &Path) -> Result<Vec<ResponseRecord>> {
    read_json(path)
}

/// Reads responses and keeps the bytes they were parsed from, for fingerprinting the input.
pub fn load_responses_with_bytes(path: &Path) -> Result<(Vec<u8>, Vec<ResponseRecord>)> {
    read_json_with_bytes(path)
}

/// Reads a JSON array of dataset entries (`prompt`, `db_path` required).
pub fn load_dataset(path: &Path) -> Result<Vec<DatasetRecord>> {
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_creates_parents_and_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");
        write_json_pretty(&path, &vec![1, 2, 3]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
        let back: Vec<u32> = read_json(&path).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn bad_input_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"[{\"generated\": 1}]").unwrap();
        let err = load_responses(&path).unwrap_err();
        assert!(format!("{err:#}").contains("bad.json"));
        assert!(load_dataset(&dir.path().join("missing.json")).is_err());
        let err = load_responses_with_bytes(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parse JSON"));
    }

    #[test]
    fn responses_come_back_with_their_source_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predict.json");
        let text = br#"[{"generated": "SELECT 1", "SQL": "SELECT 1", "db_path": "a.sqlite", "difficulty": "simple"}]"#;
        std::fs::write(&path, text).unwrap();
        let (bytes, records) = load_responses_with_bytes(&path).unwrap();
        assert_eq!(bytes, text.to_vec());
        assert_eq!(records, load_responses(&path).unwrap());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].group_key("difficulty").as_deref(), Some("simple"));
    }
}
