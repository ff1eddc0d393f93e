//! The signs file: one pretty-printed JSON object mapping
//! `"<collection>:<x>:<y>:<z>"` to a record. Always rewritten whole.

use crate::core::{Result, SignError, SignRecord, SpatialKey};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

/// What came out of the file, plus the entries that had to be dropped.
#[derive(Debug, Default)]
pub struct LoadedSigns {
    pub records: Vec<(SpatialKey, SignRecord)>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SignFile {
    path: PathBuf,
}

impl SignFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reads every record. A missing file is an empty store.
    ///
    /// Entries whose key does not parse or whose body is not a record are
    /// skipped and reported in [`LoadedSigns::skipped`]; only a file that is
    /// not a JSON object at all is an error.
    pub fn load(&self) -> Result<LoadedSigns> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(LoadedSigns::default()),
            Err(err) => return Err(err.into()),
        };

        let raw: Option<BTreeMap<String, serde_json::Value>> = serde_json::from_str(&text)?;
        let mut loaded = LoadedSigns::default();

        for (key_text, body) in raw.unwrap_or_default() {
            let key = match key_text.parse::<SpatialKey>() {
                Ok(key) => key,
                Err(err) => {
                    warn!(key = %key_text, error = %err, "Skipping sign with malformed key");
                    loaded.skipped.push(key_text);
                    continue;
                }
            };
            match serde_json::from_value::<SignRecord>(body) {
                Ok(record) => loaded.records.push((key, record)),
                Err(err) => {
                    warn!(key = %key_text, error = %err, "Skipping unreadable sign record");
                    loaded.skipped.push(key_text);
                }
            }
        }

        Ok(loaded)
    }

    /// Writes `records` to a temp file next to the target and renames it
    /// over the target.
    pub fn save(&self, records: &BTreeMap<String, SignRecord>) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let json = serde_json::to_string_pretty(records)?;
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| SignError::Io(err.error))?;
        Ok(())
    }

    /// Moves an unreadable file aside so a later save cannot overwrite it.
    pub fn quarantine(&self) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(format!(".corrupt-{}", stamp));
        let target = self.path.with_file_name(name);
        fs::rename(&self.path, &target)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SignId;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let file = SignFile::new(temp_dir.path().join("signs.json"));
        let loaded = file.load().unwrap();
        assert!(loaded.records.is_empty());
        assert!(!file.exists());
    }

    #[test]
    fn test_save_creates_directory_and_pretty_prints() {
        let temp_dir = TempDir::new().unwrap();
        let file = SignFile::new(temp_dir.path().join("nested/dir/signs.json"));

        let mut record = SignRecord::new(SignId::from("id1"));
        record.set_lines(["Hello"]);
        let mut records = BTreeMap::new();
        records.insert("w:1:2:3".to_string(), record.clone());

        file.save(&records).unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("\n  \"w:1:2:3\": {"));

        let loaded = file.load().unwrap();
        assert_eq!(loaded.records, vec![(SpatialKey::new("w", 1, 2, 3), record)]);
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("signs.json");
        fs::write(
            &path,
            r#"{
                "w:1:2:3": {"lines": ["ok"]},
                "not-a-key": {"lines": ["lost"]},
                "w:4:5:6": {"lines": 7}
            }"#,
        )
        .unwrap();

        let loaded = SignFile::new(&path).load().unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.skipped.len(), 2);
    }

    #[test]
    fn test_null_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("signs.json");
        fs::write(&path, "null").unwrap();
        assert!(SignFile::new(&path).load().unwrap().records.is_empty());
    }

    #[test]
    fn test_quarantine_moves_file_aside() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("signs.json");
        fs::write(&path, "{ not json").unwrap();

        let file = SignFile::new(&path);
        assert!(file.load().is_err());

        let moved = file.quarantine().unwrap();
        assert!(!path.exists());
        assert!(moved.exists());
        assert!(moved.file_name().unwrap().to_string_lossy().starts_with("signs.json.corrupt-"));
    }
}
