use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Where a document was left
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPosition {
    pub page: usize,
    pub last_read: chrono::DateTime<chrono::Utc>,
}

/// Last-read pages keyed by document identity
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingPositions {
    documents: HashMap<String, ReadingPosition>,
    #[serde(skip)]
    file_path: Option<PathBuf>,
}

impl ReadingPositions {
    pub fn ephemeral() -> Self {
        Self {
            documents: HashMap::new(),
            file_path: None,
        }
    }

    pub fn with_file(file_path: &Path) -> Self {
        Self {
            documents: HashMap::new(),
            file_path: Some(file_path.to_path_buf()),
        }
    }

    pub fn load_or_ephemeral(file_path: Option<&Path>) -> Self {
        match file_path {
            Some(path) => Self::load_from_file(path).unwrap_or_else(|e| {
                log::error!("Failed to load reading positions from {path:?}: {e}");
                Self::with_file(path)
            }),
            None => Self::ephemeral(),
        }
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let mut positions: Self = serde_json::from_str(&content)?;
            positions.file_path = Some(path.to_path_buf());
            Ok(positions)
        } else {
            Ok(Self::with_file(path))
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        match &self.file_path {
            Some(path) => {
                let content = serde_json::to_string_pretty(self)?;
                fs::write(path, content)?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn page_for(&self, doc_key: &str) -> Option<usize> {
        self.documents.get(doc_key).map(|p| p.page)
    }

    pub fn get(&self, doc_key: &str) -> Option<&ReadingPosition> {
        self.documents.get(doc_key)
    }

    /// Remember `page` for `doc_key` and write through to the file, if any
    pub fn record(&mut self, doc_key: &str, page: usize) {
        self.documents.insert(
            doc_key.to_string(),
            ReadingPosition {
                page,
                last_read: chrono::Utc::now(),
            },
        );
        if self.file_path.is_some() {
            if let Err(e) = self.save() {
                log::error!("Failed to save reading position: {e}");
            }
        }
    }

    pub fn most_recent(&self) -> Option<(&str, &ReadingPosition)> {
        self.documents
            .iter()
            .max_by_key(|(_, p)| p.last_read)
            .map(|(key, p)| (key.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_persists_across_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");

        let mut positions = ReadingPositions::load_or_ephemeral(Some(&path));
        assert!(positions.is_empty());
        positions.record("manual.pdf", 41);
        positions.record("notes.pdf", 2);

        let reloaded = ReadingPositions::load_or_ephemeral(Some(&path));
        assert_eq!(reloaded.page_for("manual.pdf"), Some(41));
        assert_eq!(reloaded.page_for("notes.pdf"), Some(2));
        assert_eq!(reloaded.page_for("missing.pdf"), None);
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_ephemeral_never_writes() {
        let mut positions = ReadingPositions::ephemeral();
        positions.record("a.pdf", 3);
        assert_eq!(positions.page_for("a.pdf"), Some(3));
        positions.save().unwrap();
    }

    #[test]
    fn test_corrupt_file_starts_empty_but_keeps_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        fs::write(&path, "{ not json").unwrap();

        let mut positions = ReadingPositions::load_or_ephemeral(Some(&path));
        assert!(positions.is_empty());
        positions.record("a.pdf", 9);
        assert_eq!(
            ReadingPositions::load_from_file(&path).unwrap().page_for("a.pdf"),
            Some(9)
        );
    }
}
