//! Per-tenant knowledge-base document storage.
//!
//! One plain-text file per tenant, named by subdomain. Uploads replace the
//! whole file; writes go to a sibling temp file first and are moved into
//! place with an atomic rename, so a concurrent reader never observes a
//! partially written document.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// SHA-256 of document content, hex-encoded. Used to tag enrichment runs
/// with the document version they were computed from.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct DocumentStore {
    dir: PathBuf,
}

impl DocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, subdomain: &str) -> PathBuf {
        self.dir.join(format!("{subdomain}.md"))
    }

    /// Overwrite a tenant's document wholesale. Returns the content hash.
    pub fn write(&self, subdomain: &str, content: &str) -> Result<String> {
        let path = self.path_for(subdomain);
        let tmp = self.dir.join(format!("{subdomain}.md.tmp"));
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(content_hash(content))
    }

    /// Read a tenant's document. An absent document is `None`, not an error.
    pub fn read(&self, subdomain: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(subdomain)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, subdomain: &str) -> bool {
        self.path_for(subdomain).exists()
    }

    /// Hash of the currently stored document, if any.
    pub fn current_hash(&self, subdomain: &str) -> Result<Option<String>> {
        Ok(self.read(subdomain)?.map(|c| content_hash(&c)))
    }

    #[allow(dead_code)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_document_reads_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let docs = DocumentStore::new(tmp.path().join("docs")).unwrap();
        assert_eq!(docs.read("acme").unwrap(), None);
        assert!(!docs.exists("acme"));
    }

    #[test]
    fn test_write_is_whole_file_replace() {
        let tmp = tempfile::TempDir::new().unwrap();
        let docs = DocumentStore::new(tmp.path().join("docs")).unwrap();

        docs.write("acme", "first version").unwrap();
        docs.write("acme", "second").unwrap();
        assert_eq!(docs.read("acme").unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let docs = DocumentStore::new(tmp.path().join("docs")).unwrap();
        docs.write("acme", "content").unwrap();

        let names: Vec<String> = std::fs::read_dir(tmp.path().join("docs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["acme.md".to_string()]);
    }

    #[test]
    fn test_hash_matches_write_result() {
        let tmp = tempfile::TempDir::new().unwrap();
        let docs = DocumentStore::new(tmp.path().join("docs")).unwrap();
        let h = docs.write("acme", "контент").unwrap();
        assert_eq!(docs.current_hash("acme").unwrap().as_deref(), Some(h.as_str()));
        assert_eq!(h, content_hash("контент"));
    }
}
