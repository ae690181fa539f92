//! Relay-mode clip storage under a server-local root directory.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use md5::{Digest, Md5};
use tracing::{debug, warn};

use crate::error::{BlobError, Result};

/// Filesystem store for relay uploads.
///
/// Every blob name is normalised before touching the filesystem: absolute
/// paths and any `..` component are rejected outright, and the final parent
/// directory is canonicalized and re-checked against the canonicalized root
/// so no write can land outside it.
pub struct LocalClipStore {
    root: PathBuf,
}

impl LocalClipStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexically validate a blob name and join it under the root.
    fn resolve(&self, blob_name: &str) -> Result<PathBuf> {
        if blob_name.trim().is_empty() {
            return Err(BlobError::PathTraversal(blob_name.to_string()));
        }
        let candidate = Path::new(blob_name);
        let mut relative = PathBuf::new();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    warn!(blob = blob_name, "rejected traversal blob name");
                    return Err(BlobError::PathTraversal(blob_name.to_string()));
                }
            }
        }
        if relative.as_os_str().is_empty() {
            return Err(BlobError::PathTraversal(blob_name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Write clip bytes atomically (temp file + rename) and return the
    /// strong ETag: the quoted MD5 hex of the content.
    pub fn write(&self, blob_name: &str, bytes: &[u8]) -> Result<String> {
        let target = self.resolve(blob_name)?;
        let parent = target
            .parent()
            .ok_or_else(|| BlobError::PathTraversal(blob_name.to_string()))?;
        std::fs::create_dir_all(parent)?;

        // Second line of defense: after the directories exist, the
        // canonical parent must still live under the canonical root.
        let canonical_root = self.root.canonicalize()?;
        let canonical_parent = parent.canonicalize()?;
        if !canonical_parent.starts_with(&canonical_root) {
            warn!(blob = blob_name, "canonicalized path escaped upload root");
            return Err(BlobError::PathTraversal(blob_name.to_string()));
        }

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.persist(&target).map_err(|e| BlobError::Io(e.error))?;

        let digest = Md5::digest(bytes);
        let etag = format!("\"{}\"", hex::encode(digest));
        debug!(blob = blob_name, bytes = bytes.len(), "relay upload stored");
        Ok(etag)
    }

    /// Read a previously relayed clip.
    pub fn read(&self, blob_name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(blob_name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(blob_name.to_string()))
            }
            Err(e) => Err(BlobError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalClipStore::new(dir.path());

        let etag = store
            .write("sessions/s1/events/clip-local.webm", b"abc")
            .expect("write");
        // md5("abc"), quoted.
        assert_eq!(etag, "\"900150983cd24fb0d6963f7d28e17f72\"");

        let bytes = store.read("sessions/s1/events/clip-local.webm").expect("read");
        assert_eq!(bytes, b"abc");
    }

    #[test]
    fn traversal_names_are_rejected_before_any_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalClipStore::new(dir.path());

        for name in ["../escape", "a/../../escape", "/etc/passwd", "", "  "] {
            let err = store.write(name, b"abc").unwrap_err();
            assert!(matches!(err, BlobError::PathTraversal(_)), "{name}");
        }
        // Nothing may have been created outside the root.
        assert!(!dir.path().parent().unwrap().join("escape").exists());
    }

    #[test]
    fn missing_blob_reads_as_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalClipStore::new(dir.path());
        let err = store.read("sessions/s1/events/ghost.webm").unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
    }

    #[test]
    fn rewrite_replaces_content_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalClipStore::new(dir.path());
        store.write("a/b.webm", b"first").unwrap();
        store.write("a/b.webm", b"second").unwrap();
        assert_eq!(store.read("a/b.webm").unwrap(), b"second");
    }
}
