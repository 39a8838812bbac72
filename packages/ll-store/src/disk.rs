use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use tempfile::NamedTempFile;

use crate::{LLError, LLLister, LLReader, LLRemover, LLWriter};

/// Longest encoded file name we are willing to create.
const MAX_FILE_NAME: usize = 240;

/// Encoded names carry this marker so that empty components still map to a
/// valid file name and temporary files can never collide with entries.
const NAME_MARKER: char = 'k';

/// Leading pieces of a component too long for one file name.
const CHUNK_MARKER: char = 'c';

/// An LL backend storing one file per entry beneath a root directory.
///
/// Every path component becomes one directory level, encoded as URL-safe
/// base64. A component whose encoding does not fit in one file name is
/// split over nested `c`-prefixed directories, the last piece carrying the
/// usual marker. Writes land in a temporary file first and are persisted
/// into place, so readers see either the old or the new contents.
#[derive(Debug)]
pub struct DiskLLStore {
    root: PathBuf,
}

impl DiskLLStore {
    /// Create a fresh backend. Fails if `root` already exists.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, LLError> {
        let root = root.into();
        if root.exists() {
            return Err(LLError::RootExists { root });
        }
        fs::create_dir_all(&root)?;
        tracing::debug!(root = %root.display(), "created disk backend");
        Ok(Self { root })
    }

    /// Open an existing backend.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LLError> {
        let root = root.into();
        match fs::metadata(&root) {
            Ok(metadata) if metadata.is_dir() => Ok(Self { root }),
            Ok(_) => Err(LLError::RootMissing { root }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(LLError::RootMissing { root }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a backend and everything in it.
    pub fn destroy(root: impl AsRef<Path>) -> Result<(), LLError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(LLError::RootMissing {
                root: root.to_path_buf(),
            });
        }
        fs::remove_dir_all(root)?;
        tracing::debug!(root = %root.display(), "destroyed disk backend");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn encode(component: &[u8], file_path: &mut PathBuf) {
        let encoded = URL_SAFE_NO_PAD.encode(component);
        let mut rest = encoded.as_str();
        while rest.len() >= MAX_FILE_NAME {
            let (head, tail) = rest.split_at(MAX_FILE_NAME - 1);
            file_path.push(format!("{}{}", CHUNK_MARKER, head));
            rest = tail;
        }
        file_path.push(format!("{}{}", NAME_MARKER, rest));
    }

    fn file_path(&self, path: &[&[u8]]) -> PathBuf {
        let mut file_path = self.root.clone();
        for component in path {
            Self::encode(component, &mut file_path);
        }
        file_path
    }

    /// Collect entry names below `dir`, following chunk directories.
    fn collect(dir: &Path, prefix: &str, names: &mut Vec<Bytes>) -> Result<(), LLError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                tracing::trace!(?file_name, "skipping foreign file");
                continue;
            };
            if file_type.is_dir() {
                if let Some(piece) = name.strip_prefix(CHUNK_MARKER) {
                    Self::collect(&entry.path(), &format!("{}{}", prefix, piece), names)?;
                }
                continue;
            }
            let decoded = name
                .strip_prefix(NAME_MARKER)
                .filter(|_| file_type.is_file())
                .and_then(|piece| URL_SAFE_NO_PAD.decode(format!("{}{}", prefix, piece)).ok());
            match decoded {
                Some(decoded) => names.push(Bytes::from(decoded)),
                None => tracing::trace!(?file_name, "skipping foreign file"),
            }
        }
        Ok(())
    }
}

impl LLReader for DiskLLStore {
    fn ll_read(&mut self, path: &[&[u8]]) -> Result<Option<Bytes>, LLError> {
        let file_path = self.file_path(path);
        match fs::read(&file_path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            // A directory at this path means only deeper entries exist.
            Err(_) if file_path.is_dir() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl LLWriter for DiskLLStore {
    fn ll_write(&mut self, path: &[&[u8]], data: Bytes) -> Result<(), LLError> {
        let file_path = self.file_path(path);
        let parent = file_path.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(parent)?;

        let mut file = NamedTempFile::new_in(parent)?;
        file.write_all(&data)?;
        file.persist(&file_path).map_err(|e| LLError::from(e.error))?;
        Ok(())
    }
}

impl LLRemover for DiskLLStore {
    fn ll_remove(&mut self, path: &[&[u8]]) -> Result<bool, LLError> {
        let file_path = self.file_path(path);
        match fs::remove_file(&file_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl LLLister for DiskLLStore {
    fn ll_list(&mut self, prefix: &[&[u8]]) -> Result<Vec<Bytes>, LLError> {
        let dir = self.file_path(prefix);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        Self::collect(&dir, "", &mut names)?;
        names.sort();
        Ok(names)
    }
}
