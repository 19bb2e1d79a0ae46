//! Captured build output.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::BuildError;

/// Hex characters of the content digest used as the generation name.
const GENERATION_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path below the output directory, always `/`-separated.
    pub relative_path: String,
    pub bytes: Vec<u8>,
}

/// The files of one build, sorted by path, with a content-derived
/// generation name.
///
/// Two builds with identical output share a generation.
#[derive(Debug, Clone)]
pub struct FileSet {
    root: PathBuf,
    files: Vec<FileEntry>,
    generation: String,
}

impl FileSet {
    /// Read every regular file below `root`.
    pub fn collect(root: &Path) -> Result<Self, BuildError> {
        if !root.is_dir() {
            return Err(BuildError::MissingOutput(root.to_path_buf()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| BuildError::Capture {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| BuildError::Capture {
                    path: entry.path().to_path_buf(),
                    reason: e.to_string(),
                })?;
            let relative_path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = std::fs::read(entry.path()).map_err(|e| BuildError::Capture {
                path: entry.path().to_path_buf(),
                reason: e.to_string(),
            })?;
            files.push(FileEntry {
                relative_path,
                bytes,
            });
        }
        Ok(Self::from_entries(root, files))
    }

    pub fn from_entries(root: &Path, mut files: Vec<FileEntry>) -> Self {
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let generation = generation_of(&files);
        Self {
            root: root.to_path_buf(),
            files,
            generation,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes.len() as u64).sum()
    }
}

/// Whether `name` has the shape of a generation name.
pub fn is_generation(name: &str) -> bool {
    name.len() == GENERATION_LEN && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn generation_of(files: &[FileEntry]) -> String {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.relative_path.as_bytes());
        hasher.update([0]);
        hasher.update(Sha256::digest(&file.bytes));
    }
    let mut generation = hex::encode(hasher.finalize());
    generation.truncate(GENERATION_LEN);
    generation
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("build/assets")).unwrap();
        fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        fs::write(dir.path().join("build/assets/app.js"), "console.log(1)").unwrap();
        dir
    }

    #[test]
    fn collects_sorted_relative_paths() {
        let dir = site();
        let files = FileSet::collect(dir.path()).unwrap();
        let paths: Vec<_> = files.files().iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["build/assets/app.js", "index.html"]);
        assert_eq!(files.total_bytes(), 11 + 14);
        assert_eq!(files.generation().len(), 16);
    }

    #[test]
    fn generation_names_are_recognised() {
        let files = FileSet::from_entries(
            Path::new("public"),
            vec![FileEntry {
                relative_path: "a.txt".into(),
                bytes: b"a".to_vec(),
            }],
        );
        assert!(is_generation(files.generation()));
        assert!(!is_generation("_static"));
        assert!(!is_generation("0123456789ABCDEF"));
        assert!(!is_generation("0123456789abcdef0"));
    }

    #[test]
    fn generation_follows_content() {
        let dir = site();
        let first = FileSet::collect(dir.path()).unwrap();
        let again = FileSet::collect(dir.path()).unwrap();
        assert_eq!(first.generation(), again.generation());

        fs::write(dir.path().join("index.html"), "<h1>changed</h1>").unwrap();
        let changed = FileSet::collect(dir.path()).unwrap();
        assert_ne!(first.generation(), changed.generation());
    }

    #[test]
    fn missing_root_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSet::collect(&dir.path().join("public")).unwrap_err();
        assert!(matches!(err, BuildError::MissingOutput(_)));
    }
}
