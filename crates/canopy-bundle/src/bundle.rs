//! Running the build and staging its output.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, warn};

use canopy_core::config::BuildConfig;
use canopy_state::BlobStore;

use crate::error::{BuildError, UploadError};
use crate::fileset::FileSet;

/// Lines of build stderr kept in a [`BuildError::Failed`].
const STDERR_TAIL_LINES: usize = 20;

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// What an upload wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub generation: String,
    pub keys: Vec<String>,
    pub bytes: u64,
    /// Puts that had to be repeated.
    pub retries: u32,
}

/// The site's static assets: how to build them and where they go.
#[derive(Debug, Clone)]
pub struct AssetBundle {
    command: String,
    working_dir: PathBuf,
    output_dir: PathBuf,
    static_prefix: String,
    retry_backoff: Duration,
}

impl AssetBundle {
    pub fn new(command: &str, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.to_string(),
            working_dir: working_dir.into(),
            output_dir: PathBuf::from("public"),
            static_prefix: "_static".to_string(),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Paths in `config` are resolved against `base`.
    pub fn from_config(config: &BuildConfig, base: &Path) -> Self {
        Self::new(&config.command, base.join(&config.working_dir))
            .with_output_dir(&config.output_dir)
            .with_static_prefix(&config.static_prefix)
    }

    /// Output directory, relative to the working directory.
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_static_prefix(mut self, prefix: &str) -> Self {
        self.static_prefix = prefix.trim_matches('/').to_string();
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn static_prefix(&self) -> &str {
        &self.static_prefix
    }

    pub fn output_path(&self) -> PathBuf {
        self.working_dir.join(&self.output_dir)
    }

    /// Run the build command through `sh -c` and capture the output
    /// directory.
    ///
    /// The command gets a private `TMPDIR` that is removed when this
    /// returns, whether the build succeeded or not. Blocks until the
    /// command exits.
    pub fn build(&self) -> Result<FileSet, BuildError> {
        if !self.working_dir.is_dir() {
            return Err(BuildError::WorkingDir(self.working_dir.clone()));
        }
        let scratch = tempfile::Builder::new()
            .prefix("canopy-build-")
            .tempdir()
            .map_err(BuildError::Environment)?;

        info!(command = %self.command, dir = %self.working_dir.display(), "running build");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .env("TMPDIR", scratch.path());
        debug!(?cmd, "build command");

        let output = cmd.output().map_err(|source| BuildError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.trim_end().lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            warn!(command = %self.command, code = ?output.status.code(), "build failed");
            return Err(BuildError::Failed {
                command: self.command.clone(),
                exit_code: output.status.code(),
                stderr: tail,
            });
        }

        let files = FileSet::collect(&self.output_path())?;
        info!(
            files = files.len(),
            bytes = files.total_bytes(),
            generation = files.generation(),
            "build output captured"
        );
        Ok(files)
    }

    /// Object key for one file: `{generation}/{static_prefix}/{path}`.
    pub fn object_key(&self, generation: &str, relative_path: &str) -> String {
        format!("{generation}/{}/{relative_path}", self.static_prefix)
    }

    /// Put every file of `files` under its generation prefix.
    ///
    /// Each put is retried up to `max_attempts` times. Puts overwrite by
    /// key, so repeating one is harmless. On error some keys of the new
    /// generation may exist; nothing outside it was touched.
    pub fn upload(
        &self,
        files: &FileSet,
        store: &dyn BlobStore,
        max_attempts: u32,
    ) -> Result<UploadReport, UploadError> {
        let max_attempts = max_attempts.max(1);
        let generation = files.generation().to_string();
        let mut report = UploadReport {
            generation: generation.clone(),
            keys: Vec::with_capacity(files.len()),
            bytes: 0,
            retries: 0,
        };

        for file in files.files() {
            let key = self.object_key(&generation, &file.relative_path);
            let mut attempt = 1;
            loop {
                match store.put(&key, &file.bytes) {
                    Ok(()) => break,
                    Err(source) if attempt >= max_attempts => {
                        warn!(%key, attempts = attempt, error = %source, "upload failed");
                        return Err(UploadError {
                            key,
                            attempts: attempt,
                            source,
                        });
                    }
                    Err(e) => {
                        debug!(%key, attempt, error = %e, "put failed, retrying");
                        std::thread::sleep(self.retry_backoff * attempt);
                        attempt += 1;
                        report.retries += 1;
                    }
                }
            }
            report.bytes += file.bytes.len() as u64;
            report.keys.push(key);
        }

        info!(
            %generation,
            keys = report.keys.len(),
            bytes = report.bytes,
            retries = report.retries,
            "upload complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;

    use canopy_state::{StateError, StateResult, StateStore};

    fn bundle(dir: &Path, command: &str) -> AssetBundle {
        AssetBundle::new(command, dir).with_retry_backoff(Duration::ZERO)
    }

    #[test]
    fn build_captures_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let files = bundle(
            dir.path(),
            "mkdir -p public/build && printf '<h1>hi</h1>' > public/index.html && printf 'x' > public/build/app.js",
        )
        .build()
        .unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files.files()[1].relative_path, "index.html");
        assert_eq!(files.files()[1].bytes, b"<h1>hi</h1>");
    }

    #[test]
    fn non_zero_exit_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = bundle(dir.path(), "echo 'cannot resolve ./routes' >&2; exit 3")
            .build()
            .unwrap_err();
        match err {
            BuildError::Failed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.contains("cannot resolve"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn missing_output_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = bundle(dir.path(), "true").build().unwrap_err();
        assert!(matches!(err, BuildError::MissingOutput(_)));
    }

    #[test]
    fn missing_working_dir_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = bundle(&dir.path().join("nope"), "true").build().unwrap_err();
        assert!(matches!(err, BuildError::WorkingDir(_)));
    }

    #[test]
    fn scratch_dir_is_removed_on_every_exit() {
        let dir = tempfile::tempdir().unwrap();
        for command in [
            "printf %s \"$TMPDIR\" > scratch.txt && touch \"$TMPDIR/x\" && mkdir -p public",
            "printf %s \"$TMPDIR\" > scratch.txt && touch \"$TMPDIR/x\" && exit 1",
        ] {
            let _ = bundle(dir.path(), command).build();
            let scratch = fs::read_to_string(dir.path().join("scratch.txt")).unwrap();
            assert!(!scratch.is_empty());
            assert!(!Path::new(&scratch).exists(), "{scratch} left behind");
        }
    }

    fn site_files() -> FileSet {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        fs::write(dir.path().join("robots.txt"), "User-agent: *").unwrap();
        FileSet::collect(dir.path()).unwrap()
    }

    #[test]
    fn upload_stages_under_generation() {
        let store = StateStore::open_in_memory().unwrap();
        let files = site_files();
        let bundle = bundle(Path::new("."), "true");

        let report = bundle.upload(&files, &store, 3).unwrap();
        let key = format!("{}/_static/index.html", files.generation());
        assert_eq!(report.keys.len(), 2);
        assert!(report.keys.contains(&key));
        assert_eq!(report.retries, 0);
        assert_eq!(store.get_object(&key).unwrap().unwrap(), b"<h1>hi</h1>");
        assert!(store.get_object("_static/index.html").unwrap().is_none());
    }

    /// Fails the first `failures` puts of each key.
    struct FlakyStore {
        inner: StateStore,
        failures: u32,
        seen: Mutex<HashMap<String, u32>>,
    }

    impl BlobStore for FlakyStore {
        fn put(&self, key: &str, bytes: &[u8]) -> StateResult<()> {
            let mut seen = self.seen.lock().unwrap();
            let count = seen.entry(key.to_string()).or_default();
            *count += 1;
            if *count <= self.failures {
                return Err(StateError::Write("throttled".into()));
            }
            self.inner.put(key, bytes)
        }

        fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }
    }

    #[test]
    fn upload_retries_transient_failures() {
        let store = FlakyStore {
            inner: StateStore::open_in_memory().unwrap(),
            failures: 2,
            seen: Mutex::new(HashMap::new()),
        };
        let files = site_files();
        let report = bundle(Path::new("."), "true").upload(&files, &store, 3).unwrap();
        assert_eq!(report.retries, 4);
        assert_eq!(report.keys.len(), 2);
    }

    #[test]
    fn upload_gives_up_after_max_attempts() {
        let store = FlakyStore {
            inner: StateStore::open_in_memory().unwrap(),
            failures: 5,
            seen: Mutex::new(HashMap::new()),
        };
        let files = site_files();
        let err = bundle(Path::new("."), "true")
            .upload(&files, &store, 2)
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(err.key.ends_with("/_static/index.html"));
    }
}
