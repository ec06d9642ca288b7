//! On-disk storage for persisted batches.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directory holding persisted batch files awaiting upload.
///
/// Files are written to a temporary name and renamed into place, so a
/// partially written batch is never visible under its final name.
#[derive(Debug, Clone)]
pub struct BatchDirectory {
    dir: PathBuf,
}

impl BatchDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write `payload` to `{dir}/{name}` and return the final path.
    pub fn persist(&self, payload: &[u8], name: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let final_path = self.dir.join(name);
        let tmp_path = self.dir.join(format!(".{name}.tmp"));
        fs::write(&tmp_path, payload)?;
        fs::rename(&tmp_path, &final_path)?;

        tracing::debug!(path = ?final_path, bytes = payload.len(), "Persisted batch");
        Ok(final_path)
    }

    /// Persisted batch files with the given extension, oldest name first.
    pub fn pending(&self, extension: &str) -> io::Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == extension).unwrap_or(false))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| !n.starts_with('.'))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Delete a batch file after it has been uploaded.
    pub fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}
