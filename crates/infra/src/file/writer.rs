//! Restartable report file writer.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nightbatch_batch::{ExecutionContext, ItemWriter};
use nightbatch_core::ItemError;
use tracing::debug;

use super::io_item_error;

/// Appends report lines to a file, one `\n`-terminated line per string.
///
/// `flush` writes the staged bytes at the committed length and syncs them.
/// The committed length is checkpointed under `{name}.bytes`; on open the
/// file is cut back to it, which drops whatever a crashed run wrote after
/// its last commit.
pub struct ReportFileWriter {
    path: PathBuf,
    key: String,
    file: Option<File>,
    committed: u64,
    staged: Vec<u8>,
}

impl ReportFileWriter {
    pub fn new(name: &str, path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            key: format!("{name}.bytes"),
            file: None,
            committed: 0,
            staged: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File, ItemError> {
        let path = &self.path;
        self.file
            .as_mut()
            .ok_or_else(|| ItemError::unclassified(format!("{} written before open", path.display())))
    }
}

impl ItemWriter for ReportFileWriter {
    type Item = Vec<String>;

    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| io_item_error(&format!("create {}", dir.display()), e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| io_item_error(&format!("open {}", self.path.display()), e))?;
        self.committed = context.get_u64(&self.key).unwrap_or(0);
        file.set_len(self.committed)
            .map_err(|e| io_item_error("truncate to checkpoint", e))?;
        debug!(path = %self.path.display(), committed = self.committed, "report file open");
        self.file = Some(file);
        self.staged.clear();
        Ok(())
    }

    fn write(&mut self, items: &[Vec<String>]) -> Result<(), ItemError> {
        for line in items.iter().flatten() {
            self.staged.extend_from_slice(line.as_bytes());
            self.staged.push(b'\n');
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ItemError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let committed = self.committed;
        let staged = std::mem::take(&mut self.staged);
        let result = (|| {
            let file = self.file()?;
            // Drop a tail left by an earlier failed flush.
            file.set_len(committed)
                .and_then(|_| file.seek(SeekFrom::Start(committed)))
                .and_then(|_| file.write_all(&staged))
                .and_then(|_| file.sync_data())
                .map_err(|e| io_item_error("write report", e))
        })();
        match result {
            Ok(()) => {
                self.committed += staged.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.staged = staged;
                Err(e)
            }
        }
    }

    fn rollback(&mut self) {
        self.staged.clear();
    }

    /// Runs before `flush`, so it records the length the file will have
    /// once the staged lines are durable.
    fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        context.put_u64(self.key.clone(), self.committed + self.staged.len() as u64);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ItemError> {
        self.file = None;
        Ok(())
    }
}
