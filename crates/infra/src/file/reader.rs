//! Line-by-line fixed-width record reader.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use nightbatch_batch::{ExecutionContext, ItemReader};
use nightbatch_core::ItemError;
use nightbatch_records::FixedWidthRecord;
use tracing::{debug, warn};

use super::io_item_error;

/// Reads one `T` per line. Lines end in `\n` or `\r\n`; blank lines are
/// ignored.
///
/// The checkpoint holds the byte offset after the last line read and its
/// line number, under `{name}.offset` and `{name}.line`. A line that does
/// not decode is reported with key `line N` and the reader moves past it;
/// an IO error leaves the position where it was.
pub struct FixedWidthFileReader<T> {
    path: PathBuf,
    offset_key: String,
    line_key: String,
    reader: Option<BufReader<File>>,
    offset: u64,
    line: u64,
    buf: Vec<u8>,
    _record: PhantomData<fn() -> T>,
}

impl<T> FixedWidthFileReader<T> {
    pub fn new(name: &str, path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset_key: format!("{name}.offset"),
            line_key: format!("{name}.line"),
            reader: None,
            offset: 0,
            line: 0,
            buf: Vec::new(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines consumed so far, blank ones included.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Move back to the last consumed line after a failed read. If that
    /// fails too the handle is dropped and the reader must be reopened.
    fn reposition(&mut self) {
        let Some(reader) = self.reader.as_mut() else {
            return;
        };
        if let Err(e) = reader.seek(SeekFrom::Start(self.offset)) {
            warn!(path = %self.path.display(), offset = self.offset, error = %e, "cannot reposition input, closing it");
            self.reader = None;
        }
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

impl<T: FixedWidthRecord> ItemReader for FixedWidthFileReader<T> {
    type Item = T;

    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        let file = File::open(&self.path)
            .map_err(|e| io_item_error(&format!("open {}", self.path.display()), e))?;
        let mut reader = BufReader::new(file);
        self.offset = context.get_u64(&self.offset_key).unwrap_or(0);
        self.line = context.get_u64(&self.line_key).unwrap_or(0);
        if self.offset > 0 {
            reader
                .seek(SeekFrom::Start(self.offset))
                .map_err(|e| io_item_error("seek to checkpoint", e))?;
            debug!(path = %self.path.display(), offset = self.offset, line = self.line, "resuming input");
        }
        self.reader = Some(reader);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<T>, ItemError> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Err(ItemError::unclassified(format!(
                    "{} read before open",
                    self.path.display()
                )));
            };
            self.buf.clear();
            let n = match reader.read_until(b'\n', &mut self.buf) {
                Ok(n) => n,
                Err(e) => {
                    self.reposition();
                    return Err(io_item_error(&format!("read {}", self.path.display()), e));
                }
            };
            if n == 0 {
                return Ok(None);
            }
            self.offset += n as u64;
            self.line += 1;

            let line = strip_terminator(&self.buf);
            if line.is_empty() {
                continue;
            }
            let number = self.line;
            return T::decode(line)
                .map(Some)
                .map_err(|e| ItemError::from(e).with_key(format!("line {number}")));
        }
    }

    fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        context.put_u64(self.offset_key.clone(), self.offset);
        context.put_u64(self.line_key.clone(), self.line);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ItemError> {
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightbatch_core::ErrorKind;
    use nightbatch_records::CardXref;
    use std::io::Write;

    fn xref_line(card: &str, account: u64) -> Vec<u8> {
        CardXref {
            card_number: card.into(),
            customer_id: account,
            account_id: account,
        }
        .encode()
        .unwrap()
    }

    fn write_file(lines: &[Vec<u8>], terminator: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            file.write_all(line).unwrap();
            file.write_all(terminator).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn reads_crlf_lines_and_skips_blank_ones() {
        let mut lines = vec![xref_line("4000000000000001", 1)];
        lines.push(Vec::new());
        lines.push(xref_line("4000000000000002", 2));
        let file = write_file(&lines, b"\r\n");

        let mut reader = FixedWidthFileReader::<CardXref>::new("xref", file.path());
        reader.open(&ExecutionContext::new()).unwrap();
        assert_eq!(reader.read().unwrap().unwrap().account_id, 1);
        assert_eq!(reader.read().unwrap().unwrap().account_id, 2);
        assert!(reader.read().unwrap().is_none());
        assert_eq!(reader.line(), 3);
    }

    #[test]
    fn malformed_line_is_keyed_by_line_number_and_passed() {
        let lines = vec![
            xref_line("4000000000000001", 1),
            b"short".to_vec(),
            xref_line("4000000000000003", 3),
        ];
        let file = write_file(&lines, b"\n");

        let mut reader = FixedWidthFileReader::<CardXref>::new("xref", file.path());
        reader.open(&ExecutionContext::new()).unwrap();
        reader.read().unwrap();
        let err = reader.read().unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedRecord);
        assert_eq!(err.key.as_deref(), Some("line 2"));
        assert_eq!(reader.read().unwrap().unwrap().account_id, 3);
    }

    #[test]
    fn resumes_after_the_checkpointed_line() {
        let lines: Vec<Vec<u8>> = (1..=5)
            .map(|n| xref_line(&format!("40000000000000{n:02}"), n))
            .collect();
        let file = write_file(&lines, b"\n");

        let mut first = FixedWidthFileReader::<CardXref>::new("xref", file.path());
        first.open(&ExecutionContext::new()).unwrap();
        first.read().unwrap();
        first.read().unwrap();
        let mut context = ExecutionContext::new();
        first.update(&mut context).unwrap();
        // Read past the checkpoint without committing it.
        first.read().unwrap();

        let mut resumed = FixedWidthFileReader::<CardXref>::new("xref", file.path());
        resumed.open(&context).unwrap();
        let rest: Vec<u64> = std::iter::from_fn(|| resumed.read().unwrap())
            .map(|x| x.account_id)
            .collect();
        assert_eq!(rest, [3, 4, 5]);
        assert_eq!(resumed.line(), 5);
    }

    #[test]
    fn missing_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = FixedWidthFileReader::<CardXref>::new("xref", dir.path().join("none.dat"));
        let err = reader.open(&ExecutionContext::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unclassified);
    }

    #[test]
    fn failed_read_leaves_the_reader_usable_for_errors() {
        // Opening a directory succeeds; reading from it does not.
        let dir = tempfile::tempdir().unwrap();
        let mut reader = FixedWidthFileReader::<CardXref>::new("xref", dir.path());
        reader.open(&ExecutionContext::new()).unwrap();

        let err = reader.read().unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientIo);
        assert_eq!(reader.line(), 0);
        assert!(reader.read().is_err());
    }
}
