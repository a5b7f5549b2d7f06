//! Reading recorded messages from a log file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use debrief_types::Message;

use crate::error::{IndexError, IndexResult};

/// Stream of decoded messages. An `Err` item ends the useful part of the
/// stream.
pub type MessageStream = Box<dyn Iterator<Item = IndexResult<Message>> + Send>;

/// Source of messages for one log file.
pub trait LogReader: Send + Sync {
    fn open(&self, path: &Path) -> IndexResult<MessageStream>;

    /// Read the whole log into memory.
    fn read_all(&self, path: &Path) -> IndexResult<Vec<Message>> {
        self.open(path)?.collect()
    }
}

/// Reads logs stored as one JSON message per line. Blank lines are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesLogReader;

impl LogReader for JsonLinesLogReader {
    fn open(&self, path: &Path) -> IndexResult<MessageStream> {
        let file = File::open(path).map_err(|e| IndexError::io(path, e))?;
        Ok(Box::new(JsonLines {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines().enumerate(),
        }))
    }
}

struct JsonLines {
    path: PathBuf,
    lines: std::iter::Enumerate<std::io::Lines<BufReader<File>>>,
}

impl Iterator for JsonLines {
    type Item = IndexResult<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (line_no, line) = self.lines.next()?;
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(IndexError::io(&self.path, e))),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(|source| IndexError::LogLine {
                path: self.path.clone(),
                line: line_no + 1,
                source,
            }));
        }
    }
}
