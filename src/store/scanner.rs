//! Newline delimited JSON readers for chunk and event info files.

use crate::pattern::{PatternWithMeta, UserAndEventsInfo};
use crate::store::error::StoreError;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Longest accepted chunk line.
pub const MAX_PATTERN_BYTES: usize = 20 * 1024 * 1024;
/// Longest accepted event info line.
pub const MAX_EVENT_INFO_BYTES: usize = 250 * 1024 * 1024;

/// Reads `\n` terminated lines, refusing lines longer than `limit` bytes.
pub struct LineScanner<R> {
    reader: R,
    limit: usize,
    line_number: usize,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineScanner<R> {
    pub fn new(reader: R, limit: usize) -> Self {
        Self {
            reader,
            limit,
            line_number: 0,
            buf: Vec::new(),
        }
    }

    /// The next line without its terminator, with its 1-based line number.
    pub async fn next_line(&mut self) -> Result<Option<(usize, &[u8])>, StoreError> {
        self.buf.clear();

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                break;
            }

            let newline = available.iter().position(|b| *b == b'\n');
            let (line_part, consumed, complete) = match newline {
                Some(end) => (&available[..end], end + 1, true),
                None => (available, available.len(), false),
            };

            if self.buf.len() + line_part.len() > self.limit {
                return Err(StoreError::LineTooLong {
                    line: self.line_number + 1,
                    limit: self.limit,
                });
            }

            self.buf.extend_from_slice(line_part);
            self.reader.consume(consumed);

            if complete {
                break;
            }
        }

        self.line_number += 1;

        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }

        Ok(Some((self.line_number, &self.buf)))
    }
}

fn decode_line<T: serde::de::DeserializeOwned>(
    line: &[u8],
    line_number: usize,
) -> Result<T, StoreError> {
    serde_json::from_slice(line).map_err(|e| StoreError::Decode {
        line: line_number,
        source: Arc::new(e),
    })
}

/// Every pattern line of a chunk file, in file order. Blank lines are skipped.
pub async fn read_patterns_with_meta(
    reader: impl AsyncBufRead + Unpin,
) -> Result<Vec<PatternWithMeta>, StoreError> {
    let mut scanner = LineScanner::new(reader, MAX_PATTERN_BYTES);
    let mut patterns = Vec::new();

    while let Some((line_number, line)) = scanner.next_line().await? {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        patterns.push(decode_line(line, line_number)?);
    }

    Ok(patterns)
}

/// The event info of a model. The last non-blank line wins, an empty file is an empty summary.
pub async fn read_event_info(
    reader: impl AsyncBufRead + Unpin,
) -> Result<UserAndEventsInfo, StoreError> {
    let mut scanner = LineScanner::new(reader, MAX_EVENT_INFO_BYTES);
    let mut event_info = UserAndEventsInfo::default();

    while let Some((line_number, line)) = scanner.next_line().await? {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        event_info = decode_line(line, line_number)?;
    }

    Ok(event_info)
}

/// Encodes records as newline delimited JSON, the inverse of the readers above.
pub fn encode_lines<'a, T: Serialize + 'a>(
    records: impl IntoIterator<Item = &'a T>,
) -> Result<Vec<u8>, serde_json::Error> {
    let mut content = Vec::new();

    for record in records {
        serde_json::to_writer(&mut content, record)?;
        content.push(b'\n');
    }

    Ok(content)
}
