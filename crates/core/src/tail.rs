// crates/core/src/tail.rs
//! Incremental and backward transcript readers.
//!
//! `read_new_lines` implements the watcher's offset protocol: read only the
//! bytes appended since the last poll, hand back complete lines, and leave a
//! trailing partial line for the next call. `tail_lines` reads the last N
//! lines backward in chunks for the initial-status tail scan. `head_lines`
//! reads the first N lines for metadata extraction.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Chunk size for backward reading.
const TAIL_CHUNK: u64 = 4 * 1024;

/// Read complete lines appended since `offset`.
///
/// Returns the lines and the new byte offset to pass on the next call. A
/// trailing partial line (no terminating newline yet) is not consumed. If the
/// file shrank below `offset` (truncation/rotation), rewinds to 0 and reads
/// the whole file.
///
/// Synchronous I/O — call from `tokio::task::spawn_blocking`.
pub fn read_new_lines(path: &Path, offset: u64) -> io::Result<(Vec<String>, u64)> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    if offset > file_len {
        tracing::warn!(
            path = %path.display(),
            old_offset = offset,
            new_file_len = file_len,
            "file shrank below offset — rewinding to start"
        );
        return read_new_lines(path, 0);
    }
    if offset == file_len {
        return Ok((Vec::new(), offset));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; (file_len - offset) as usize];
    file.read_exact(&mut buf)?;

    // Anything past the last newline is a partial write; leave it for the
    // next poll so we never parse half a JSON object.
    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        return Ok((Vec::new(), offset));
    };
    let new_offset = offset + last_newline as u64 + 1;

    let lines = buf[..=last_newline]
        .split(|&b| b == b'\n')
        .filter(|raw| !raw.is_empty())
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .collect();

    Ok((lines, new_offset))
}

/// Read the first `n` lines of a file (metadata lives in the head).
///
/// Returns the lines and the byte offset just past the last one, so callers
/// can continue tailing from there.
pub fn head_lines(path: &Path, n: usize) -> io::Result<(Vec<String>, u64)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::with_capacity(n);
    let mut offset = 0u64;

    for _ in 0..n {
        let mut line = String::new();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        offset += read as u64;
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }

    Ok((lines, offset))
}

/// Read the last `n` non-empty lines without loading the entire file.
///
/// Walks the file backward one chunk at a time, peeling complete lines off
/// each chunk as it goes and stopping as soon as `n` lines are in hand. A
/// line cut by a chunk boundary is carried into the next (earlier) chunk
/// until its starting newline turns up, so lines longer than the chunk size
/// assemble correctly. Blank lines are dropped, which also makes a trailing
/// newline at EOF a non-event. Returns lines oldest first.
pub async fn tail_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut file = tokio::fs::File::open(path).await?;
    let mut pos = file.metadata().await?.len();

    // Complete lines, newest first.
    let mut lines: Vec<String> = Vec::new();
    // Bytes of the line whose start lies before the region read so far.
    let mut carry: Vec<u8> = Vec::new();

    while pos > 0 && lines.len() < n {
        let take = pos.min(TAIL_CHUNK);
        pos -= take;

        file.seek(SeekFrom::Start(pos)).await?;
        let mut chunk = vec![0u8; take as usize];
        file.read_exact(&mut chunk).await?;

        // The carry continues directly after this chunk's last byte.
        chunk.extend_from_slice(&carry);

        let mut segments = chunk.split(|&b| b == b'\n');
        // The first segment may still be missing its head; it becomes the
        // next carry. Everything after it is a complete line.
        let head = segments.next().unwrap_or_default().to_vec();
        let complete: Vec<&[u8]> = segments.collect();
        for segment in complete.into_iter().rev() {
            if lines.len() == n {
                break;
            }
            if !segment.is_empty() {
                lines.push(String::from_utf8_lossy(segment).into_owned());
            }
        }
        carry = head;
    }

    // Reached the start of the file: the carry is the earliest line.
    if pos == 0 && !carry.is_empty() && lines.len() < n {
        lines.push(String::from_utf8_lossy(&carry).into_owned());
    }

    lines.reverse();
    Ok(lines)
}
