//! Chunked streaming of a response body to disk.
//!
//! Bodies are written to `{target}.temp` and only renamed to the final
//! path once the byte count matches the declared content length. A partial
//! file is never promoted; it stays under the temp name for operator
//! follow-up or later resumption.

use std::path::{Path, PathBuf};

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::fs::FileSystem;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;

/// Ascending (size threshold, chunk size) table: finer granularity for
/// small files, coarser for large ones.
const CHUNK_THRESHOLDS: [(u64, usize); 5] = [
    (MB, 16 * KB as usize),
    (10 * MB, 64 * KB as usize),
    (50 * MB, 128 * KB as usize),
    (100 * MB, 256 * KB as usize),
    (250 * MB, 512 * KB as usize),
];

const LARGE_FILE_CHUNK_SIZE: usize = MB as usize;

/// Picks the write-chunk size for a file of `file_size` bytes.
///
/// An unknown content length gets the finest granularity.
#[must_use]
pub fn get_chunk_size(file_size: Option<u64>) -> usize {
    let size = file_size.unwrap_or(0);
    for (threshold, chunk_size) in CHUNK_THRESHOLDS {
        if size < threshold {
            return chunk_size;
        }
    }
    LARGE_FILE_CHUNK_SIZE
}

/// Returns the temp-file path for `target`.
#[must_use]
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".temp");
    PathBuf::from(name)
}

/// Streams `response` to `target_path`, reporting cumulative percentage
/// through `progress_sink` after every chunk.
///
/// Returns `true` when the download ended short of the declared content
/// length (the temp file is left in place), `false` when the file was
/// fully written and promoted. With no declared length, a stream that ends
/// without error counts as complete.
///
/// # Errors
///
/// Returns an error for local I/O failures (create, write, rename).
/// Network-level stream interruptions are not errors; they yield
/// `Ok(true)`.
pub async fn save<F: FileSystem>(
    fs: &F,
    response: reqwest::Response,
    target_path: &Path,
    mut progress_sink: impl FnMut(f64) + Send,
) -> Result<bool> {
    let content_length = response.content_length();
    if content_length.is_none() {
        log::warn!(
            "no content length for {}, completion judged by stream end",
            target_path.display()
        );
    }
    let chunk_size = get_chunk_size(content_length);

    let temp = temp_path(target_path);
    let mut file = fs.create_file(&temp).await?;
    let mut stream = response.bytes_stream();

    let mut buffer = BytesMut::with_capacity(chunk_size);
    let mut total_written: u64 = 0;
    let mut interrupted = false;

    loop {
        match stream.next().await {
            Some(Ok(bytes)) => {
                buffer.extend_from_slice(&bytes);
                while buffer.len() >= chunk_size {
                    let chunk = buffer.split_to(chunk_size);
                    file.write_all(&chunk).await?;
                    total_written += chunk.len() as u64;
                    report(&mut progress_sink, total_written, content_length);
                }
            }
            Some(Err(e)) => {
                log::warn!("stream interrupted for {}: {e}", target_path.display());
                interrupted = true;
                break;
            }
            None => break,
        }
    }

    if !buffer.is_empty() {
        file.write_all(&buffer).await?;
        total_written += buffer.len() as u64;
        report(&mut progress_sink, total_written, content_length);
    }
    file.flush().await?;
    drop(file);

    let complete = match content_length {
        Some(expected) => !interrupted && total_written == expected,
        None => !interrupted,
    };

    if complete {
        fs.rename_file(&temp, target_path).await?;
        progress_sink(100.0);
        Ok(false)
    } else {
        Ok(true)
    }
}

#[allow(clippy::cast_precision_loss)]
fn report(progress_sink: &mut impl FnMut(f64), written: u64, content_length: Option<u64>) {
    if let Some(total) = content_length
        && total > 0
    {
        progress_sink((written as f64 / total as f64) * 100.0);
    }
}
