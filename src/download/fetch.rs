//! Streams one URL into a temporary file through the shared rate limiter.

use std::path::Path;

use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::JobError;
use super::rate_limiter::RateLimiter;
use super::transport::Transport;

/// Current length of `path`, or zero when it does not exist.
async fn existing_len(path: &Path) -> Result<u64, JobError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(JobError::io(path, e)),
    }
}

/// Removes `path` if it exists.
pub(crate) async fn remove_stale(path: &Path) -> Result<(), JobError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale partial file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(JobError::io(path, e)),
    }
}

/// Transfers `url` into `path` and returns the final file length.
///
/// An existing file is resumed when the transport honours the offset and
/// truncated otherwise. `progress` receives `(bytes_done, bytes_total)` after
/// every chunk; `bytes_done` includes the resume offset.
///
/// The cancellation token is checked before each chunk is read, so a chunk
/// that was received is always written. The partial file is left in place on
/// error and on cancellation.
pub(crate) async fn fetch_to_file(
    transport: &dyn Transport,
    rate_limiter: &RateLimiter,
    url: &str,
    path: &Path,
    progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    cancel: &CancellationToken,
) -> Result<u64, JobError> {
    let offset = existing_len(path).await?;

    let transfer = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(JobError::Cancelled),
        opened = transport.open(url, offset) => opened?,
    };

    let resumed = offset > 0 && transfer.offset_honoured;
    let mut file = if resumed {
        debug!(offset, path = %path.display(), "resuming partial transfer");
        OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(|e| JobError::io(path, e))?
    } else {
        if offset > 0 {
            debug!(offset, path = %path.display(), "offset not honoured, restarting from zero");
        }
        File::create(path)
            .await
            .map_err(|e| JobError::io(path, e))?
    };

    let total = transfer.total;
    let mut done = if resumed { offset } else { 0 };
    progress(done, total);

    let mut chunks = transfer.chunks;
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = file.flush().await;
                return Err(JobError::Cancelled);
            }
            next = chunks.next() => match next {
                Some(chunk) => chunk?,
                None => break,
            },
        };
        if chunk.is_empty() {
            continue;
        }

        let len = chunk.len() as u64;
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = file.flush().await;
                return Err(JobError::Cancelled);
            }
            () = rate_limiter.acquire(len) => {}
        }

        file.write_all(&chunk)
            .await
            .map_err(|e| JobError::io(path, e))?;
        done += len;
        progress(done, total);
    }

    file.flush().await.map_err(|e| JobError::io(path, e))?;

    if let Some(expected) = total
        && done < expected
    {
        return Err(JobError::transient(
            url,
            format!("connection closed after {done} of {expected} bytes"),
        ));
    }
    Ok(done)
}
