//! Byte movement between a local file and an established channel
//!
//! The send path streams the transfer window of the source file into the
//! channel. The receive path writes exactly the declared number of bytes
//! into the target file and verifies the offered digest. Both paths close
//! their file handle and channel before returning, whatever the result.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jingle_common::protocol::{FileElement, HashElement};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::registry::{ActiveTransfer, TransferDirection};
use crate::digest::DigestService;
use crate::error::TransferFailure;
use crate::transports::ByteChannel;

/// Everything one transfer needs
pub(crate) struct TransferJob {
    pub channel: ByteChannel,
    pub direction: TransferDirection,
    pub path: PathBuf,
    pub file: FileElement,
    pub chunk_size: usize,
    /// Minimum bytes between progress callbacks (0 = every chunk)
    pub progress_interval: u64,
    pub digests: Arc<dyn DigestService>,
    pub active: Arc<ActiveTransfer>,
}

/// Progress bookkeeping shared by both directions
struct Progress<'a, F> {
    active: &'a ActiveTransfer,
    total: u64,
    interval: u64,
    last_reported: u64,
    notify: F,
}

impl<F: Fn(u64, u64)> Progress<'_, F> {
    fn advance(&mut self, bytes: u64) {
        let done = self.active.add_bytes_transferred(bytes);
        if done - self.last_reported >= self.interval.max(1) || done == self.total {
            self.last_reported = done;
            (self.notify)(done, self.total);
        }
    }
}

/// Run a transfer to completion and return the number of bytes moved
pub(crate) async fn run<F>(job: TransferJob, on_progress: F) -> Result<u64, TransferFailure>
where
    F: Fn(u64, u64) + Send,
{
    let TransferJob {
        mut channel,
        direction,
        path,
        file,
        chunk_size,
        progress_interval,
        digests,
        active,
    } = job;

    let Some((offset, length)) = file.transfer_window() else {
        return Err(TransferFailure::MissingSize);
    };
    let mut progress = Progress {
        active: &active,
        total: length,
        interval: progress_interval,
        last_reported: 0,
        notify: on_progress,
    };
    let chunk_size = chunk_size.max(1);

    debug!(
        path = %path.display(),
        %direction,
        offset,
        length,
        chunk_size,
        "transfer starting"
    );
    match direction {
        TransferDirection::Send => {
            send(&mut channel, &path, offset, length, chunk_size, &mut progress).await
        }
        TransferDirection::Receive => {
            let received = receive(
                &mut channel,
                &path,
                &file,
                (offset, length),
                chunk_size,
                digests.as_ref(),
                &mut progress,
            )
            .await;
            // Let the sender see end-of-stream even when we bail out early
            let _ = channel.shutdown().await;
            received
        }
    }
}

async fn send<F: Fn(u64, u64)>(
    channel: &mut ByteChannel,
    path: &Path,
    offset: u64,
    length: u64,
    chunk_size: usize,
    progress: &mut Progress<'_, F>,
) -> Result<u64, TransferFailure> {
    let mut source = File::open(path).await?;
    if offset > 0 {
        source.seek(SeekFrom::Start(offset)).await?;
    }

    let mut buffer = vec![0u8; chunk_size];
    let mut sent = 0u64;
    while sent < length {
        let to_read = (length - sent).min(chunk_size as u64) as usize;
        let read = source.read(&mut buffer[..to_read]).await?;
        if read == 0 {
            break;
        }
        channel.write_all(&buffer[..read]).await?;
        sent += read as u64;
        progress.advance(read as u64);
    }
    channel.flush().await?;
    channel.shutdown().await?;

    if sent != length {
        return Err(TransferFailure::SizeMismatch {
            expected: length,
            actual: sent,
        });
    }
    Ok(sent)
}

/// Removes a freshly written target unless disarmed
///
/// Covers early returns as well as the receive future being dropped on
/// cancellation.
struct DiscardOnDrop<'a> {
    path: Option<&'a Path>,
}

impl DiscardOnDrop<'_> {
    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for DiscardOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(path) = self.path
            && let Err(e) = std::fs::remove_file(path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "failed to discard partial target");
        }
    }
}

async fn receive<F: Fn(u64, u64)>(
    channel: &mut ByteChannel,
    path: &Path,
    file: &FileElement,
    (offset, length): (u64, u64),
    chunk_size: usize,
    digests: &dyn DigestService,
    progress: &mut Progress<'_, F>,
) -> Result<u64, TransferFailure> {
    let usable = |h: &&HashElement| digests.is_supported(h.algorithm);
    let file_hash = file.best_hash(|a| digests.is_supported(a)).cloned();
    let range_hash = file
        .range
        .as_ref()
        .and_then(|r| r.hash.as_ref())
        .filter(usable)
        .cloned();
    let ranged = file.range.is_some();
    let streamed = if ranged { range_hash } else { file_hash.clone() };
    if streamed.is_none() && file_hash.is_none() {
        warn!(path = %path.display(), "no verifiable digest; accepting file unchecked");
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    // A ranged write resumes an existing file, which must survive a failure
    let mut discard = DiscardOnDrop {
        path: (!ranged).then_some(path),
    };
    let mut target = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;
    if ranged {
        // Resumption writes into an existing file; only ever grow it
        let end = offset + length;
        if target.metadata().await?.len() < end {
            target.set_len(end).await?;
        }
        target.seek(SeekFrom::Start(offset)).await?;
    } else {
        target.set_len(length).await?;
    }

    let mut hasher = streamed.as_ref().and_then(|h| digests.hasher(h.algorithm));
    let mut buffer = vec![0u8; chunk_size];
    let mut received = 0u64;
    while received < length {
        let to_read = (length - received).min(chunk_size as u64) as usize;
        let read = match channel.read(&mut buffer[..to_read]).await {
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(e.into()),
        };
        if read == 0 {
            return Err(TransferFailure::ShortRead {
                expected: length,
                received,
            });
        }
        target.write_all(&buffer[..read]).await?;
        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&buffer[..read]);
        }
        received += read as u64;
        progress.advance(read as u64);
    }
    target.flush().await?;
    target.sync_all().await?;
    drop(target);

    if let (Some(expected), Some(hasher)) = (&streamed, hasher)
        && hasher.finalize() != expected.value
    {
        return Err(TransferFailure::DigestMismatch);
    }
    discard.disarm();
    if ranged
        && let (Some(expected), Some(size)) = (&file_hash, file.size)
    {
        let actual = digests
            .compute_file(expected.algorithm, path, 0, size)
            .await?;
        if actual != expected.value {
            return Err(TransferFailure::DigestMismatch);
        }
    }
    Ok(received)
}
