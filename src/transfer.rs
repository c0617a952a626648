// Transfer logic: building the remote path, creating the destination
// folder and streaming a reader to the provider in fixed-size chunks.
// Everything here works against `StorageApi`, so it runs the same against
// the real client and the test doubles.

use std::io::{self, Read};

use thiserror::Error;
use tracing::{debug, info};

use crate::api::{ApiError, FileMetadata, StorageApi, UploadCursor};

/// Errors from [`upload`].
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("reading input: {0}")]
    Read(#[from] io::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Outcome of [`ensure_directory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryStatus {
    Created,
    AlreadyExists,
}

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSummary {
    pub metadata: FileMetadata,
    /// Bytes read from the input and sent.
    pub bytes: u64,
    /// Number of upload requests issued.
    pub requests: usize,
}

/// Receives progress while the input is read. Called synchronously, in
/// order, with the size of every successful read.
pub trait ProgressObserver {
    fn progressed(&mut self, bytes: u64);
}

impl<F: FnMut(u64)> ProgressObserver for F {
    fn progressed(&mut self, bytes: u64) {
        self(bytes)
    }
}

/// A reader that reports every read to a [`ProgressObserver`].
pub struct ProgressReader<R, O> {
    inner: R,
    observer: O,
    transferred: u64,
}

impl<R: Read, O: ProgressObserver> ProgressReader<R, O> {
    pub fn new(inner: R, observer: O) -> Self {
        ProgressReader {
            inner,
            observer,
            transferred: 0,
        }
    }

    /// Total bytes read so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }
}

impl<R: Read, O: ProgressObserver> Read for ProgressReader<R, O> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.transferred += n as u64;
            self.observer.progressed(n as u64);
        }
        Ok(n)
    }
}

/// Join `dir` and `filename` with exactly one `/`. Leading and trailing
/// separators on either part are dropped, so an empty directory yields the
/// bare file name.
pub fn remote_path(dir: &str, filename: &str) -> String {
    [dir, filename]
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Create `dir`, treating an existing folder as success.
pub fn ensure_directory<A: StorageApi + ?Sized>(
    api: &A,
    dir: &str,
) -> Result<DirectoryStatus, ApiError> {
    match api.create_folder(dir) {
        Ok(meta) => {
            debug!(folder = %meta.name, "folder created");
            Ok(DirectoryStatus::Created)
        }
        Err(e) if e.is_already_exists() => {
            debug!(folder = dir, "folder already exists");
            Ok(DirectoryStatus::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

/// Upload everything `reader` yields to `path`.
///
/// Input that ends within the first chunk goes up in a single request.
/// Longer input opens an upload session with the first chunk, appends each
/// further full chunk and commits with the remainder, which may be empty.
pub fn upload<A, R, O>(
    api: &A,
    reader: R,
    path: &str,
    chunk_size: usize,
    observer: O,
) -> Result<UploadSummary, TransferError>
where
    A: StorageApi + ?Sized,
    R: Read,
    O: ProgressObserver,
{
    let chunk_size = chunk_size.max(1);
    let mut reader = ProgressReader::new(reader, observer);
    let mut buf = vec![0u8; chunk_size];

    let n = fill(&mut reader, &mut buf)?;
    if n < chunk_size {
        debug!(path, bytes = n, "whole-file upload");
        let metadata = api.upload(path, &buf[..n])?;
        return Ok(UploadSummary {
            metadata,
            bytes: reader.transferred(),
            requests: 1,
        });
    }

    let session_id = api.start_session(&buf[..n])?;
    info!(path, session = %session_id, "upload session started");
    let mut cursor = UploadCursor {
        session_id,
        offset: n as u64,
    };
    let mut requests = 1;

    loop {
        let n = fill(&mut reader, &mut buf)?;
        requests += 1;
        if n < chunk_size {
            debug!(offset = cursor.offset, bytes = n, "finishing upload session");
            let metadata = api.finish_session(&cursor, path, &buf[..n])?;
            return Ok(UploadSummary {
                metadata,
                bytes: reader.transferred(),
                requests,
            });
        }
        debug!(offset = cursor.offset, bytes = n, "appending chunk");
        api.append_session(&cursor, &buf[..n])?;
        cursor.offset += n as u64;
    }
}

/// Read until `buf` is full or the input ends; returns the bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
