//! Post-execution artifact discovery.
//!
//! The exited sandbox's `/workspace` is read back as one tar stream and
//! scanned entry by entry on a blocking thread while it downloads. Each file
//! entry is run through [`classify`]; selected entries are streamed to
//! `<storage root>/<job id>/<basename>`.
//!
//! Harvesting degrades instead of failing: a broken entry is logged and its
//! partial file removed, and a broken archive ends the scan with whatever was
//! captured so far.

mod classify;

use std::collections::BTreeSet;
use std::io::{self, Cursor, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use classify::{
    ARTIFACT_EXTENSIONS, ARTIFACT_NAME_HINTS, FALLBACK_CONTENT_TYPE, SkipReason, Verdict,
    classify, content_type_for,
};

use crate::engine::{Sandbox, SandboxRuntime, WORKSPACE_DIR};
use crate::error::{FilesystemError, SandjobError};

/// A file captured from the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Basename of the captured file.
    pub filename: String,
    /// MIME type from the extension table.
    pub content_type: String,
    /// `<job id>/<basename>`, relative to the storage root.
    pub relative_path: String,
    /// Bytes written.
    pub size: u64,
}

/// Chunks buffered between the download and the scanning thread.
const CHUNK_BACKLOG: usize = 16;

/// Read `/workspace` out of an exited sandbox and persist its artifacts.
///
/// # Errors
///
/// Returns `SandboxError::InvalidTransition` if the sandbox has not exited,
/// and `FilesystemError::IoError` if the job's artifact directory cannot be
/// created. Download and archive errors are logged and end the scan early.
pub async fn harvest<R: SandboxRuntime + ?Sized>(
    sandbox: &Sandbox<'_, R>,
    storage_root: &Utf8Path,
    job_id: &str,
) -> Result<Vec<Artifact>, SandjobError> {
    let mut chunks = sandbox.archive(WORKSPACE_DIR)?;
    let (sender, receiver) = mpsc::channel(CHUNK_BACKLOG);

    let root = storage_root.to_owned();
    let owned_job_id = String::from(job_id);
    let scan = tokio::task::spawn_blocking(move || {
        harvest_archive(ChunkReader::new(receiver), &root, &owned_job_id)
    });

    let mut downloaded: u64 = 0;
    while let Some(chunk) = chunks.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(
                    job_id,
                    sandbox_id = sandbox.id(),
                    %error,
                    "workspace download interrupted; scanning what arrived"
                );
                break;
            }
        };
        let length = bytes.len() as u64;
        if sender.send(bytes).await.is_err() {
            debug!(job_id, "archive scan finished before the download");
            break;
        }
        downloaded = downloaded.saturating_add(length);
    }
    drop(sender);
    debug!(job_id, bytes = downloaded, "workspace archive streamed");

    scan.await.map_err(|error| {
        SandjobError::from(FilesystemError::IoError {
            path: storage_root.join(job_id).into_std_path_buf(),
            message: format!("artifact extraction task failed: {error}"),
        })
    })?
}

/// Blocking [`Read`] over archive chunks arriving from the download task.
///
/// Reaches end of file once the sending side is dropped.
struct ChunkReader {
    chunks: mpsc::Receiver<Vec<u8>>,
    current: Cursor<Vec<u8>>,
}

impl ChunkReader {
    const fn new(chunks: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            chunks,
            current: Cursor::new(vec![]),
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let read = self.current.read(buf)?;
            if read > 0 || buf.is_empty() {
                return Ok(read);
            }
            match self.chunks.blocking_recv() {
                Some(chunk) => self.current = Cursor::new(chunk),
                None => return Ok(0),
            }
        }
    }
}

/// Scan a workspace tar stream and persist the entries [`classify`] selects.
///
/// Artifacts are returned in archive order.
///
/// # Errors
///
/// Returns `FilesystemError::IoError` if `<storage root>/<job id>` cannot be
/// created or opened.
pub fn harvest_archive<T: Read>(
    reader: T,
    storage_root: &Utf8Path,
    job_id: &str,
) -> Result<Vec<Artifact>, SandjobError> {
    let job_path = storage_root.join(job_id);
    let job_dir = Dir::create_ambient_dir_all(&job_path, ambient_authority())
        .and_then(|()| Dir::open_ambient_dir(&job_path, ambient_authority()))
        .map_err(|error| io_failed(&job_path, &error))?;

    let mut archive = tar::Archive::new(reader);
    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(error) => {
            warn!(job_id, %error, "workspace archive unreadable");
            return Ok(vec![]);
        }
    };

    let mut captured = BTreeSet::new();
    let mut artifacts = vec![];

    for entry_result in entries {
        let mut entry = match entry_result {
            Ok(entry) => entry,
            Err(error) => {
                warn!(job_id, %error, "workspace archive ended early");
                break;
            }
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let Some(basename) = entry_basename(&entry) else {
            continue;
        };

        let content_type = match classify(&basename, &captured) {
            Verdict::Capture { content_type } => content_type,
            Verdict::Skip(reason) => {
                debug!(job_id, file = %basename, ?reason, "workspace file skipped");
                continue;
            }
        };

        match extract(&job_dir, &basename, &mut entry) {
            Ok(size) => {
                debug!(job_id, file = %basename, size, "artifact captured");
                artifacts.push(Artifact {
                    relative_path: format!("{job_id}/{basename}"),
                    filename: basename.clone(),
                    content_type: String::from(content_type),
                    size,
                });
                captured.insert(basename);
            }
            Err(error) => {
                warn!(job_id, file = %basename, %error, "failed to extract artifact");
                if let Err(remove_error) = job_dir.remove_file(&basename) {
                    debug!(
                        job_id,
                        file = %basename,
                        %remove_error,
                        "no partial artifact to remove"
                    );
                }
            }
        }
    }

    info!(job_id, artifacts = artifacts.len(), "workspace harvested");
    Ok(artifacts)
}

fn entry_basename<T: Read>(entry: &tar::Entry<'_, T>) -> Option<String> {
    let path = entry.path().ok()?;
    path.file_name()
        .and_then(|name| name.to_str())
        .map(String::from)
}

fn extract(job_dir: &Dir, basename: &str, entry: &mut impl Read) -> io::Result<u64> {
    let mut file = job_dir.create(basename)?;
    let size = io::copy(entry, &mut file)?;
    file.flush()?;
    Ok(size)
}

fn io_failed(path: &Utf8PathBuf, error: &io::Error) -> SandjobError {
    SandjobError::from(FilesystemError::IoError {
        path: path.clone().into_std_path_buf(),
        message: error.to_string(),
    })
}
