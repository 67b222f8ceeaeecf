//! Accepting new jobs and resolving their data references.
//!
//! A data reference is either `/api/files/<upload id>`, naming a client
//! upload already held by the store, or a URL fetched over HTTP. Each
//! resolved reference is copied into `<storage root>/inputs/<job id>/` and
//! recorded as an input file. A record keeps the reference's basename as its
//! filename even when a numeric prefix was needed to store it beside an
//! earlier input with the same basename. References that cannot be resolved
//! are logged and skipped; the job is queued regardless.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{FilesystemError, SandjobError, SubmissionError};
use crate::harvest::FALLBACK_CONTENT_TYPE;
use crate::job::{FileRecord, Job, JobStatus};
use crate::store::JobStore;

/// Prefix of data references that name a client upload.
pub const UPLOAD_REFERENCE_PREFIX: &str = "/api/files/";

/// Filename used when a URL has no usable last path segment.
pub const FALLBACK_FILENAME: &str = "download";

const INPUTS_DIR: &str = "inputs";

/// A request to run code.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobRequest {
    /// Source code for `main.py`.
    pub code: String,
    /// Upload references or URLs, in order.
    #[serde(default, alias = "data_urls")]
    pub data_references: Vec<String>,
    /// Packages to install before running.
    #[serde(default)]
    pub packages: Vec<String>,
    /// Requested timeout in seconds. Recorded in logs only.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Requested resource limits. Recorded in logs only.
    #[serde(default)]
    pub resource_limits: Option<serde_json::Value>,
}

/// What the submitter recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReceipt {
    /// Identifier of the queued job.
    pub job_id: String,
    /// Always `Queued`.
    pub status: JobStatus,
    /// Input file records written for the job.
    pub inputs: Vec<FileRecord>,
}

/// A parsed data reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataReference {
    /// A client upload by identifier.
    Upload(String),
    /// An external URL.
    Url(String),
}

impl DataReference {
    /// Classify `reference`.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        reference.strip_prefix(UPLOAD_REFERENCE_PREFIX).map_or_else(
            || Self::Url(String::from(reference)),
            |upload_id| Self::Upload(String::from(upload_id)),
        )
    }
}

/// Bytes fetched for a URL reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    /// Response content type, or the fallback.
    pub content_type: String,
    /// Response body.
    pub bytes: Vec<u8>,
}

/// Boxed future type returned by [`DataFetcher`] implementors.
pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<FetchedFile, SubmissionError>> + Send + 'a>>;

/// Retrieves the body of an external data URL.
pub trait DataFetcher: Send + Sync {
    /// Fetch `url`.
    fn fetch(&self, url: &str) -> FetchFuture<'_>;
}

/// [`DataFetcher`] over HTTP with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the HTTP client cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self, SandjobError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                SandjobError::from(crate::error::ConfigError::InvalidValue {
                    field: String::from("worker.fetch_timeout_secs"),
                    reason: error.to_string(),
                })
            })?;
        Ok(Self { client })
    }
}

impl DataFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> FetchFuture<'_> {
        let url_owned = String::from(url);

        Box::pin(async move {
            let failed = |error: reqwest::Error| SubmissionError::FetchFailed {
                reference: url_owned.clone(),
                message: error.to_string(),
            };

            let response = self
                .client
                .get(url_owned.as_str())
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(failed)?;
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map_or_else(|| String::from(FALLBACK_CONTENT_TYPE), String::from);
            let bytes = response.bytes().await.map_err(failed)?;

            Ok(FetchedFile {
                content_type,
                bytes: bytes.to_vec(),
            })
        })
    }
}

/// Last non-empty path segment of `url`, or [`FALLBACK_FILENAME`].
#[must_use]
pub fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
                .map(String::from)
        })
        .unwrap_or_else(|| String::from(FALLBACK_FILENAME))
}

/// Records new jobs and their input files.
pub struct JobSubmitter<S, F> {
    store: S,
    fetcher: F,
    storage_root: Utf8PathBuf,
}

impl<S: JobStore, F: DataFetcher> JobSubmitter<S, F> {
    /// Create a submitter writing inputs under `storage_root`.
    #[must_use]
    pub const fn new(store: S, fetcher: F, storage_root: Utf8PathBuf) -> Self {
        Self {
            store,
            fetcher,
            storage_root,
        }
    }

    /// Record `request` as a queued job.
    ///
    /// Input file records are written before the job itself, so a worker
    /// never claims a job whose inputs are still being resolved.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::MissingCode` for blank code,
    /// `FilesystemError::IoError` if the inputs directory cannot be created,
    /// or the store error if a record cannot be written.
    pub async fn submit(&self, request: JobRequest) -> Result<JobReceipt, SandjobError> {
        if request.code.trim().is_empty() {
            return Err(SubmissionError::MissingCode.into());
        }
        if request.timeout.is_some() || request.resource_limits.is_some() {
            warn!(
                timeout = ?request.timeout,
                resource_limits = ?request.resource_limits,
                "per-job limits are not enforced; platform limits apply"
            );
        }

        let job = Job::queued(request.code, request.data_references, request.packages);
        let inputs_path = self.storage_root.join(INPUTS_DIR).join(&job.id);
        let inputs_dir = Dir::create_ambient_dir_all(&inputs_path, ambient_authority())
            .and_then(|()| Dir::open_ambient_dir(&inputs_path, ambient_authority()))
            .map_err(|error| io_failed(&inputs_path, &error))?;

        let mut inputs = vec![];
        for reference in &job.data_references {
            match self.resolve(&job.id, reference, &inputs_dir, &inputs_path).await {
                Ok(record) => {
                    self.store.append_file(&record).await?;
                    debug!(job_id = %job.id, file = %record.filename, "input recorded");
                    inputs.push(record);
                }
                Err(error) => {
                    warn!(
                        job_id = %job.id,
                        reference = %reference,
                        %error,
                        "skipping data reference"
                    );
                }
            }
        }

        self.store.insert_job(&job).await?;
        info!(job_id = %job.id, inputs = inputs.len(), "job queued");

        Ok(JobReceipt {
            job_id: job.id,
            status: JobStatus::Queued,
            inputs,
        })
    }

    async fn resolve(
        &self,
        job_id: &str,
        reference: &str,
        inputs_dir: &Dir,
        inputs_path: &Utf8Path,
    ) -> Result<FileRecord, SandjobError> {
        let fetch_failed = |message: String| {
            SandjobError::from(SubmissionError::FetchFailed {
                reference: String::from(reference),
                message,
            })
        };

        match DataReference::parse(reference) {
            DataReference::Upload(upload_id) => {
                let upload = self
                    .store
                    .find_upload(&upload_id)
                    .await?
                    .ok_or_else(|| fetch_failed(format!("upload '{upload_id}' not found")))?;
                let filename = basename_or_fallback(&upload.filename);
                let stored_name = unclaimed_name(inputs_dir, &filename);
                let size = copy_upload(&upload.file_path, inputs_dir, &stored_name)
                    .map_err(|error| fetch_failed(error.to_string()))?;

                Ok(FileRecord::new(
                    job_id,
                    filename.as_str(),
                    upload.content_type,
                    inputs_path.join(&stored_name).as_str(),
                    size,
                ))
            }
            DataReference::Url(url) => {
                let fetched = self.fetcher.fetch(&url).await?;
                let filename = basename_or_fallback(&filename_from_url(&url));
                let stored_name = unclaimed_name(inputs_dir, &filename);
                inputs_dir
                    .write(&stored_name, &fetched.bytes)
                    .map_err(|error| fetch_failed(error.to_string()))?;

                Ok(FileRecord::new(
                    job_id,
                    filename.as_str(),
                    fetched.content_type,
                    inputs_path.join(&stored_name).as_str(),
                    fetched.bytes.len() as u64,
                ))
            }
        }
    }
}

fn basename_or_fallback(name: &str) -> String {
    Utf8Path::new(name)
        .file_name()
        .filter(|basename| !basename.starts_with('.'))
        .map_or_else(|| String::from(FALLBACK_FILENAME), String::from)
}

/// Name to store `basename` under without replacing an earlier input.
///
/// The first input keeps its basename; later ones with the same basename get
/// a numeric prefix (`2-data.csv`, `3-data.csv`, ...).
fn unclaimed_name(inputs_dir: &Dir, basename: &str) -> String {
    if !inputs_dir.exists(basename) {
        return String::from(basename);
    }
    let mut ordinal = 2_usize;
    loop {
        let candidate = format!("{ordinal}-{basename}");
        if !inputs_dir.exists(&candidate) {
            return candidate;
        }
        ordinal += 1;
    }
}

fn copy_upload(source: &str, inputs_dir: &Dir, filename: &str) -> io::Result<u64> {
    let source_path = Utf8Path::new(source);
    let source_name = source_path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("'{source}' does not name a file")))?;
    let source_parent = source_path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));

    let source_dir = Dir::open_ambient_dir(source_parent, ambient_authority())?;
    let mut reader = source_dir.open(source_name)?;
    let mut writer = inputs_dir.create(filename)?;
    io::copy(&mut reader, &mut writer)
}

fn io_failed(path: &Utf8Path, error: &io::Error) -> SandjobError {
    SandjobError::from(FilesystemError::IoError {
        path: path.as_std_path().to_path_buf(),
        message: error.to_string(),
    })
}

#[cfg(test)]
mod tests;
