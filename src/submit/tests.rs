//! Unit tests for job submission and data reference resolution.

use chrono::Utc;
use mockall::mock;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::job::Upload;
use crate::store::InMemoryJobStore;

mock! {
    pub Fetcher {}

    impl DataFetcher for Fetcher {
        fn fetch<'a>(&'a self, url: &str) -> FetchFuture<'a>;
    }
}

fn io_error(message: impl Into<String>) -> std::io::Error {
    std::io::Error::other(message.into())
}

#[fixture]
fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
}

struct Storage {
    root: Utf8PathBuf,
    _dir: TempDir,
}

#[fixture]
fn storage() -> std::io::Result<Storage> {
    let dir = TempDir::new()?;
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .map_err(|_| io_error("temporary directory is not UTF-8"))?;
    Ok(Storage { root, _dir: dir })
}

fn request(code: &str, data_references: &[&str]) -> JobRequest {
    JobRequest {
        code: String::from(code),
        data_references: data_references.iter().map(|r| String::from(*r)).collect(),
        ..JobRequest::default()
    }
}

#[rstest]
#[case::upload("/api/files/abc-123", DataReference::Upload(String::from("abc-123")))]
#[case::url(
    "https://example.com/data.csv",
    DataReference::Url(String::from("https://example.com/data.csv"))
)]
#[case::relative_path("/files/abc", DataReference::Url(String::from("/files/abc")))]
fn references_are_classified(#[case] reference: &str, #[case] expected: DataReference) {
    assert_eq!(DataReference::parse(reference), expected);
}

#[rstest]
#[case("https://example.com/data/sales.csv", "sales.csv")]
#[case("https://example.com/data/sales.csv?version=2", "sales.csv")]
#[case("https://example.com/data/", "data")]
#[case("https://example.com", "download")]
#[case("not a url", "download")]
fn url_filename_is_last_segment(#[case] url: &str, #[case] expected: &str) {
    assert_eq!(filename_from_url(url), expected);
}

#[rstest]
#[case::empty("")]
#[case::whitespace(" \n\t")]
fn blank_code_is_rejected(
    runtime: std::io::Result<tokio::runtime::Runtime>,
    storage: std::io::Result<Storage>,
    #[case] code: &str,
) -> std::io::Result<()> {
    let rt = runtime?;
    let store = InMemoryJobStore::new();
    let submitter = JobSubmitter::new(store.clone(), MockFetcher::new(), storage?.root);

    let error = rt
        .block_on(submitter.submit(request(code, &[])))
        .expect_err("blank code must be rejected");

    assert!(matches!(
        error,
        SandjobError::Submission(SubmissionError::MissingCode)
    ));
    assert!(store.jobs().map_err(|e| io_error(e.to_string()))?.is_empty());
    Ok(())
}

#[rstest]
fn upload_and_url_references_become_inputs(
    runtime: std::io::Result<tokio::runtime::Runtime>,
    storage: std::io::Result<Storage>,
) -> std::io::Result<()> {
    let rt = runtime?;
    let storage = storage?;
    let upload_path = storage.root.join("upload-1.bin");
    std::fs::write(&upload_path, "x,y\n1,2\n")?;
    let store = InMemoryJobStore::new();
    store
        .register_upload(Upload {
            id: String::from("up-1"),
            filename: String::from("points.csv"),
            content_type: String::from("text/csv"),
            file_path: String::from(upload_path.as_str()),
            size: 8,
            uploaded_at: Utc::now(),
        })
        .map_err(|e| io_error(e.to_string()))?;

    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .withf(|url| url.ends_with("example.com/config.json"))
        .times(1)
        .returning(|_| {
            Box::pin(async {
                Ok(FetchedFile {
                    content_type: String::from("application/json"),
                    bytes: b"{\"k\":1}".to_vec(),
                })
            })
        });
    let submitter = JobSubmitter::new(store.clone(), fetcher, storage.root.clone());

    let receipt = rt
        .block_on(submitter.submit(request(
            "print(open('/data/points.csv').read())",
            &["/api/files/up-1", "https://example.com/config.json"],
        )))
        .map_err(|e| io_error(e.to_string()))?;

    assert_eq!(receipt.status, JobStatus::Queued);
    let summary: Vec<_> = receipt
        .inputs
        .iter()
        .map(|record| (record.filename.as_str(), record.content_type.as_str(), record.size))
        .collect();
    assert_eq!(
        summary,
        [
            ("points.csv", "text/csv", 8),
            ("config.json", "application/json", 7)
        ]
    );

    let inputs_dir = storage.root.join("inputs").join(&receipt.job_id);
    assert_eq!(
        std::fs::read_to_string(inputs_dir.join("points.csv"))?,
        "x,y\n1,2\n"
    );
    let first = receipt.inputs.first().ok_or_else(|| io_error("no inputs"))?;
    assert_eq!(first.file_path, inputs_dir.join("points.csv").as_str());

    let job = rt
        .block_on(store.find_job(&receipt.job_id))
        .map_err(|e| io_error(e.to_string()))?
        .ok_or_else(|| io_error("job not stored"))?;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(
        job.data_references,
        ["/api/files/up-1", "https://example.com/config.json"]
    );
    Ok(())
}

#[rstest]
fn unresolvable_references_are_skipped(
    runtime: std::io::Result<tokio::runtime::Runtime>,
    storage: std::io::Result<Storage>,
) -> std::io::Result<()> {
    let rt = runtime?;
    let store = InMemoryJobStore::new();
    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().times(1).returning(|url| {
        let reference = String::from(url);
        Box::pin(async move {
            Err(SubmissionError::FetchFailed {
                reference,
                message: String::from("connection refused"),
            })
        })
    });
    let submitter = JobSubmitter::new(store.clone(), fetcher, storage?.root);

    let receipt = rt
        .block_on(submitter.submit(request(
            "print('hi')",
            &["/api/files/missing", "http://unreachable.invalid/data.csv"],
        )))
        .map_err(|e| io_error(e.to_string()))?;

    assert!(receipt.inputs.is_empty());
    let files = rt
        .block_on(store.list_files(&receipt.job_id))
        .map_err(|e| io_error(e.to_string()))?;
    assert!(files.is_empty());
    let jobs = store.jobs().map_err(|e| io_error(e.to_string()))?;
    assert_eq!(jobs.len(), 1);
    Ok(())
}

#[rstest]
fn inputs_sharing_a_basename_are_stored_side_by_side(
    runtime: std::io::Result<tokio::runtime::Runtime>,
    storage: std::io::Result<Storage>,
) -> std::io::Result<()> {
    let rt = runtime?;
    let storage = storage?;
    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().times(2).returning(|url| {
        let bytes = if url.starts_with("https://a.example") {
            b"a\n1\n".to_vec()
        } else {
            b"b\n22\n333\n".to_vec()
        };
        Box::pin(async move {
            Ok(FetchedFile {
                content_type: String::from("text/csv"),
                bytes,
            })
        })
    });
    let submitter = JobSubmitter::new(InMemoryJobStore::new(), fetcher, storage.root.clone());

    let receipt = rt
        .block_on(submitter.submit(request(
            "print('two tables')",
            &["https://a.example/data.csv", "https://b.example/data.csv"],
        )))
        .map_err(|e| io_error(e.to_string()))?;

    let inputs_dir = storage.root.join("inputs").join(&receipt.job_id);
    let stored: Vec<_> = receipt
        .inputs
        .iter()
        .map(|record| (record.filename.as_str(), record.file_path.as_str(), record.size))
        .collect();
    assert_eq!(
        stored,
        [
            ("data.csv", inputs_dir.join("data.csv").as_str(), 4),
            ("data.csv", inputs_dir.join("2-data.csv").as_str(), 9),
        ]
    );
    assert_eq!(std::fs::read_to_string(inputs_dir.join("data.csv"))?, "a\n1\n");
    assert_eq!(
        std::fs::read_to_string(inputs_dir.join("2-data.csv"))?,
        "b\n22\n333\n"
    );
    Ok(())
}
