//! SQLite job store on a `sqlx` connection pool.
//!
//! Every operation runs against the pool directly, so a connection is
//! acquired for the duration of one statement and returned to the pool on
//! every exit path.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{JobStore, StoreFuture};
use crate::error::StoreError;
use crate::job::{FileRecord, Job, JobFailure, JobOutcome, JobStatus, Upload};

const MAX_CONNECTIONS: u32 = 5;

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        code TEXT NOT NULL,
        data_urls TEXT NOT NULL DEFAULT '[]',
        packages TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        stdout TEXT,
        stderr TEXT,
        execution_time INTEGER,
        resource_usage TEXT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs (status, created_at)",
    r"
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL,
        filename TEXT NOT NULL,
        content_type TEXT NOT NULL,
        file_path TEXT NOT NULL,
        size INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_files_job_id ON files (job_id)",
    r"
    CREATE TABLE IF NOT EXISTS upload_files (
        id TEXT PRIMARY KEY,
        filename TEXT NOT NULL,
        content_type TEXT NOT NULL,
        file_path TEXT NOT NULL,
        size INTEGER NOT NULL,
        uploaded_at TEXT NOT NULL
    )
    ",
];

const JOB_COLUMNS: &str = "id, status, code, data_urls, packages, created_at, started_at, \
     completed_at, stdout, stderr, execution_time, resource_usage";

/// A [`JobStore`] backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `database_url`, creating the database file if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::QueryFailed` if the URL is malformed or the
    /// database cannot be opened.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(query_error("connect"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(query_error("connect"))?;

        debug!(database_url, "connected to job store");
        Ok(Self { pool })
    }

    /// Create the `jobs`, `files`, and `upload_files` tables if missing.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::QueryFailed` if a statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(query_error("ensure_schema"))?;
        }
        Ok(())
    }

    /// Record a client upload that data references may name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::QueryFailed` if the insert fails, or
    /// `StoreError::Decode` if the size does not fit the column.
    pub async fn register_upload(&self, upload: &Upload) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO upload_files (id, filename, content_type, file_path, size, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&upload.id)
        .bind(&upload.filename)
        .bind(&upload.content_type)
        .bind(&upload.file_path)
        .bind(size_to_column(upload.size)?)
        .bind(upload.uploaded_at)
        .execute(&self.pool)
        .await
        .map_err(query_error("register_upload"))?;
        Ok(())
    }

    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&job.id)
            .bind(job.status.as_str())
            .bind(&job.code)
            .bind(encode_list("data_urls", &job.data_references)?)
            .bind(encode_list("packages", &job.packages)?)
            .bind(job.created_at)
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(&job.stdout)
            .bind(&job.stderr)
            .bind(job.execution_time)
            .bind(&job.resource_usage)
            .execute(&self.pool)
            .await
            .map_err(query_error("insert_job"))?;
        Ok(())
    }

    async fn fetch_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("find_job"))?
            .as_ref()
            .map(job_from_row)
            .transpose()
    }

    async fn fetch_oldest_queued(&self) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? \
             ORDER BY created_at ASC, rowid ASC LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(JobStatus::Queued.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("oldest_queued"))?
            .as_ref()
            .map(job_from_row)
            .transpose()
    }

    async fn claim_queued(
        &self,
        job_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            "UPDATE jobs SET status = ?, started_at = ? WHERE id = ? AND status = ? \
             RETURNING {JOB_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(JobStatus::Running.as_str())
            .bind(started_at)
            .bind(job_id)
            .bind(JobStatus::Queued.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("claim"))?
            .as_ref()
            .map(job_from_row)
            .transpose()
    }

    async fn fetch_files(&self, job_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, job_id, filename, content_type, file_path, size, created_at
            FROM files
            WHERE job_id = ?
            ORDER BY created_at ASC, rowid ASC
            ",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("list_files"))?;

        rows.iter().map(file_from_row).collect()
    }

    async fn insert_file(&self, record: &FileRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO files (id, job_id, filename, content_type, file_path, size, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&record.id)
        .bind(&record.job_id)
        .bind(&record.filename)
        .bind(&record.content_type)
        .bind(&record.file_path)
        .bind(size_to_column(record.size)?)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(query_error("append_file"))?;
        Ok(())
    }

    async fn finish(&self, job_id: &str, outcome: &JobOutcome) -> Result<bool, StoreError> {
        if !outcome.status.is_terminal() {
            return Ok(false);
        }

        let result = sqlx::query(
            r"
            UPDATE jobs
            SET status = ?, stdout = ?, stderr = ?, execution_time = ?,
                resource_usage = ?, completed_at = ?
            WHERE id = ? AND status = ?
            ",
        )
        .bind(outcome.status.as_str())
        .bind(&outcome.stdout)
        .bind(&outcome.stderr)
        .bind(outcome.execution_time)
        .bind(&outcome.resource_usage)
        .bind(outcome.completed_at)
        .bind(job_id)
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(query_error("complete_job"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, job_id: &str, failure: &JobFailure) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE jobs
            SET status = ?, stderr = ?, execution_time = ?, completed_at = ?
            WHERE id = ? AND status = ?
            ",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(&failure.stderr)
        .bind(failure.execution_time)
        .bind(failure.completed_at)
        .bind(job_id)
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(query_error("fail_job"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn fetch_upload(&self, upload_id: &str) -> Result<Option<Upload>, StoreError> {
        sqlx::query(
            r"
            SELECT id, filename, content_type, file_path, size, uploaded_at
            FROM upload_files
            WHERE id = ?
            ",
        )
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("find_upload"))?
        .as_ref()
        .map(upload_from_row)
        .transpose()
    }
}

impl JobStore for SqliteJobStore {
    fn insert_job<'a>(&'a self, job: &'a Job) -> StoreFuture<'a, ()> {
        Box::pin(self.insert(job))
    }

    fn find_job<'a>(&'a self, job_id: &'a str) -> StoreFuture<'a, Option<Job>> {
        Box::pin(self.fetch_job(job_id))
    }

    fn oldest_queued(&self) -> StoreFuture<'_, Option<Job>> {
        Box::pin(self.fetch_oldest_queued())
    }

    fn claim<'a>(
        &'a self,
        job_id: &'a str,
        started_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<Job>> {
        Box::pin(self.claim_queued(job_id, started_at))
    }

    fn list_files<'a>(&'a self, job_id: &'a str) -> StoreFuture<'a, Vec<FileRecord>> {
        Box::pin(self.fetch_files(job_id))
    }

    fn append_file<'a>(&'a self, record: &'a FileRecord) -> StoreFuture<'a, ()> {
        Box::pin(self.insert_file(record))
    }

    fn complete_job<'a>(
        &'a self,
        job_id: &'a str,
        outcome: &'a JobOutcome,
    ) -> StoreFuture<'a, bool> {
        Box::pin(self.finish(job_id, outcome))
    }

    fn fail_job<'a>(&'a self, job_id: &'a str, failure: &'a JobFailure) -> StoreFuture<'a, bool> {
        Box::pin(self.fail(job_id, failure))
    }

    fn find_upload<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Option<Upload>> {
        Box::pin(self.fetch_upload(upload_id))
    }
}

fn query_error(operation: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |error| StoreError::QueryFailed {
        operation,
        message: error.to_string(),
    }
}

fn column<'r, T>(row: &'r SqliteRow, field: &'static str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(field).map_err(|error| StoreError::Decode {
        field,
        message: error.to_string(),
    })
}

fn encode_list(field: &'static str, values: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(values).map_err(|error| StoreError::Decode {
        field,
        message: error.to_string(),
    })
}

fn decode_list(row: &SqliteRow, field: &'static str) -> Result<Vec<String>, StoreError> {
    let raw: String = column(row, field)?;
    serde_json::from_str(&raw).map_err(|error| StoreError::Decode {
        field,
        message: error.to_string(),
    })
}

fn size_to_column(size: u64) -> Result<i64, StoreError> {
    i64::try_from(size).map_err(|error| StoreError::Decode {
        field: "size",
        message: error.to_string(),
    })
}

fn size_from_column(row: &SqliteRow) -> Result<u64, StoreError> {
    let raw: i64 = column(row, "size")?;
    u64::try_from(raw).map_err(|error| StoreError::Decode {
        field: "size",
        message: error.to_string(),
    })
}

fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
    let status: String = column(row, "status")?;

    Ok(Job {
        id: column(row, "id")?,
        status: status.parse()?,
        code: column(row, "code")?,
        data_references: decode_list(row, "data_urls")?,
        packages: decode_list(row, "packages")?,
        created_at: column(row, "created_at")?,
        started_at: column(row, "started_at")?,
        completed_at: column(row, "completed_at")?,
        stdout: column(row, "stdout")?,
        stderr: column(row, "stderr")?,
        execution_time: column(row, "execution_time")?,
        resource_usage: column(row, "resource_usage")?,
    })
}

fn file_from_row(row: &SqliteRow) -> Result<FileRecord, StoreError> {
    Ok(FileRecord {
        id: column(row, "id")?,
        job_id: column(row, "job_id")?,
        filename: column(row, "filename")?,
        content_type: column(row, "content_type")?,
        file_path: column(row, "file_path")?,
        size: size_from_column(row)?,
        created_at: column(row, "created_at")?,
    })
}

fn upload_from_row(row: &SqliteRow) -> Result<Upload, StoreError> {
    Ok(Upload {
        id: column(row, "id")?,
        filename: column(row, "filename")?,
        content_type: column(row, "content_type")?,
        file_path: column(row, "file_path")?,
        size: size_from_column(row)?,
        uploaded_at: column(row, "uploaded_at")?,
    })
}
