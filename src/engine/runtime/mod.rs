//! The container-engine boundary the sandbox lifecycle is written against.
//!
//! [`SandboxRuntime`] is implemented for `bollard::Docker`; tests drive
//! scripted fakes instead of a daemon.

use std::future::Future;
use std::pin::Pin;

use bollard::errors::Error as BollardError;
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    CreateContainerOptions, DownloadFromContainerOptionsBuilder, LogsOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, StatsOptionsBuilder,
    UploadToContainerOptionsBuilder, WaitContainerOptionsBuilder,
};
use bollard::{Docker, body_full};
use futures_util::stream::{BoxStream, StreamExt};
use serde_json::Value;

/// Boxed future type returned by [`SandboxRuntime`] implementors.
pub type RuntimeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BollardError>> + Send + 'a>>;

/// Stream of tar bytes read back out of a sandbox.
pub type ArchiveStream<'a> = BoxStream<'a, Result<Vec<u8>, BollardError>>;

/// How a sandbox process finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxExit {
    /// Process exit code.
    pub code: i64,
    /// Error text the engine attached to the exit, if any.
    pub error_message: Option<String>,
}

/// Behaviour required from a container engine to run one sandbox.
pub trait SandboxRuntime: Send + Sync {
    /// Create a container and return its identifier.
    fn create(
        &self,
        options: Option<CreateContainerOptions>,
        body: ContainerCreateBody,
    ) -> RuntimeFuture<'_, String>;

    /// Extract a tar archive at `destination` inside the container.
    fn put_archive(
        &self,
        sandbox_id: &str,
        destination: &str,
        archive: Vec<u8>,
    ) -> RuntimeFuture<'_, ()>;

    /// Start the container.
    fn start(&self, sandbox_id: &str) -> RuntimeFuture<'_, ()>;

    /// Block until the container is no longer running.
    fn wait(&self, sandbox_id: &str) -> RuntimeFuture<'_, SandboxExit>;

    /// Combined stdout and stderr of the container.
    fn logs(&self, sandbox_id: &str) -> RuntimeFuture<'_, Vec<u8>>;

    /// One-shot resource-usage snapshot.
    fn stats(&self, sandbox_id: &str) -> RuntimeFuture<'_, Value>;

    /// Read `source` back out of the container as a tar stream.
    fn get_archive(&self, sandbox_id: &str, source: &str) -> ArchiveStream<'_>;

    /// Force-remove the container.
    fn remove(&self, sandbox_id: &str) -> RuntimeFuture<'_, ()>;
}

impl SandboxRuntime for Docker {
    fn create(
        &self,
        options: Option<CreateContainerOptions>,
        body: ContainerCreateBody,
    ) -> RuntimeFuture<'_, String> {
        Box::pin(async move {
            let response = Self::create_container(self, options, body).await?;
            Ok(response.id)
        })
    }

    fn put_archive(
        &self,
        sandbox_id: &str,
        destination: &str,
        archive: Vec<u8>,
    ) -> RuntimeFuture<'_, ()> {
        let sandbox_id_owned = String::from(sandbox_id);
        let options = UploadToContainerOptionsBuilder::default()
            .path(destination)
            .build();

        Box::pin(async move {
            Self::upload_to_container(
                self,
                &sandbox_id_owned,
                Some(options),
                body_full(archive.into()),
            )
            .await
        })
    }

    fn start(&self, sandbox_id: &str) -> RuntimeFuture<'_, ()> {
        let sandbox_id_owned = String::from(sandbox_id);

        Box::pin(async move {
            Self::start_container(self, &sandbox_id_owned, None::<StartContainerOptions>).await
        })
    }

    fn wait(&self, sandbox_id: &str) -> RuntimeFuture<'_, SandboxExit> {
        let sandbox_id_owned = String::from(sandbox_id);
        let options = WaitContainerOptionsBuilder::default()
            .condition("not-running")
            .build();

        Box::pin(async move {
            let mut responses =
                std::pin::pin!(Self::wait_container(self, &sandbox_id_owned, Some(options)));

            match responses.next().await {
                Some(Ok(response)) => Ok(SandboxExit {
                    code: response.status_code,
                    error_message: response
                        .error
                        .and_then(|error| error.message)
                        .filter(|message| !message.is_empty()),
                }),
                Some(Err(error)) => exit_from_wait_error(error),
                None => Err(BollardError::DockerResponseServerError {
                    status_code: 500,
                    message: String::from("wait stream ended without an exit status"),
                }),
            }
        })
    }

    fn logs(&self, sandbox_id: &str) -> RuntimeFuture<'_, Vec<u8>> {
        let sandbox_id_owned = String::from(sandbox_id);
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .follow(false)
            .build();

        Box::pin(async move {
            let mut chunks = std::pin::pin!(Self::logs(self, &sandbox_id_owned, Some(options)));
            let mut output = vec![];
            while let Some(chunk) = chunks.next().await {
                output.extend_from_slice(&chunk?.into_bytes());
            }
            Ok(output)
        })
    }

    fn stats(&self, sandbox_id: &str) -> RuntimeFuture<'_, Value> {
        let sandbox_id_owned = String::from(sandbox_id);
        let options = StatsOptionsBuilder::default()
            .stream(false)
            .one_shot(true)
            .build();

        Box::pin(async move {
            let mut snapshots =
                std::pin::pin!(Self::stats(self, &sandbox_id_owned, Some(options)));
            match snapshots.next().await {
                Some(snapshot) => Ok(serde_json::to_value(snapshot?).unwrap_or_default()),
                None => Ok(Value::Null),
            }
        })
    }

    fn get_archive(&self, sandbox_id: &str, source: &str) -> ArchiveStream<'_> {
        let options = DownloadFromContainerOptionsBuilder::default()
            .path(source)
            .build();

        Self::download_from_container(self, sandbox_id, Some(options))
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed()
    }

    fn remove(&self, sandbox_id: &str) -> RuntimeFuture<'_, ()> {
        let sandbox_id_owned = String::from(sandbox_id);
        let options = RemoveContainerOptionsBuilder::default().force(true).build();

        Box::pin(
            async move { Self::remove_container(self, &sandbox_id_owned, Some(options)).await },
        )
    }
}

/// Bollard reports a non-zero exit as an error on the wait stream; that is
/// still a normal exit from the sandbox's point of view.
fn exit_from_wait_error(error: BollardError) -> Result<SandboxExit, BollardError> {
    match error {
        BollardError::DockerContainerWaitError { error, code } => Ok(SandboxExit {
            code,
            error_message: Some(error).filter(|message| !message.is_empty()),
        }),
        other => Err(other),
    }
}
