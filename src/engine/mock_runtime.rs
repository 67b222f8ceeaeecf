//! `mockall` double for [`SandboxRuntime`] shared by the engine unit tests.

use bollard::models::ContainerCreateBody;
use bollard::query_parameters::CreateContainerOptions;
use mockall::mock;
use serde_json::Value;

use super::runtime::{ArchiveStream, RuntimeFuture, SandboxExit, SandboxRuntime};

mock! {
    #[derive(Debug)]
    pub Runtime {}

    impl SandboxRuntime for Runtime {
        fn create<'a>(
            &'a self,
            options: Option<CreateContainerOptions>,
            body: ContainerCreateBody,
        ) -> RuntimeFuture<'a, String>;
        fn put_archive<'a>(
            &'a self,
            sandbox_id: &str,
            destination: &str,
            archive: Vec<u8>,
        ) -> RuntimeFuture<'a, ()>;
        fn start<'a>(&'a self, sandbox_id: &str) -> RuntimeFuture<'a, ()>;
        fn wait<'a>(&'a self, sandbox_id: &str) -> RuntimeFuture<'a, SandboxExit>;
        fn logs<'a>(&'a self, sandbox_id: &str) -> RuntimeFuture<'a, Vec<u8>>;
        fn stats<'a>(&'a self, sandbox_id: &str) -> RuntimeFuture<'a, Value>;
        fn get_archive<'a>(&'a self, sandbox_id: &str, source: &str) -> ArchiveStream<'a>;
        fn remove<'a>(&'a self, sandbox_id: &str) -> RuntimeFuture<'a, ()>;
    }
}

/// An engine error with a fixed message.
pub(crate) fn engine_error(message: &str) -> bollard::errors::Error {
    bollard::errors::Error::DockerResponseServerError {
        status_code: 500,
        message: String::from(message),
    }
}
