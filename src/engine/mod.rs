//! Container engine connection and sandbox management.
//!
//! The socket endpoint is resolved through a priority-based fallback chain:
//!
//! 1. CLI argument (`--engine-socket`)
//! 2. Config file (`engine_socket` in TOML)
//! 3. `SANDJOB_ENGINE_SOCKET` environment variable
//! 4. `DOCKER_HOST` environment variable
//! 5. `CONTAINER_HOST` environment variable
//! 6. `PODMAN_HOST` environment variable
//! 7. Platform default (`/var/run/docker.sock` on Unix)
//!
//! Sandboxes are driven through the [`SandboxRuntime`] trait so the
//! lifecycle and supervisor never depend on a live daemon.

mod connection;
mod lifecycle;
#[cfg(test)]
pub(crate) mod mock_runtime;
mod runtime;
mod supervisor;

pub use connection::{EngineConnector, SocketResolver};
pub use lifecycle::{DATA_DIR, Sandbox, SandboxSpec, SandboxState, WORKSPACE_DIR, sandbox_command};
pub use runtime::{ArchiveStream, RuntimeFuture, SandboxExit, SandboxRuntime};
pub use supervisor::{ExecutionReport, sanitize, supervise};
