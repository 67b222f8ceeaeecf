//! Socket resolution and container engine connection.
//!
//! This module resolves the container engine endpoint from configuration,
//! fallback environment variables, or the platform default, and connects to
//! it with `Bollard`.

use std::time::Duration;

use bollard::Docker;
use tracing::{debug, info};

use crate::error::{SandboxError, SandjobError};

/// Environment variable names checked in fallback order after configuration sources.
const FALLBACK_ENV_VARS: &[&str] = &["DOCKER_HOST", "CONTAINER_HOST", "PODMAN_HOST"];

/// Connection timeout in seconds for Docker/Podman API connections.
const CONNECTION_TIMEOUT_SECS: u64 = 120;

/// Timeout in seconds for the startup ping.
const PING_TIMEOUT_SECS: u64 = 10;

/// Default socket path for Unix platforms.
#[cfg(unix)]
const DEFAULT_SOCKET: &str = "unix:///var/run/docker.sock";

/// Default socket path for Windows platforms.
#[cfg(windows)]
const DEFAULT_SOCKET: &str = "npipe:////./pipe/docker_engine";

/// Resolves container engine socket endpoints from environment variables.
///
/// # Type Parameters
///
/// * `E` - An environment provider implementing the `mockable::Env` trait,
///   allowing for testable environment variable access.
pub struct SocketResolver<'a, E: mockable::Env> {
    env: &'a E,
}

impl<'a, E: mockable::Env> SocketResolver<'a, E> {
    /// Creates a new socket resolver with the given environment provider.
    #[must_use]
    pub const fn new(env: &'a E) -> Self {
        Self { env }
    }

    /// Resolves the socket endpoint from `DOCKER_HOST`, `CONTAINER_HOST`,
    /// then `PODMAN_HOST`.
    ///
    /// Returns `None` if no fallback variable is set or all are empty.
    #[must_use]
    pub fn resolve_from_env(&self) -> Option<String> {
        FALLBACK_ENV_VARS
            .iter()
            .filter_map(|var_name| self.env.string(var_name))
            .find(|value| !value.is_empty())
    }

    /// Returns the platform default socket path.
    #[must_use]
    pub const fn default_socket() -> &'static str {
        DEFAULT_SOCKET
    }
}

/// Classifies socket endpoint types for connection handling.
enum SocketType {
    /// Unix socket or Windows named pipe with explicit scheme.
    Socket,
    /// HTTP, HTTPS, or TCP endpoint (TCP is rewritten to HTTP).
    Http,
    /// Bare path without scheme prefix.
    BarePath,
}

impl SocketType {
    fn classify(socket: &str) -> Self {
        if socket.starts_with("unix://") || socket.starts_with("npipe://") {
            Self::Socket
        } else if ["tcp://", "http://", "https://"]
            .iter()
            .any(|scheme| socket.starts_with(scheme))
        {
            Self::Http
        } else {
            Self::BarePath
        }
    }
}

/// Connects to Docker or Podman container engines.
pub struct EngineConnector;

impl EngineConnector {
    /// Connect to the container engine at `socket`.
    ///
    /// Accepts `unix://`, `npipe://`, `tcp://` (treated as HTTP), `http://`,
    /// and `https://` endpoints. Bare paths starting with `\\` or `//` are
    /// treated as named pipes; any other bare path as a Unix socket.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::ConnectionFailed` if the client cannot be
    /// constructed.
    pub fn connect(socket: &str) -> Result<Docker, SandjobError> {
        let docker = match SocketType::classify(socket) {
            SocketType::Socket => Docker::connect_with_socket(
                socket,
                CONNECTION_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            SocketType::Http => Docker::connect_with_http(
                &socket.replacen("tcp://", "http://", 1),
                CONNECTION_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            SocketType::BarePath => Docker::connect_with_socket(
                &Self::normalize_bare_path(socket),
                CONNECTION_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
        }
        .map_err(|e| {
            SandjobError::from(SandboxError::ConnectionFailed {
                message: e.to_string(),
            })
        })?;

        debug!(socket, "container engine client created");
        Ok(docker)
    }

    fn normalize_bare_path(path: &str) -> String {
        if path.starts_with("\\\\") || path.starts_with("//") {
            format!("npipe://{path}")
        } else {
            format!("unix://{path}")
        }
    }

    /// Resolve the endpoint without connecting.
    ///
    /// Resolution order:
    /// 1. `config_socket` (from CLI, config file, or `SANDJOB_ENGINE_SOCKET`)
    /// 2. `DOCKER_HOST`, `CONTAINER_HOST`, `PODMAN_HOST` (via resolver)
    /// 3. Platform default socket
    #[must_use]
    pub fn resolve_socket<E: mockable::Env>(
        config_socket: Option<&str>,
        resolver: &SocketResolver<'_, E>,
    ) -> String {
        config_socket
            .filter(|s| !s.is_empty())
            .map(String::from)
            .or_else(|| resolver.resolve_from_env())
            .unwrap_or_else(|| SocketResolver::<E>::default_socket().to_owned())
    }

    /// Connect using the resolved endpoint and confirm the engine answers a
    /// ping.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::ConnectionFailed` if the client cannot be built,
    /// the ping fails, or it does not answer within ten seconds.
    pub async fn connect_and_verify<E: mockable::Env>(
        config_socket: Option<&str>,
        resolver: &SocketResolver<'_, E>,
    ) -> Result<Docker, SandjobError> {
        let socket = Self::resolve_socket(config_socket, resolver);
        let docker = Self::connect(&socket)?;

        tokio::time::timeout(Duration::from_secs(PING_TIMEOUT_SECS), docker.ping())
            .await
            .map_err(|_| {
                SandjobError::from(SandboxError::ConnectionFailed {
                    message: format!(
                        "engine at {socket} did not respond within {PING_TIMEOUT_SECS} seconds"
                    ),
                })
            })?
            .map_err(|e| {
                SandjobError::from(SandboxError::ConnectionFailed {
                    message: format!("engine at {socket} failed health check: {e}"),
                })
            })?;

        info!(socket = %socket, "connected to container engine");
        Ok(docker)
    }
}
