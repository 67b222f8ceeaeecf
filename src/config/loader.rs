//! Configuration loading with layered precedence.
//!
//! This module loads configuration with the precedence order (lowest to
//! highest): application defaults, configuration file, environment variables,
//! command-line arguments.
//!
//! `MergeComposer` is driven manually rather than through the derived
//! `load()` because the `Cli` struct owns subcommand dispatch, and because
//! typed environment values must fail fast instead of being silently ignored.
//!
//! # Environment Variable Handling
//!
//! Environment variables with unparseable values (for example
//! `SANDJOB_WORKER_POLL_INTERVAL_SECS=soon`) return an error immediately.
//! String fields such as `SANDJOB_IMAGE` are always accepted.

use camino::Utf8PathBuf;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use ortho_config::discovery::ConfigDiscovery;
use ortho_config::serde_json::{self, Map, Value};
use ortho_config::{MergeComposer, toml};

use crate::config::{AppConfig, Cli};
use crate::error::{ConfigError, Result};

/// The type of value expected from an environment variable.
#[derive(Clone, Copy)]
enum EnvVarType {
    /// String value (always accepted).
    String,
    /// Signed 64-bit integer. Invalid values return an error.
    I64,
    /// Unsigned 64-bit integer. Invalid values return an error.
    U64,
}

/// Specification for a single environment variable mapping.
struct EnvVarSpec {
    /// The environment variable name (e.g., `SANDJOB_IMAGE`).
    env_var: &'static str,
    /// The JSON path segments (e.g., `["sandbox", "cpu_quota"]`).
    path: &'static [&'static str],
    /// The expected value type.
    var_type: EnvVarType,
}

/// Table of all environment variables and their JSON paths.
const ENV_VAR_SPECS: &[EnvVarSpec] = &[
    EnvVarSpec {
        env_var: "SANDJOB_ENGINE_SOCKET",
        path: &["engine_socket"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "SANDJOB_IMAGE",
        path: &["image"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "SANDJOB_DATABASE_URL",
        path: &["database_url"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "SANDJOB_SANDBOX_MEMORY_LIMIT_BYTES",
        path: &["sandbox", "memory_limit_bytes"],
        var_type: EnvVarType::I64,
    },
    EnvVarSpec {
        env_var: "SANDJOB_SANDBOX_CPU_PERIOD",
        path: &["sandbox", "cpu_period"],
        var_type: EnvVarType::I64,
    },
    EnvVarSpec {
        env_var: "SANDJOB_SANDBOX_CPU_QUOTA",
        path: &["sandbox", "cpu_quota"],
        var_type: EnvVarType::I64,
    },
    EnvVarSpec {
        env_var: "SANDJOB_SANDBOX_NETWORK_MODE",
        path: &["sandbox", "network_mode"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "SANDJOB_SANDBOX_WORKSPACE_VOLUME",
        path: &["sandbox", "workspace_volume"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "SANDJOB_STORAGE_ROOT",
        path: &["storage", "root"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "SANDJOB_STORAGE_STAGING_ROOT",
        path: &["storage", "staging_root"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "SANDJOB_WORKER_POLL_INTERVAL_SECS",
        path: &["worker", "poll_interval_secs"],
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "SANDJOB_WORKER_FETCH_TIMEOUT_SECS",
        path: &["worker", "fetch_timeout_secs"],
        var_type: EnvVarType::U64,
    },
];

/// Returns the list of environment variable names recognised by the loader.
///
/// Tests use this to clear every `SANDJOB_*` variable without keeping a
/// second hard-coded list in sync.
#[must_use]
pub fn env_var_names() -> Vec<&'static str> {
    ENV_VAR_SPECS.iter().map(|spec| spec.env_var).collect()
}

/// Load a configuration file and push it to the composer.
fn load_config_file(path: &Utf8PathBuf, composer: &mut MergeComposer) -> Result<()> {
    let current_dir = Utf8PathBuf::from(".");
    let parent = path.parent().unwrap_or_else(|| current_dir.as_ref());
    let file_name = path.file_name().unwrap_or(path.as_str());

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|e| {
        ConfigError::ParseError {
            message: format!("failed to open directory {parent}: {e}"),
        }
    })?;

    let content = dir
        .read_to_string(file_name)
        .map_err(|e| ConfigError::ParseError {
            message: format!("failed to read {path}: {e}"),
        })?;

    let value =
        toml::from_str::<serde_json::Value>(&content).map_err(|e| ConfigError::ParseError {
            message: format!("failed to parse {path}: {e}"),
        })?;

    composer.push_file(value, Some(path.clone()));
    Ok(())
}

/// Load configuration with full layer precedence.
///
/// Sources, lowest to highest:
/// 1. Application defaults defined in the struct
/// 2. Configuration file (`--config`, `SANDJOB_CONFIG_PATH`, or discovery)
/// 3. Environment variables prefixed with `SANDJOB_`
/// 4. Command-line arguments (from the provided `Cli`)
///
/// # Errors
///
/// Returns `ConfigError` if a configuration file is malformed, a typed
/// environment variable does not parse, or the merged layers do not
/// deserialise.
pub fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut composer = MergeComposer::new();

    let defaults =
        serde_json::to_value(AppConfig::default()).map_err(|e| ConfigError::ParseError {
            message: format!("failed to serialise defaults: {e}"),
        })?;
    composer.push_defaults(defaults);

    let config_path: Option<Utf8PathBuf> =
        cli.config.clone().filter(|p| p.exists()).or_else(|| {
            let discovery = ConfigDiscovery::builder("sandjob")
                .env_var("SANDJOB_CONFIG_PATH")
                .config_file_name("config.toml")
                .dotfile_name(".sandjob.toml")
                .build();
            discovery
                .candidates()
                .into_iter()
                .filter(|p| p.exists())
                .find_map(|p| Utf8PathBuf::try_from(p).ok())
        });

    if let Some(ref path) = config_path {
        load_config_file(path, &mut composer)?;
    }

    let env_values = collect_env_vars()?;
    if !env_values.is_null() {
        composer.push_environment(env_values);
    }

    let cli_overrides = build_cli_overrides(cli);
    if !cli_overrides.is_null() {
        composer.push_cli(cli_overrides);
    }

    let config =
        AppConfig::merge_from_layers(composer.layers()).map_err(ConfigError::OrthoConfig)?;

    Ok(config)
}

/// Collect `SANDJOB_*` environment variables into a JSON value.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if a typed variable has an unparseable
/// value.
fn collect_env_vars() -> Result<Value> {
    let mut root = Map::new();

    for spec in ENV_VAR_SPECS {
        let Ok(raw_value) = std::env::var(spec.env_var) else {
            continue;
        };

        let json_value = parse_env_value(spec, raw_value)?;
        insert_at_path(&mut root, spec.path, json_value);
    }

    if root.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Object(root))
    }
}

fn parse_env_value(spec: &EnvVarSpec, raw_value: String) -> Result<Value> {
    match spec.var_type {
        EnvVarType::String => Ok(Value::String(raw_value)),
        EnvVarType::I64 => raw_value
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| {
                ConfigError::InvalidValue {
                    field: spec.env_var.to_owned(),
                    reason: format!("expected integer, got '{raw_value}'"),
                }
                .into()
            }),
        EnvVarType::U64 => raw_value
            .parse::<u64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| {
                ConfigError::InvalidValue {
                    field: spec.env_var.to_owned(),
                    reason: format!("expected unsigned integer, got '{raw_value}'"),
                }
                .into()
            }),
    }
}

/// Insert a value at a nested path in a JSON map, creating intermediate
/// objects as needed.
fn insert_at_path(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((&field, parents)) = path.split_last() else {
        return;
    };

    let mut current = root;
    for &segment in parents {
        let entry = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(obj) = entry.as_object_mut() else {
            return;
        };
        current = obj;
    }

    current.insert(field.to_owned(), value);
}

/// Build a JSON value containing CLI overrides.
fn build_cli_overrides(cli: &Cli) -> serde_json::Value {
    let mut overrides = serde_json::Map::new();

    for (key, value) in [
        ("engine_socket", &cli.engine_socket),
        ("image", &cli.image),
        ("database_url", &cli.database_url),
    ] {
        if let Some(text) = value {
            overrides.insert(key.to_owned(), serde_json::Value::String(text.clone()));
        }
    }

    if overrides.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::Value::Object(overrides)
    }
}
