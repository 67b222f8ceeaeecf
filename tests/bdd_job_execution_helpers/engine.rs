//! A scripted in-process container engine for job-execution scenarios.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bollard::errors::Error as BollardError;
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::CreateContainerOptions;
use futures_util::stream::{self, StreamExt};
use sandjob::engine::{ArchiveStream, RuntimeFuture, SandboxExit, SandboxRuntime};
use serde_json::json;

/// What the fake sandbox does when run.
#[derive(Default)]
struct Script {
    refuse_create: bool,
    drop_wait: bool,
    exit_code: i64,
    output: Vec<u8>,
    written_files: Vec<(String, Vec<u8>)>,
    live: BTreeSet<String>,
    created: usize,
}

/// Cloneable handle onto one scripted engine.
#[derive(Clone, Default)]
pub(crate) struct FakeEngine {
    script: Arc<Mutex<Script>>,
}

impl FakeEngine {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn refuse_create(&self) {
        self.script().refuse_create = true;
    }

    pub(crate) fn drop_connection_while_waiting(&self) {
        self.script().drop_wait = true;
    }

    pub(crate) fn exit_with(&self, code: i64) {
        self.script().exit_code = code;
    }

    pub(crate) fn print(&self, text: &str) {
        let mut script = self.script();
        script.output.extend_from_slice(text.as_bytes());
        script.output.push(b'\n');
    }

    pub(crate) fn write_file(&self, name: &str, contents: &str) {
        self.script()
            .written_files
            .push((String::from(name), contents.as_bytes().to_vec()));
    }

    /// Sandboxes created and not yet removed.
    pub(crate) fn live_sandboxes(&self) -> usize {
        self.script().live.len()
    }

    fn workspace_tar(&self) -> std::io::Result<Vec<u8>> {
        let files = self.script().written_files.clone();
        let mut builder = tar::Builder::new(vec![]);
        for (name, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, format!("workspace/{name}"), contents.as_slice())?;
        }
        builder.into_inner()
    }
}

fn engine_error(message: &str) -> BollardError {
    BollardError::DockerResponseServerError {
        status_code: 500,
        message: String::from(message),
    }
}

impl SandboxRuntime for FakeEngine {
    fn create(
        &self,
        _options: Option<CreateContainerOptions>,
        _body: ContainerCreateBody,
    ) -> RuntimeFuture<'_, String> {
        let created = {
            let mut script = self.script();
            if script.refuse_create {
                None
            } else {
                script.created += 1;
                let id = format!("fake-{}", script.created);
                script.live.insert(id.clone());
                Some(id)
            }
        };

        Box::pin(async move { created.ok_or_else(|| engine_error("image not found")) })
    }

    fn put_archive(
        &self,
        _sandbox_id: &str,
        _destination: &str,
        _archive: Vec<u8>,
    ) -> RuntimeFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn start(&self, _sandbox_id: &str) -> RuntimeFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn wait(&self, _sandbox_id: &str) -> RuntimeFuture<'_, SandboxExit> {
        let (code, dropped) = {
            let script = self.script();
            (script.exit_code, script.drop_wait)
        };
        Box::pin(async move {
            if dropped {
                return Err(engine_error("connection reset by peer"));
            }
            Ok(SandboxExit {
                code,
                error_message: None,
            })
        })
    }

    fn logs(&self, _sandbox_id: &str) -> RuntimeFuture<'_, Vec<u8>> {
        let output = self.script().output.clone();
        Box::pin(async move { Ok(output) })
    }

    fn stats(&self, _sandbox_id: &str) -> RuntimeFuture<'_, serde_json::Value> {
        Box::pin(async { Ok(json!({ "memory_stats": { "usage": 1024 } })) })
    }

    fn get_archive(&self, _sandbox_id: &str, _source: &str) -> ArchiveStream<'_> {
        let chunk = self
            .workspace_tar()
            .map_err(|error| engine_error(&error.to_string()));
        stream::iter(vec![chunk]).boxed()
    }

    fn remove(&self, sandbox_id: &str) -> RuntimeFuture<'_, ()> {
        self.script().live.remove(sandbox_id);
        Box::pin(async { Ok(()) })
    }
}
