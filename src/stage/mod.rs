//! Per-job staging directories and the archives injected into a sandbox.
//!
//! A staging area named `sandjob-<job id>` is created under the staging root
//! and holds `main.py`, an optional `requirements.txt`, and a `data/`
//! subdirectory with copies of the job's input files. The whole area is
//! packed for `/workspace`; `data/` is packed again for `/data`.

mod archive;

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use tracing::{debug, info, warn};

use crate::error::{FilesystemError, SandjobError};
use crate::job::{FileRecord, Job};

/// Shell prefix that installs `requirements.txt` before the entrypoint runs.
///
/// pip writes into a temporary directory on the shared volume because the
/// sandbox root filesystem is small.
pub const INSTALL_PREFIX: &str = concat!(
    "mkdir -p /workspace/.tmp && TMPDIR=/workspace/.tmp ",
    "pip install --no-cache-dir --user -r /workspace/requirements.txt > /dev/null 2>&1 ",
    "&& rm -rf /workspace/.tmp && ",
);

/// Name of the entrypoint file.
pub const ENTRYPOINT_FILE: &str = "main.py";

/// Name of the dependency manifest.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

const DATA_SUBDIR: &str = "data";

/// A materialised staging directory for one job.
#[derive(Debug)]
pub struct StagingArea {
    parent: Dir,
    name: String,
    path: Utf8PathBuf,
    dir: Dir,
    install_prefix: &'static str,
    staged_inputs: Vec<String>,
}

impl StagingArea {
    /// Create the staging area for `job` under `staging_root`.
    ///
    /// A stale directory with the same name is replaced. Input files that
    /// cannot be copied are logged and left out.
    ///
    /// # Errors
    ///
    /// Returns `FilesystemError::IoError` if the directory, `main.py`,
    /// `requirements.txt`, or `data/` cannot be written.
    pub fn create(
        staging_root: &Utf8Path,
        job: &Job,
        inputs: &[FileRecord],
    ) -> Result<Self, SandjobError> {
        let name = format!("sandjob-{}", job.id);
        let path = staging_root.join(&name);

        let parent = Dir::create_ambient_dir_all(staging_root, ambient_authority())
            .and_then(|()| Dir::open_ambient_dir(staging_root, ambient_authority()))
            .map_err(|error| io_failed(staging_root, &error))?;

        if parent.exists(&name) {
            debug!(job_id = %job.id, path = %path, "replacing stale staging directory");
            parent
                .remove_dir_all(&name)
                .map_err(|error| io_failed(&path, &error))?;
        }
        parent
            .create_dir(&name)
            .map_err(|error| io_failed(&path, &error))?;
        let dir = parent
            .open_dir(&name)
            .map_err(|error| io_failed(&path, &error))?;

        dir.write(ENTRYPOINT_FILE, &job.code)
            .map_err(|error| io_failed(&path.join(ENTRYPOINT_FILE), &error))?;

        let install_prefix = if job.packages.is_empty() {
            ""
        } else {
            let manifest = job.packages.join("\n");
            dir.write(REQUIREMENTS_FILE, manifest)
                .map_err(|error| io_failed(&path.join(REQUIREMENTS_FILE), &error))?;
            INSTALL_PREFIX
        };

        let data_path = path.join(DATA_SUBDIR);
        dir.create_dir(DATA_SUBDIR)
            .map_err(|error| io_failed(&data_path, &error))?;
        let data_dir = dir
            .open_dir(DATA_SUBDIR)
            .map_err(|error| io_failed(&data_path, &error))?;

        let staged_inputs = inputs
            .iter()
            .filter_map(|record| match copy_input(&data_dir, record) {
                Ok(filename) => Some(filename),
                Err(error) => {
                    warn!(
                        job_id = %job.id,
                        file_id = %record.id,
                        source = %record.file_path,
                        %error,
                        "skipping input file"
                    );
                    None
                }
            })
            .collect::<Vec<_>>();

        info!(
            job_id = %job.id,
            path = %path,
            inputs = staged_inputs.len(),
            packages = job.packages.len(),
            "staging area prepared"
        );

        Ok(Self {
            parent,
            name,
            path,
            dir,
            install_prefix,
            staged_inputs,
        })
    }

    /// Host path of the staging directory.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Install prefix for the sandbox command; empty when there are no
    /// packages.
    #[must_use]
    pub const fn install_prefix(&self) -> &'static str {
        self.install_prefix
    }

    /// Basenames of the input files copied into `data/`, in record order.
    #[must_use]
    pub fn staged_inputs(&self) -> &[String] {
        &self.staged_inputs
    }

    /// Tar archive of the whole staging directory, for `/workspace`.
    ///
    /// # Errors
    ///
    /// Returns `FilesystemError::IoError` if a staged file cannot be read.
    pub fn workspace_archive(&self) -> Result<Vec<u8>, SandjobError> {
        archive::pack(&self.dir, &self.path).map_err(|error| io_failed(&self.path, &error))
    }

    /// Tar archive of `data/` alone, for `/data`.
    ///
    /// # Errors
    ///
    /// Returns `FilesystemError::IoError` if a staged input cannot be read.
    pub fn data_archive(&self) -> Result<Vec<u8>, SandjobError> {
        let data_path = self.path.join(DATA_SUBDIR);
        self.dir
            .open_dir(DATA_SUBDIR)
            .and_then(|data_dir| archive::pack(&data_dir, &data_path))
            .map_err(|error| io_failed(&data_path, &error))
    }

    /// Recursively delete the staging directory. Failures are logged.
    pub fn remove(self) {
        let Self {
            parent, name, path, dir, ..
        } = self;
        drop(dir);

        match parent.remove_dir_all(&name) {
            Ok(()) => debug!(path = %path, "staging area removed"),
            Err(error) => warn!(path = %path, %error, "failed to remove staging area"),
        }
    }
}

/// Copy one input file into `data/` under its basename.
///
/// An input whose basename is already staged goes in under its stored name
/// instead, so inputs sharing a basename do not replace each other.
fn copy_input(data_dir: &Dir, record: &FileRecord) -> io::Result<String> {
    let basename = Utf8Path::new(&record.filename)
        .file_name()
        .ok_or_else(|| io::Error::other(format!("'{}' has no basename", record.filename)))?;

    let source = Utf8Path::new(&record.file_path);
    let source_name = source
        .file_name()
        .ok_or_else(|| io::Error::other(format!("'{source}' does not name a file")))?;
    let filename = if data_dir.exists(basename) {
        String::from(source_name)
    } else {
        String::from(basename)
    };
    let source_parent = source
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));

    let source_dir = Dir::open_ambient_dir(source_parent, ambient_authority())?;
    let mut reader = source_dir.open(source_name)?;
    let mut writer = data_dir.create(&filename)?;
    io::copy(&mut reader, &mut writer)?;

    Ok(filename)
}

fn io_failed(path: &Utf8Path, error: &io::Error) -> SandjobError {
    SandjobError::from(FilesystemError::IoError {
        path: path.as_std_path().to_path_buf(),
        message: error.to_string(),
    })
}
