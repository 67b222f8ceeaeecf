//! Tar packing of staged files for injection into a sandbox.
//!
//! Archives are reproducible: entries come out in name order with paths
//! relative to the packed directory, fixed modes, and a zero mtime, so the
//! sandbox user can read every staged file whatever the worker's umask.
//! Only directories and regular files are packed. Anything else found in a
//! staging area, such as a symlink, is logged and left out of the archive.

use std::io;

use camino::Utf8Path;
use cap_std::fs_utf8::Dir;
use tar::{Builder, EntryType, Header};
use tracing::{debug, warn};

const DIRECTORY_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// Pack everything under `root` into an in-memory tar archive.
///
/// `origin` is the host path of `root`, used only for logging.
pub(super) fn pack(root: &Dir, origin: &Utf8Path) -> io::Result<Vec<u8>> {
    let mut packer = Packer {
        builder: Builder::new(vec![]),
        origin,
        packed: 0,
        skipped: 0,
    };
    packer.pack_dir(root, Utf8Path::new(""))?;

    debug!(
        staging = %origin,
        packed = packer.packed,
        skipped = packer.skipped,
        "staging archive built"
    );
    packer.builder.into_inner()
}

struct Packer<'a> {
    builder: Builder<Vec<u8>>,
    origin: &'a Utf8Path,
    packed: usize,
    skipped: usize,
}

impl Packer<'_> {
    fn pack_dir(&mut self, dir: &Dir, prefix: &Utf8Path) -> io::Result<()> {
        let mut listing = vec![];
        for entry_result in dir.entries()? {
            let entry = entry_result?;
            listing.push((entry.file_name()?, entry.file_type()?));
        }
        listing.sort_unstable_by(|(left, _), (right, _)| left.cmp(right));

        for (name, file_type) in listing {
            let path = prefix.join(&name);
            if file_type.is_dir() {
                let mut header = entry_header(EntryType::Directory, 0, DIRECTORY_MODE);
                self.builder
                    .append_data(&mut header, format!("{path}/"), io::empty())?;
                self.packed += 1;
                self.pack_dir(&dir.open_dir(&name)?, &path)?;
            } else if file_type.is_file() {
                let mut file = dir.open(&name)?;
                let size = file.metadata()?.len();
                let mut header = entry_header(EntryType::Regular, size, FILE_MODE);
                self.builder
                    .append_data(&mut header, path.as_str(), &mut file)?;
                self.packed += 1;
            } else {
                warn!(
                    staging = %self.origin,
                    entry = %path,
                    "not a regular file or directory; left out of the sandbox"
                );
                self.skipped += 1;
            }
        }
        Ok(())
    }
}

fn entry_header(kind: EntryType, size: u64, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_cksum();
    header
}
