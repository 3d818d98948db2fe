// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Non-volatile storage.
//!
//! A store must be initialized before use. Initialization can fail in two
//! ways that are fixed by wiping the store: it is out of free pages, or it
//! was written by a different format version. [`init_or_reset`] handles
//! those; anything else is left to the caller.
//!
//! [`DirStore`] emulates a storage partition with a directory holding a
//! format-version file and, when there is one, the last captured dump.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NvsError {
    NoFreePages,
    NewVersionFound,
    Io(io::ErrorKind),
}

impl NvsError {
    /// Whether erasing the store clears this error.
    pub fn needs_erase(self) -> bool {
        matches!(self, NvsError::NoFreePages | NvsError::NewVersionFound)
    }
}

impl fmt::Display for NvsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvsError::NoFreePages => f.write_str("store has no free pages"),
            NvsError::NewVersionFound => {
                f.write_str("store holds a different format version")
            }
            NvsError::Io(kind) => write!(f, "store I/O error: {kind}"),
        }
    }
}

impl std::error::Error for NvsError {}

impl From<io::Error> for NvsError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::StorageFull => NvsError::NoFreePages,
            kind => NvsError::Io(kind),
        }
    }
}

pub trait NvStore {
    fn init(&mut self) -> Result<(), NvsError>;
    fn erase(&mut self) -> Result<(), NvsError>;
}

/// Initializes `store`, erasing it first if that's what it takes.
pub fn init_or_reset<S: NvStore + ?Sized>(
    store: &mut S,
) -> Result<(), NvsError> {
    match store.init() {
        Err(e) if e.needs_erase() => {
            log::warn!("{e}; erasing");
            store.erase()?;
            store.init()
        }
        r => r,
    }
}

const VERSION_FILE: &str = "format-version";
const DUMP_FILE: &str = "coredump.bin";

#[derive(Clone, Debug)]
pub struct DirStore {
    root: PathBuf,
    version: u32,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>, version: u32) -> Self {
        Self {
            root: root.into(),
            version,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Returns the dump left by a previous run, if any.
    pub fn pending_dump(&self) -> Result<Option<Vec<u8>>, NvsError> {
        match fs::read(self.root.join(DUMP_FILE)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores `dump`, replacing any dump already pending.
    pub fn save_dump(&self, dump: &[u8]) -> Result<(), NvsError> {
        // Write aside and rename, so that a crash while saving can't leave
        // half a dump behind.
        let tmp = self.root.join(format!("{DUMP_FILE}.tmp"));
        fs::write(&tmp, dump)?;
        fs::rename(&tmp, self.root.join(DUMP_FILE))?;
        Ok(())
    }

    pub fn clear_dump(&self) -> Result<(), NvsError> {
        remove_if_present(&self.root.join(DUMP_FILE))
    }
}

impl NvStore for DirStore {
    fn init(&mut self) -> Result<(), NvsError> {
        let text = match fs::read_to_string(self.root.join(VERSION_FILE)) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(NvsError::NewVersionFound);
            }
            Err(e) => return Err(e.into()),
        };
        match text.trim().parse::<u32>() {
            Ok(v) if v == self.version => Ok(()),
            _ => Err(NvsError::NewVersionFound),
        }
    }

    fn erase(&mut self) -> Result<(), NvsError> {
        // Only our own files go; the directory may be shared with anything.
        fs::create_dir_all(&self.root)?;
        remove_if_present(&self.root.join(DUMP_FILE))?;
        let version = format!("{}\n", self.version);
        fs::write(self.root.join(VERSION_FILE), version)?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<(), NvsError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A store whose `init` fails with each of `failures` in turn, then
    /// succeeds.
    #[derive(Default)]
    struct FakeStore {
        failures: Vec<NvsError>,
        inits: usize,
        erases: usize,
    }

    impl NvStore for FakeStore {
        fn init(&mut self) -> Result<(), NvsError> {
            self.inits += 1;
            if self.failures.is_empty() {
                Ok(())
            } else {
                Err(self.failures.remove(0))
            }
        }

        fn erase(&mut self) -> Result<(), NvsError> {
            self.erases += 1;
            Ok(())
        }
    }

    fn failing(failures: &[NvsError]) -> FakeStore {
        FakeStore {
            failures: failures.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn clean_store_is_not_erased() {
        let mut store = FakeStore::default();
        assert_eq!(init_or_reset(&mut store), Ok(()));
        assert_eq!((store.inits, store.erases), (1, 0));
    }

    #[test]
    fn erases_once_when_it_helps() {
        for e in [NvsError::NoFreePages, NvsError::NewVersionFound] {
            let mut store = failing(&[e]);
            assert_eq!(init_or_reset(&mut store), Ok(()));
            assert_eq!((store.inits, store.erases), (2, 1));
        }
    }

    #[test]
    fn other_errors_are_not_erased() {
        let e = NvsError::Io(io::ErrorKind::PermissionDenied);
        let mut store = failing(&[e]);
        assert_eq!(init_or_reset(&mut store), Err(e));
        assert_eq!((store.inits, store.erases), (1, 0));
    }

    #[test]
    fn failed_retry_is_reported() {
        let mut store =
            failing(&[NvsError::NoFreePages, NvsError::NoFreePages]);
        assert_eq!(init_or_reset(&mut store), Err(NvsError::NoFreePages));
        assert_eq!((store.inits, store.erases), (2, 1));
    }

    #[test]
    fn full_disk_means_no_free_pages() {
        let full = io::Error::from(io::ErrorKind::StorageFull);
        assert_eq!(NvsError::from(full), NvsError::NoFreePages);
        assert!(NvsError::NoFreePages.needs_erase());

        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let e = NvsError::from(denied);
        assert_eq!(e, NvsError::Io(io::ErrorKind::PermissionDenied));
        assert!(!e.needs_erase());
    }

    #[test]
    fn fresh_directory_is_formatted() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::new(dir.path().join("nvs"), 1);
        assert_eq!(store.init(), Err(NvsError::NewVersionFound));
        assert_eq!(init_or_reset(&mut store), Ok(()));
        assert_eq!(store.init(), Ok(()));
        assert_eq!(store.pending_dump(), Ok(None));
    }

    #[test]
    fn dump_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::new(dir.path(), 1);
        init_or_reset(&mut store).unwrap();
        store.save_dump(b"panic at the disco").unwrap();

        let mut again = DirStore::new(dir.path(), 1);
        init_or_reset(&mut again).unwrap();
        assert_eq!(
            again.pending_dump(),
            Ok(Some(b"panic at the disco".to_vec()))
        );
        again.clear_dump().unwrap();
        assert_eq!(again.pending_dump(), Ok(None));
        // Clearing twice is fine.
        assert_eq!(again.clear_dump(), Ok(()));
    }

    #[test]
    fn version_change_discards_dump() {
        let dir = tempfile::tempdir().unwrap();
        let mut old = DirStore::new(dir.path(), 1);
        init_or_reset(&mut old).unwrap();
        old.save_dump(b"stale").unwrap();

        let mut new = DirStore::new(dir.path(), 2);
        assert_eq!(new.init(), Err(NvsError::NewVersionFound));
        init_or_reset(&mut new).unwrap();
        assert_eq!(new.pending_dump(), Ok(None));
    }

    #[test]
    fn garbage_version_file_needs_erase() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(VERSION_FILE), "not a number").unwrap();
        let mut store = DirStore::new(dir.path(), 1);
        assert_eq!(store.init(), Err(NvsError::NewVersionFound));
    }

    #[test]
    fn erase_leaves_other_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("notes.txt");
        fs::write(&other, "keep me").unwrap();
        let mut store = DirStore::new(dir.path(), 1);
        store.erase().unwrap();
        assert_eq!(fs::read_to_string(&other).unwrap(), "keep me");
    }
}
