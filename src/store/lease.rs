// src/store/lease.rs

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::error::{Result, WaveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseKind {
    Read,
    Write,
}

impl fmt::Display for LeaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseKind::Read => f.write_str("reading"),
            LeaseKind::Write => f.write_str("writing"),
        }
    }
}

/// Who currently holds which clip. One holder per path, reader or writer.
#[derive(Clone, Default)]
pub(crate) struct LeaseTable {
    held: Arc<Mutex<HashMap<PathBuf, LeaseKind>>>,
}

impl LeaseTable {
    fn table(&self) -> MutexGuard<'_, HashMap<PathBuf, LeaseKind>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn acquire(&self, key: PathBuf, kind: LeaseKind) -> Result<Lease> {
        let mut table = self.table();
        if let Some(&held) = table.get(&key) {
            return Err(WaveError::LeaseConflict { path: key, held });
        }
        table.insert(key.clone(), kind);
        debug!("lease granted: {} ({kind})", key.display());
        Ok(Lease {
            table: self.clone(),
            key,
            kind,
        })
    }

    pub(crate) fn holder(&self, key: &Path) -> Option<LeaseKind> {
        self.table().get(key).copied()
    }
}

/// Released on drop.
pub(crate) struct Lease {
    table: LeaseTable,
    key: PathBuf,
    kind: LeaseKind,
}

impl Lease {
    pub(crate) fn kind(&self) -> LeaseKind {
        self.kind
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.table.table().remove(&self.key);
        debug!("lease released: {} ({})", self.key.display(), self.kind);
    }
}

/// Stable key for a clip path: canonical parent directory plus file name.
/// The parent must already exist; the file itself need not.
pub(crate) fn lease_key(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} does not name a file", path.display()),
        )
    })?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok(parent.canonicalize()?.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lease_on_same_key_conflicts() {
        let table = LeaseTable::default();
        let key = PathBuf::from("/tmp/clip.wav");
        let _w = table.acquire(key.clone(), LeaseKind::Write).unwrap();
        match table.acquire(key.clone(), LeaseKind::Read) {
            Err(WaveError::LeaseConflict { held, .. }) => assert_eq!(held, LeaseKind::Write),
            other => panic!("expected conflict, got {:?}", other.map(|l| l.kind())),
        }
    }

    #[test]
    fn dropping_lease_frees_the_path() {
        let table = LeaseTable::default();
        let key = PathBuf::from("/tmp/clip.wav");
        let lease = table.acquire(key.clone(), LeaseKind::Read).unwrap();
        assert_eq!(table.holder(&key), Some(LeaseKind::Read));
        drop(lease);
        assert_eq!(table.holder(&key), None);
        assert!(table.acquire(key, LeaseKind::Write).is_ok());
    }

    #[test]
    fn relative_and_absolute_paths_share_a_key() {
        let dir = std::env::current_dir().unwrap();
        let a = lease_key(Path::new("some.wav")).unwrap();
        let b = lease_key(&dir.join("some.wav")).unwrap();
        assert_eq!(a, b);
    }
}
