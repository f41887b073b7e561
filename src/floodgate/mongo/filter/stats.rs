use std::ffi::CString;
use std::io;
use std::path::Path;

use futures::future::BoxFuture;

use crate::floodgate::common::{Error, Result};

/// Storage statistics reported by the backend for one database, in bytes
/// except where the field name says otherwise. The wire encodes these as
/// int32, int64 or double depending on magnitude; sources normalize to f64.
#[derive(Debug, Default, Clone, Copy)]
pub struct DbStats {
    pub data_size: f64,
    pub index_size: f64,
    pub file_size: f64,
    pub ns_size_mb: f64,
}

/// The data-size monitor's view of the backend: something that can produce
/// a current DbStats on demand. Implementations own their backend session
/// and re-establish it on error.
pub trait StatsSource: Send {
    fn fetch(&mut self) -> BoxFuture<'_, Result<DbStats>>;
}

/// Size in bytes the filesystem under base_dir can actually hand out,
/// i.e. total size minus the block reservation the filesystem keeps for
/// itself.
pub fn fs_usable_size(base_dir: &str, reserved_blocks: f64) -> Result<u64> {
    let path = CString::new(base_dir).map_err(|_| Error::new("base_dir contains a NUL byte"))?;
    let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(path.as_ptr(), &mut vfs) };
    if rc != 0 {
        return Err(Error::from(io::Error::last_os_error()));
    }
    let total = (vfs.f_frsize as u64).saturating_mul(vfs.f_blocks as u64);
    Ok((total as f64 * (1.0 - reserved_blocks)) as u64)
}

/// Total size of the write-ahead journal files under dir. A missing
/// directory contributes zero; journaling may simply be off.
pub fn journal_files_size(dir: &Path) -> u64 {
    let mut total = 0;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            total += journal_files_size(&path);
        } else if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    total
}
