//! Free space lookup for the volume holding the IPFS repo

use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// Available bytes on the mounted volume that contains `path`, 0 if no
/// mounted volume matches.
pub fn available_space(path: &Path) -> u64 {
    let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let mounts = disks
        .list()
        .iter()
        .map(|disk| (disk.mount_point().to_path_buf(), disk.available_space()));

    best_mount(&path, mounts).unwrap_or(0)
}

/// Pick the deepest mount point that is a prefix of `path`.
fn best_mount(path: &Path, mounts: impl Iterator<Item = (PathBuf, u64)>) -> Option<u64> {
    mounts
        .filter(|(mount, _)| path.starts_with(mount))
        .max_by_key(|(mount, _)| mount.components().count())
        .map(|(_, available)| available)
}
