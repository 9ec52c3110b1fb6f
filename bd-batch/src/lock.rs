// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./lock_test.rs"]
mod tests;

use anyhow::{Context, bail};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const LOCK_FILE_NAME: &str = ".batch_lock";

/// Ownership of a store directory by a single `BatchStore`. The owner holds an exclusive flock on
/// `.batch_lock` and records its process id in it, so a refused open can name the owner. Released
/// on drop.
#[derive(Debug)]
pub struct DirectoryLock {
  _owner: File,
}

impl DirectoryLock {
  /// Creates the store directory if needed and claims it without blocking.
  pub fn try_acquire(directory: &Path) -> anyhow::Result<Self> {
    std::fs::create_dir_all(directory)
      .with_context(|| format!("failed to create store directory {}", directory.display()))?;

    let path = directory.join(LOCK_FILE_NAME);
    let mut owner = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .with_context(|| format!("failed to open {}", path.display()))?;

    if owner.try_lock_exclusive().is_err() {
      match read_owner_pid(&mut owner) {
        Some(pid) => bail!("store directory is in use by process {pid}"),
        None => bail!("store directory is in use by another store"),
      }
    }

    owner.set_len(0)?;
    owner.seek(SeekFrom::Start(0))?;
    write!(owner, "{}", std::process::id())?;
    log::debug!("claimed store directory {}", directory.display());

    Ok(Self { _owner: owner })
  }
}

fn read_owner_pid(file: &mut File) -> Option<u32> {
  let mut contents = String::new();
  file.read_to_string(&mut contents).ok()?;
  contents.trim().parse().ok()
}
