// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Zip extraction for script and dataset archives.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::task::TaskError;

/// Extract `archive` into `dest`, returning the number of files written.
/// Entries whose names escape `dest` are skipped.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<usize, TaskError> {
    let fail = |e: &dyn std::fmt::Display| {
        TaskError::ExtractFailure(format!("{}: {}", archive.display(), e))
    };

    let file = File::open(archive).map_err(|e| fail(&e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| fail(&e))?;
    fs::create_dir_all(dest).map_err(|e| fail(&e))?;

    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| fail(&e))?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(archive = %archive.display(), entry = entry.name(), "Skipping unsafe archive entry");
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| fail(&e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| fail(&e))?;
        }
        let mut out = File::create(&target).map_err(|e| fail(&e))?;
        io::copy(&mut entry, &mut out).map_err(|e| fail(&e))?;
        written += 1;
    }

    debug!(archive = %archive.display(), dest = %dest.display(), files = written, "Extracted archive");
    Ok(written)
}

/// [`extract_zip`] on the blocking pool.
pub async fn unzip(archive: PathBuf, dest: PathBuf) -> Result<usize, TaskError> {
    tokio::task::spawn_blocking(move || extract_zip(&archive, &dest))
        .await
        .map_err(|e| TaskError::ExtractFailure(format!("extraction task failed: {}", e)))?
}

/// Unpack every `*.zip` directly inside `dir` into `dir`.
pub async fn unzip_all_in(dir: PathBuf) -> Result<usize, TaskError> {
    let mut archives = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_zip = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if is_zip && entry.file_type().await?.is_file() {
            archives.push(path);
        }
    }
    archives.sort();

    let mut total = 0;
    for archive in archives {
        total += unzip(archive, dir.clone()).await?;
    }
    Ok(total)
}
