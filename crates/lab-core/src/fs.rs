use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::symlink;
use std::path::Path;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| anyhow!("failed to create directory {}: {}", path.display(), e))
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

/// Recursively copies `src` into `dst`, creating `dst` if needed.
///
/// Links inside the tree are followed and copied by content so the copy
/// shares no files with the source. Dangling links are recreated as links.
/// A link back to one of its own ancestors is skipped.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(anyhow!("copy source is not a directory: {}", src.display()));
    }
    ensure_dir(dst)?;
    for entry in walkdir::WalkDir::new(src).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                copy_unwalkable(src, dst, err)?;
                continue;
            }
        };
        let rel = entry.path().strip_prefix(src)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            fs::copy(entry.path(), &target).map_err(|e| {
                anyhow!(
                    "failed to copy {} -> {}: {}",
                    entry.path().display(),
                    target.display(),
                    e
                )
            })?;
        }
    }
    Ok(())
}

fn copy_unwalkable(src: &Path, dst: &Path, err: walkdir::Error) -> Result<()> {
    let Some(path) = err.path().map(Path::to_path_buf) else {
        return Err(err.into());
    };
    if let Some(ancestor) = err.loop_ancestor() {
        tracing::warn!(
            link = %path.display(),
            ancestor = %ancestor.display(),
            "skipping link loop while copying"
        );
        return Ok(());
    }
    if link_exists(&path) && !link_target_exists(&path) {
        let target = dst.join(path.strip_prefix(src)?);
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }
        return make_link(&fs::read_link(&path)?, &target);
    }
    Err(err.into())
}

/// True when something, possibly a dangling link, is present at `path`.
pub fn link_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// True when `path` resolves to an existing entry after following links.
pub fn link_target_exists(path: &Path) -> bool {
    fs::metadata(path).is_ok()
}

#[cfg(unix)]
pub fn make_link(target: &Path, link: &Path) -> Result<()> {
    symlink(target, link).map_err(|e| {
        anyhow!(
            "failed to link {} -> {}: {}",
            link.display(),
            target.display(),
            e
        )
    })
}

#[cfg(windows)]
pub fn make_link(target: &Path, link: &Path) -> Result<()> {
    std::os::windows::fs::symlink_dir(target, link).map_err(|e| {
        anyhow!(
            "failed to link {} -> {}: {}",
            link.display(),
            target.display(),
            e
        )
    })
}
