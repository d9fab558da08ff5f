use crate::fs::{copy_dir, link_exists, link_target_exists};
use crate::run::Run;
use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Storage for run directories.
pub trait RunStore {
    fn runs_dir(&self) -> &Path;

    fn run_dir(&self, id: &str) -> PathBuf {
        self.runs_dir().join(id)
    }

    /// Copies `src` into a fresh run directory keyed by `id`.
    fn copy_run(&self, src: &Run, id: &str) -> Result<Run>;

    /// Resolves a link to the run it points at. `None` when nothing is
    /// present at `link`.
    fn open_link(&self, link: &Path) -> Result<Option<LinkedRun>>;
}

/// Run resolved through a trial link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedRun {
    pub run: Run,
    /// False when the link dangles.
    pub present: bool,
}

#[derive(Debug, Clone)]
pub struct FsRunStore {
    runs_dir: PathBuf,
}

impl FsRunStore {
    pub fn new(runs_dir: &Path) -> Self {
        Self {
            runs_dir: runs_dir.to_path_buf(),
        }
    }
}

impl RunStore for FsRunStore {
    fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    fn copy_run(&self, src: &Run, id: &str) -> Result<Run> {
        if !src.exists() {
            return Err(anyhow!("source run not found: {}", src.path.display()));
        }
        let run_dir = self.run_dir(id);
        if run_dir.exists() {
            return Err(anyhow!("run directory already exists: {}", run_dir.display()));
        }
        tracing::debug!(src = %src.path.display(), dst = %run_dir.display(), "copying run");
        copy_dir(&src.path, &run_dir)?;
        Ok(Run::new(id, &run_dir))
    }

    fn open_link(&self, link: &Path) -> Result<Option<LinkedRun>> {
        if !link_exists(link) {
            return Ok(None);
        }
        let meta = fs::symlink_metadata(link)?;
        let target = if meta.file_type().is_symlink() {
            let raw = fs::read_link(link)?;
            if raw.is_absolute() {
                raw
            } else {
                link.parent().unwrap_or(Path::new("")).join(raw)
            }
        } else {
            link.to_path_buf()
        };
        let id = target
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("link target has no run id: {}", target.display()))?
            .to_string();
        Ok(Some(LinkedRun {
            run: Run::new(&id, &target),
            present: link_target_exists(link),
        }))
    }
}

/// Source of run ids.
pub trait IdGenerator {
    fn next_id(&self) -> String;
}

/// Random v4 uuids rendered as 32 lowercase hex chars.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}
