use crate::fs::{atomic_write_bytes, atomic_write_json_pretty};
use crate::opref::OpRef;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the management area inside every run directory.
pub const LAB_DIR: &str = ".lab";

/// Handle over a run directory. Construction never touches the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub id: String,
    pub path: PathBuf,
}

impl Run {
    pub fn new(id: &str, path: &Path) -> Self {
        Self {
            id: id.to_string(),
            path: path.to_path_buf(),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn lab_path(&self, parts: &[&str]) -> PathBuf {
        let mut p = self.path.join(LAB_DIR);
        for part in parts {
            p = p.join(part);
        }
        p
    }

    fn attr_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(anyhow!("invalid attribute name: {:?}", key));
        }
        Ok(self.lab_path(&["attrs", key]))
    }

    pub fn write_attr(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.attr_path(key)?;
        atomic_write_json_pretty(&path, value)
            .map_err(|e| anyhow!("failed to write attr {} for run {}: {}", key, self.id, e))
    }

    pub fn read_attr(&self, key: &str) -> Result<Option<Value>> {
        let path = self.attr_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let value = serde_json::from_slice(&fs::read(&path)?)
            .map_err(|e| anyhow!("corrupt attr {} in {}: {}", key, path.display(), e))?;
        Ok(Some(value))
    }

    pub fn opref(&self) -> Result<OpRef> {
        let path = self.lab_path(&["opref"]);
        let line = fs::read_to_string(&path)
            .map_err(|e| anyhow!("missing opref for run {} ({}): {}", self.id, path.display(), e))?;
        line.trim().parse()
    }

    pub fn write_opref(&self, opref: &OpRef) -> Result<()> {
        atomic_write_bytes(
            &self.lab_path(&["opref"]),
            format!("{}\n", opref).as_bytes(),
        )
    }
}
