use crate::run::Run;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_EXEC_COMMAND: [&str; 3] = ["lab", "run", "--yes"];

/// On-disk `config.yaml` under the lab home. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    runs_dir: Option<PathBuf>,
    #[serde(default)]
    cmd_dir: Option<PathBuf>,
    #[serde(default)]
    exec_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabConfig {
    pub home: PathBuf,
    pub runs_dir: PathBuf,
    pub cmd_dir: PathBuf,
    /// Directory of the controller's own run, when running inside one.
    pub run_dir: Option<PathBuf>,
    pub exec_command: Vec<String>,
}

impl LabConfig {
    pub fn from_env() -> Result<Self> {
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        let cwd = std::env::current_dir()?;
        Self::resolve(&vars, &cwd)
    }

    /// Resolves configuration from an explicit variable set. File values
    /// override defaults and environment values override file values.
    pub fn resolve(vars: &BTreeMap<String, String>, cwd: &Path) -> Result<Self> {
        let home = match vars.get("LAB_HOME") {
            Some(h) if !h.is_empty() => PathBuf::from(h),
            _ => vars
                .get("HOME")
                .map(|h| PathBuf::from(h).join(".lab"))
                .unwrap_or_else(|| cwd.join(".lab")),
        };
        let file = load_config_file(&home.join("config.yaml"))?;

        let runs_dir = env_path(vars, "LAB_RUNS_DIR")
            .or(file.runs_dir)
            .unwrap_or_else(|| home.join("runs"));
        let cmd_dir = env_path(vars, "CMD_DIR")
            .or(file.cmd_dir)
            .unwrap_or_else(|| cwd.to_path_buf());
        let exec_command = file
            .exec_command
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_EXEC_COMMAND.iter().map(|s| s.to_string()).collect());

        Ok(Self {
            home,
            runs_dir,
            cmd_dir,
            run_dir: env_path(vars, "RUN_DIR"),
            exec_command,
        })
    }

    pub fn current_run(&self) -> Result<Run> {
        let dir = self
            .run_dir
            .as_ref()
            .ok_or_else(|| anyhow!("RUN_DIR is not set and no batch run was given"))?;
        let id = dir
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("invalid run directory: {}", dir.display()))?;
        Ok(Run::new(id, dir))
    }
}

fn env_path(vars: &BTreeMap<String, String>, key: &str) -> Option<PathBuf> {
    vars.get(key).filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let bytes = fs::read(path)?;
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_slice(&bytes)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
}
