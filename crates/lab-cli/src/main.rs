use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use lab_batch::{print_trials, trials_table, Batch, BatchError, Flags, ProcessExecutor};
use lab_core::{FsRunStore, LabConfig, Run, UuidIds};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lab-batch", version = "0.3.0", about = "Run batch trials from a prototype run")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Materialize and run each trial in a trials file.
    Run {
        #[arg(long)]
        trials: PathBuf,
        #[arg(long)]
        batch_run: Option<PathBuf>,
        #[arg(long)]
        runs_dir: Option<PathBuf>,
        #[arg(long)]
        cmd_dir: Option<PathBuf>,
        /// Run trials that were already materialized by an earlier invocation.
        #[arg(long)]
        rerun: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the trials in a trials file without running anything.
    Preview {
        #[arg(long)]
        trials: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List trials already linked from a batch run.
    Status {
        #[arg(long)]
        batch_run: Option<PathBuf>,
        #[arg(long)]
        runs_dir: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Some(payload)) => emit_json(&payload),
        Ok(None) => {}
        Err(err) => {
            let batch_err = err.downcast_ref::<BatchError>();
            let code = batch_err.map(BatchError::exit_code).unwrap_or(1);
            if json_mode {
                let kind = match batch_err {
                    Some(BatchError::Exit { .. }) => "trial_failed",
                    Some(BatchError::MissingProto { .. }) => "missing_proto",
                    _ => "command_failed",
                };
                emit_json(&json_error(kind, err.to_string(), json!({ "exit_code": code })));
            } else if !matches!(batch_err, Some(BatchError::Exit { .. })) {
                eprintln!("lab-batch: {:#}", err);
            }
            std::process::exit(code);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LAB_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            trials,
            batch_run,
            runs_dir,
            cmd_dir,
            rerun,
            json,
        } => {
            let config = load_config(runs_dir, cmd_dir)?;
            let flag_list = load_trials_file(&trials)?;
            let batch = open_batch(&config, batch_run.as_deref())?;
            let executor = ProcessExecutor::new(config.exec_command.clone())?;

            let mut ran = Vec::new();
            let mut skipped = Vec::new();
            for trial in batch.resolve_trials(flag_list)? {
                if trial.run_deleted() {
                    tracing::warn!("Skipping trial {}: run was deleted", trial.id());
                    skipped.push(json!({"trial_id": trial.id(), "reason": "deleted"}));
                    continue;
                }
                if trial.initialized() && !rerun {
                    tracing::info!("Skipping trial {} ({})", trial.id(), trial.label());
                    skipped.push(json!({"trial_id": trial.id(), "reason": "initialized"}));
                    continue;
                }
                trial.init()?;
                trial.run(&executor, &config.cmd_dir)?;
                ran.push(json!({"trial_id": trial.id(), "label": trial.label()}));
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "batch_run": batch.batch_run().path.to_string_lossy(),
                    "ran": ran,
                    "skipped": skipped,
                })));
            }
            println!("ran: {}", ran.len());
            println!("skipped: {}", skipped.len());
            Ok(None)
        }
        Commands::Preview { trials, json } => {
            let flag_list = load_trials_file(&trials)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "preview",
                    "table": trials_table(&flag_list),
                })));
            }
            print_trials(&flag_list)?;
            Ok(None)
        }
        Commands::Status {
            batch_run,
            runs_dir,
            json,
        } => {
            let config = load_config(runs_dir, None)?;
            let batch = open_batch(&config, batch_run.as_deref())?;
            let trials = batch.existing_trials()?;
            let rows: Vec<Value> = trials
                .iter()
                .map(|t| {
                    json!({
                        "trial_id": t.id(),
                        "state": if t.run_deleted() { "deleted" } else { "initialized" },
                        "label": t.label(),
                    })
                })
                .collect();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "batch_run": batch.batch_run().path.to_string_lossy(),
                    "trials": rows,
                })));
            }
            for row in &rows {
                println!(
                    "{}  {:<11}  {}",
                    row["trial_id"].as_str().unwrap_or_default(),
                    row["state"].as_str().unwrap_or_default(),
                    row["label"].as_str().unwrap_or_default()
                );
            }
            Ok(None)
        }
    }
}

fn load_config(runs_dir: Option<PathBuf>, cmd_dir: Option<PathBuf>) -> Result<LabConfig> {
    let mut config = LabConfig::from_env()?;
    if let Some(dir) = runs_dir {
        config.runs_dir = dir;
    }
    if let Some(dir) = cmd_dir {
        config.cmd_dir = dir;
    }
    Ok(config)
}

fn open_batch(config: &LabConfig, batch_run: Option<&Path>) -> Result<Batch> {
    let run = match batch_run {
        Some(dir) => run_from_dir(dir)?,
        None => config.current_run()?,
    };
    let batch = Batch::open(
        run,
        Arc::new(FsRunStore::new(&config.runs_dir)),
        Arc::new(UuidIds),
    )?;
    Ok(batch)
}

fn run_from_dir(dir: &Path) -> Result<Run> {
    let dir = dir
        .canonicalize()
        .map_err(|_| anyhow!("batch run not found: {}", dir.display()))?;
    let id = dir
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("invalid batch run directory: {}", dir.display()))?
        .to_string();
    Ok(Run::new(&id, &dir))
}

/// Loads a YAML or JSON list of flag mappings.
fn load_trials_file(path: &Path) -> Result<Vec<Flags>> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow!("failed to read trials file {}: {}", path.display(), e))?;
    let values: Vec<Value> = serde_yaml::from_slice(&bytes)
        .map_err(|e| anyhow!("invalid trials file {}: {}", path.display(), e))?;
    parse_flag_list(values)
}

fn parse_flag_list(values: Vec<Value>) -> Result<Vec<Flags>> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Flags::new()),
            other => Err(anyhow!(
                "trial {} must be a mapping of flag names to values (found: {})",
                i + 1,
                other
            )),
        })
        .collect()
}

fn emit_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details,
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Preview { json, .. }
        | Commands::Status { json, .. } => *json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_list_accepts_mappings_and_null() {
        let values: Vec<Value> =
            serde_yaml::from_str("- {lr: 0.1, batch_size: 32}\n- null\n").expect("yaml");
        let flags = parse_flag_list(values).expect("flags");
        assert_eq!(flags.len(), 2);
        assert_eq!(flags[0]["lr"], json!(0.1));
        assert_eq!(flags[0]["batch_size"], json!(32));
        assert!(flags[1].is_empty());
    }

    #[test]
    fn flag_list_rejects_scalars() {
        let err = parse_flag_list(vec![json!({"a": 1}), json!(3)]).expect_err("scalar");
        assert!(err.to_string().contains("trial 2"), "{}", err);
    }

    #[test]
    fn json_trials_file_is_accepted() {
        let dir = std::env::temp_dir().join(format!("lab_batch_trials_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("trials.json");
        std::fs::write(&path, r#"[{"opt": "adam", "quiet": true}]"#).expect("write");
        let flags = load_trials_file(&path).expect("load");
        assert_eq!(flags[0]["opt"], json!("adam"));
        assert_eq!(flags[0]["quiet"], json!(true));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn json_mode_is_read_from_every_command() {
        let cli = Cli::parse_from(["lab-batch", "preview", "--trials", "t.yml", "--json"]);
        assert!(command_json_mode(&cli.command));
        let cli = Cli::parse_from(["lab-batch", "status"]);
        assert!(!command_json_mode(&cli.command));
    }
}
