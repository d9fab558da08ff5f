//! One flag combination of a batch and the run materialized for it.
//!
//! A trial is initialized once a link named after its id exists in the
//! batch run. The link is created only after the copied run and its `flags`
//! and `label` attributes are written, so link presence implies a complete
//! run. A crash before that point leaves an unreferenced run directory and
//! an uninitialized trial.

use crate::batch::Batch;
use crate::error::{BatchError, Result};
use crate::executor::{ExecRequest, Executor};
use crate::flags::{flag_assigns, flags_label, Flags};
use lab_core::fs::{link_exists, make_link};
use lab_core::{LinkedRun, Run};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Trial<'a> {
    batch: &'a Batch,
    id: String,
    flags: Flags,
    link: PathBuf,
}

impl<'a> Trial<'a> {
    pub(crate) fn new(batch: &'a Batch, id: &str, flags: Flags) -> Self {
        Self {
            batch,
            id: id.to_string(),
            flags,
            link: batch.batch_run().path.join(id),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn link(&self) -> &Path {
        &self.link
    }

    pub fn flag_assigns(&self) -> Vec<String> {
        flag_assigns(&self.flags)
    }

    pub fn label(&self) -> String {
        flags_label(&self.flags)
    }

    /// True once the trial link exists, whether or not its target does.
    pub fn initialized(&self) -> bool {
        link_exists(&self.link)
    }

    /// True when the link exists but the run it points at is gone.
    pub fn run_deleted(&self) -> bool {
        match self.batch.store().open_link(&self.link) {
            Ok(Some(linked)) => !linked.present,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    trial = %self.id,
                    link = %self.link.display(),
                    "unreadable trial link: {:#}",
                    e
                );
                false
            }
        }
    }

    /// Materializes the trial run. Does nothing when already initialized.
    pub fn init(&self) -> Result<()> {
        if self.initialized() {
            tracing::debug!(trial = %self.id, "trial already initialized");
            return Ok(());
        }
        let run = self.init_trial_run()?;
        let target = fs::canonicalize(&run.path).map_err(anyhow::Error::from)?;
        make_link(&target, &self.link)?;
        tracing::debug!(trial = %self.id, run_dir = %target.display(), "initialized trial");
        Ok(())
    }

    fn init_trial_run(&self) -> Result<Run> {
        let orphan = self.batch.store().run_dir(&self.id);
        if orphan.exists() {
            tracing::warn!(trial = %self.id, run_dir = %orphan.display(), "removing unlinked trial run");
            fs::remove_dir_all(&orphan).map_err(anyhow::Error::from)?;
        }
        let run = self
            .batch
            .store()
            .copy_run(self.batch.proto_run(), &self.id)?;
        run.write_attr("flags", &Value::Object(self.flags.clone()))?;
        run.write_attr("label", &Value::String(self.label()))?;
        Ok(run)
    }

    /// Removes the trial link so a later `init` materializes a fresh run
    /// under the same id, replacing whatever is left of the old one.
    pub fn reset_link(&self) -> Result<()> {
        if self.initialized() {
            fs::remove_file(&self.link).map_err(anyhow::Error::from)?;
        }
        Ok(())
    }

    fn initialized_run(&self) -> Result<LinkedRun> {
        self.batch
            .store()
            .open_link(&self.link)?
            .ok_or_else(|| BatchError::NotInitialized {
                trial_id: self.id.clone(),
            })
    }

    /// Restarts the trial run through `executor`, blocking until it exits.
    ///
    /// A non-zero exit surfaces as [`BatchError::Exit`] carrying the same
    /// status for the controller to exit with.
    pub fn run(&self, executor: &dyn Executor, cwd: &Path) -> Result<()> {
        let linked = self.initialized_run()?;
        if !linked.present {
            tracing::warn!(trial = %self.id, target = %linked.run.path.display(), "trial run was deleted");
            return Err(BatchError::RunDeleted {
                trial_id: self.id.clone(),
                target: linked.run.path,
            });
        }
        let run = linked.run;
        let opspec = run.opref()?.to_opspec();
        tracing::info!("Running {} ({})", opspec, self.flag_assigns().join(", "));

        let mut extra_env = BTreeMap::new();
        extra_env.insert("NO_RESTARTING_MSG".to_string(), "1".to_string());
        let outcome = executor.execute(&ExecRequest {
            restart: run.id.clone(),
            run_dir: run.path.clone(),
            cwd: cwd.to_path_buf(),
            extra_env,
        })?;
        if !outcome.success() {
            return Err(BatchError::Exit {
                code: outcome.exit_code(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecOutcome;
    use lab_core::{ensure_dir, FsRunStore, OpRef, UuidIds};
    use serde_json::json;
    use std::cell::RefCell;
    use std::sync::Arc;

    struct FixedExit(i32, RefCell<Vec<ExecRequest>>);

    impl Executor for FixedExit {
        fn execute(&self, req: &ExecRequest) -> anyhow::Result<ExecOutcome> {
            self.1.borrow_mut().push(req.clone());
            Ok(ExecOutcome { code: Some(self.0) })
        }
    }

    fn batch(root: &Path) -> Batch {
        let batch_dir = root.join("runs").join("batch");
        let proto = Run::new("", &batch_dir.join(".lab").join("proto"));
        ensure_dir(&proto.path).expect("proto");
        proto
            .write_opref(&OpRef::new("labfile", "/p/lab.yml", "1", "mnist", "train"))
            .expect("opref");
        Batch::open(
            Run::new("batch", &batch_dir),
            Arc::new(FsRunStore::new(&root.join("runs"))),
            Arc::new(UuidIds),
        )
        .map_err(|e| e.to_string())
        .expect("open")
    }

    fn flags(value: Value) -> Flags {
        value.as_object().cloned().expect("object")
    }

    #[cfg(unix)]
    #[test]
    fn init_materializes_run_with_flags_and_label() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = batch(root.path());
        let trial = batch.trial(flags(json!({"lr": 0.1, "batch_size": 32})));
        assert!(!trial.initialized());

        trial.init().expect("init");
        assert!(trial.initialized());
        let run = Run::new(trial.id(), &root.path().join("runs").join(trial.id()));
        assert_eq!(
            run.read_attr("flags").unwrap(),
            Some(json!({"lr": 0.1, "batch_size": 32}))
        );
        assert_eq!(
            run.read_attr("label").unwrap(),
            Some(json!("batch_size=32 lr=0.1"))
        );
        assert!(run.lab_path(&["opref"]).is_file());
    }

    #[test]
    fn run_before_init_is_rejected() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = batch(root.path());
        let trial = batch.trial(flags(json!({"lr": 0.1})));
        let exec = FixedExit(0, RefCell::new(Vec::new()));
        let err = trial
            .run(&exec, root.path())
            .expect_err("not initialized");
        assert!(matches!(err, BatchError::NotInitialized { .. }), "{}", err);
        assert!(exec.1.borrow().is_empty());
        assert!(!root.path().join("runs").join(trial.id()).exists());
    }

    #[cfg(unix)]
    #[test]
    fn run_restarts_trial_run_with_env() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = batch(root.path());
        let trial = batch.trial(flags(json!({"lr": 0.1})));
        trial.init().expect("init");
        let exec = FixedExit(0, RefCell::new(Vec::new()));
        trial.run(&exec, Path::new("/work")).expect("run");

        let reqs = exec.1.borrow();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].restart, trial.id());
        assert_eq!(reqs[0].cwd, PathBuf::from("/work"));
        assert_eq!(
            reqs[0].extra_env.get("NO_RESTARTING_MSG").map(String::as_str),
            Some("1")
        );
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_becomes_exit_error() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = batch(root.path());
        let trial = batch.trial(flags(json!({"lr": 0.1})));
        trial.init().expect("init");
        let err = trial
            .run(&FixedExit(42, RefCell::new(Vec::new())), root.path())
            .expect_err("exit");
        assert!(matches!(err, BatchError::Exit { code: 42 }), "{}", err);
        assert_eq!(err.exit_code(), 42);
    }

    #[cfg(unix)]
    #[test]
    fn deleted_run_is_not_executed() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = batch(root.path());
        let trial = batch.trial(flags(json!({"lr": 0.1})));
        trial.init().expect("init");
        fs::remove_dir_all(root.path().join("runs").join(trial.id())).expect("remove");

        assert!(trial.initialized());
        assert!(trial.run_deleted());
        trial.init().expect("init is a no-op");
        assert!(!root.path().join("runs").join(trial.id()).exists());

        let exec = FixedExit(0, RefCell::new(Vec::new()));
        let err = trial.run(&exec, root.path()).expect_err("deleted");
        assert!(matches!(err, BatchError::RunDeleted { .. }), "{}", err);
        assert!(exec.1.borrow().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn init_replaces_unlinked_partial_run() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = batch(root.path());
        let trial = batch.trial(flags(json!({"lr": 0.1})));
        let partial = root.path().join("runs").join(trial.id());
        ensure_dir(&partial).expect("partial run");
        fs::write(partial.join("half-copied"), "x").expect("write");

        trial.init().expect("init");
        assert!(trial.initialized());
        assert!(!partial.join("half-copied").exists());
        assert!(partial.join(".lab").join("attrs").join("label").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn reset_link_allows_rematerializing() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = batch(root.path());
        let trial = batch.trial(flags(json!({"lr": 0.1})));
        trial.init().expect("init");
        fs::remove_dir_all(root.path().join("runs").join(trial.id())).expect("remove");

        trial.reset_link().expect("reset");
        assert!(!trial.initialized());
        trial.init().expect("re-init");
        assert!(trial.initialized());
        assert!(!trial.run_deleted());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_link_is_not_reported_as_deleted() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = batch(root.path());
        let trial = batch.trial(flags(json!({"lr": 0.1})));
        make_link(Path::new("/"), trial.link()).expect("link to root");

        assert!(trial.initialized());
        assert!(!trial.run_deleted());
        let exec = FixedExit(0, RefCell::new(Vec::new()));
        let err = trial.run(&exec, root.path()).expect_err("bad link");
        assert!(matches!(err, BatchError::Store(_)), "{}", err);
        assert!(err.to_string().contains("no run id"), "{}", err);
        assert!(exec.1.borrow().is_empty());
    }
}
