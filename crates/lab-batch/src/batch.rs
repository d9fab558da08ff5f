use crate::error::{BatchError, Result};
use crate::flags::Flags;
use crate::trial::Trial;
use lab_core::{IdGenerator, LabConfig, LinkedRun, Run, RunStore};
use std::fs;
use std::sync::Arc;

/// A batch run together with the prototype its trials are copied from.
pub struct Batch {
    batch_run: Run,
    proto_run: Run,
    store: Arc<dyn RunStore>,
    ids: Arc<dyn IdGenerator>,
}

impl Batch {
    /// Binds `batch_run` to the prototype in its `.lab/proto` directory.
    pub fn open(
        batch_run: Run,
        store: Arc<dyn RunStore>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        let proto_path = batch_run.lab_path(&["proto"]);
        if !proto_path.is_dir() {
            return Err(BatchError::MissingProto { path: proto_path });
        }
        let proto_run = Run::new("", &proto_path);
        tracing::debug!(batch = %batch_run.id, proto = %proto_path.display(), "opened batch");
        Ok(Self {
            batch_run,
            proto_run,
            store,
            ids,
        })
    }

    /// Opens the batch for the controller's own run.
    pub fn from_config(config: &LabConfig) -> Result<Self> {
        let store = Arc::new(lab_core::FsRunStore::new(&config.runs_dir));
        Self::open(config.current_run()?, store, Arc::new(lab_core::UuidIds))
    }

    pub fn batch_run(&self) -> &Run {
        &self.batch_run
    }

    pub fn proto_run(&self) -> &Run {
        &self.proto_run
    }

    pub(crate) fn store(&self) -> &dyn RunStore {
        self.store.as_ref()
    }

    /// New trial with a freshly minted id.
    pub fn trial(&self, flags: Flags) -> Trial<'_> {
        self.trial_with_id(&self.ids.next_id(), flags)
    }

    pub fn trial_with_id(&self, id: &str, flags: Flags) -> Trial<'_> {
        Trial::new(self, id, flags)
    }

    /// Trials already linked from the batch run, ordered by id.
    ///
    /// Flags come from each linked run's `flags` attribute and are empty
    /// when the run is gone.
    pub fn existing_trials(&self) -> Result<Vec<Trial<'_>>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.batch_run.path).map_err(anyhow::Error::from)? {
            let entry = entry.map_err(anyhow::Error::from)?;
            if !entry
                .file_type()
                .map_err(anyhow::Error::from)?
                .is_symlink()
            {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        ids.sort();

        let mut trials = Vec::with_capacity(ids.len());
        for id in ids {
            let link = self.batch_run.path.join(&id);
            let linked = match self.store.open_link(&link)? {
                Some(linked) if self.is_trial_target(&linked, &id) => linked,
                _ => {
                    tracing::debug!(link = %link.display(), "ignoring non-trial link");
                    continue;
                }
            };
            let flags = if linked.present {
                linked
                    .run
                    .read_attr("flags")?
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default()
            } else {
                Flags::new()
            };
            trials.push(self.trial_with_id(&id, flags));
        }
        Ok(trials)
    }

    /// A trial link points at `<runs_dir>/<link name>`. The target itself
    /// may be gone.
    fn is_trial_target(&self, linked: &LinkedRun, id: &str) -> bool {
        if linked.run.id != id {
            return false;
        }
        let Some(parent) = linked.run.path.parent() else {
            return false;
        };
        let runs_dir = self.store.runs_dir();
        if parent == runs_dir {
            return true;
        }
        match (fs::canonicalize(parent), fs::canonicalize(runs_dir)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// One trial per requested mapping, reusing a live existing trial whose
    /// recorded flags are equal. Each existing trial is reused at most once.
    pub fn resolve_trials(&self, flag_list: Vec<Flags>) -> Result<Vec<Trial<'_>>> {
        let mut existing: Vec<Option<Trial<'_>>> = self
            .existing_trials()?
            .into_iter()
            .filter(|t| !t.run_deleted())
            .map(Some)
            .collect();
        let mut trials = Vec::with_capacity(flag_list.len());
        for flags in flag_list {
            let reused = existing
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|t| t.flags() == &flags))
                .and_then(Option::take);
            match reused {
                Some(trial) => {
                    tracing::debug!(trial = %trial.id(), "reusing existing trial");
                    trials.push(trial);
                }
                None => trials.push(self.trial(flags)),
            }
        }
        Ok(trials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_core::{ensure_dir, FsRunStore, UuidIds};
    use serde_json::json;

    fn flags(value: serde_json::Value) -> Flags {
        value.as_object().cloned().expect("object")
    }

    fn setup(root: &std::path::Path) -> Run {
        let batch_dir = root.join("runs").join("batch");
        ensure_dir(&batch_dir.join(".lab").join("proto")).expect("proto");
        Run::new("batch", &batch_dir)
    }

    fn open(root: &std::path::Path, batch_run: Run) -> Result<Batch> {
        Batch::open(
            batch_run,
            Arc::new(FsRunStore::new(&root.join("runs"))),
            Arc::new(UuidIds),
        )
    }

    #[test]
    fn open_resolves_proto_under_management_area() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = open(root.path(), setup(root.path())).expect("open");
        assert_eq!(
            batch.proto_run().path,
            root.path().join("runs/batch/.lab/proto")
        );
        assert_eq!(batch.proto_run().id, "");
        assert_eq!(batch.batch_run().id, "batch");
    }

    #[test]
    fn from_config_uses_current_run_and_runs_dir() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch_run = setup(root.path());
        let config = LabConfig {
            home: root.path().join("home"),
            runs_dir: root.path().join("runs"),
            cmd_dir: root.path().to_path_buf(),
            run_dir: Some(batch_run.path.clone()),
            exec_command: vec!["true".to_string()],
        };
        let batch = Batch::from_config(&config).expect("open");
        assert_eq!(batch.batch_run(), &batch_run);
        assert_eq!(batch.store().run_dir("x"), root.path().join("runs").join("x"));

        let no_run = LabConfig {
            run_dir: None,
            ..config
        };
        assert!(Batch::from_config(&no_run).is_err());
    }

    #[test]
    fn open_fails_without_proto() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch_dir = root.path().join("runs").join("batch");
        ensure_dir(&batch_dir).expect("batch dir");
        let err = open(root.path(), Run::new("batch", &batch_dir))
            .err()
            .expect("missing proto");
        match err {
            BatchError::MissingProto { path } => {
                assert_eq!(path, batch_dir.join(".lab").join("proto"))
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn trials_get_distinct_ids_and_links() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = open(root.path(), setup(root.path())).expect("open");
        let a = batch.trial(flags(json!({"lr": 0.1})));
        let b = batch.trial(flags(json!({"lr": 0.1})));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.link(), batch.batch_run().path.join(a.id()));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_trials_reuses_live_trials_once() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = open(root.path(), setup(root.path())).expect("open");
        let first = batch.trial(flags(json!({"lr": 0.1})));
        first.init().expect("init");
        let first_id = first.id().to_string();

        let resolved = batch
            .resolve_trials(vec![
                flags(json!({"lr": 0.1})),
                flags(json!({"lr": 0.1})),
                flags(json!({"lr": 0.2})),
            ])
            .expect("resolve");
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].id(), first_id);
        assert!(resolved[0].initialized());
        assert_ne!(resolved[1].id(), first_id);
        assert!(!resolved[1].initialized());
        assert!(!resolved[2].initialized());
    }

    #[cfg(unix)]
    #[test]
    fn existing_trials_include_deleted_runs() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = open(root.path(), setup(root.path())).expect("open");
        let live = batch.trial(flags(json!({"x": 1})));
        live.init().expect("init live");
        let gone = batch.trial(flags(json!({"x": 2})));
        gone.init().expect("init gone");
        fs::remove_dir_all(root.path().join("runs").join(gone.id())).expect("remove run");

        let existing = batch.existing_trials().expect("existing");
        assert_eq!(existing.len(), 2);
        let by_id = |id: &str| existing.iter().find(|t| t.id() == id).expect("trial");
        assert_eq!(by_id(live.id()).flags(), &flags(json!({"x": 1})));
        assert!(!by_id(live.id()).run_deleted());
        assert!(by_id(gone.id()).run_deleted());
        assert!(by_id(gone.id()).flags().is_empty());

        let resolved = batch
            .resolve_trials(vec![flags(json!({}))])
            .expect("resolve");
        assert!(!resolved[0].initialized());
    }

    #[cfg(unix)]
    #[test]
    fn resource_links_in_batch_run_are_not_trials() {
        let root = tempfile::tempdir().expect("temp dir");
        let batch = open(root.path(), setup(root.path())).expect("open");
        let dataset = root.path().join("datasets").join("mnist");
        ensure_dir(&dataset).expect("dataset");
        lab_core::fs::make_link(&dataset, &batch.batch_run().path.join("data"))
            .expect("data link");
        let stray = root.path().join("runs").join("other");
        ensure_dir(&stray).expect("stray run");
        lab_core::fs::make_link(&stray, &batch.batch_run().path.join("renamed"))
            .expect("renamed link");
        let trial = batch.trial(flags(json!({"lr": 0.1})));
        trial.init().expect("init");

        let existing = batch.existing_trials().expect("existing");
        let ids: Vec<&str> = existing.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![trial.id()]);

        let resolved = batch
            .resolve_trials(vec![flags(json!({}))])
            .expect("resolve");
        assert_ne!(resolved[0].id(), "data");
        assert!(!resolved[0].initialized());
    }
}
