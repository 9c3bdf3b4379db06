//! Concurrency coordinator
//!
//! Owns the table of active runs (at most one per group), validates a start
//! request before accepting it, spawns the runner on a background task and
//! fans its events out to every subscriber.
//!
//! A slot is released when the run's `Finished` event passes through, so a
//! subscriber reacting to `Finished` can immediately start the group again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactWriter, FrontMatterWriter};
use crate::config::{CorpusSettings, EngineConfig, RunSettings};
use crate::error::{AnalysisError, Result};
use crate::event::{Event, EventEmitter, EventKind, FanOutEmitter};
use crate::group::{AnalysisGroup, GroupStore};
use crate::planner::{self, PlanningContext, RunMode, RunPlan, RunScope};
use crate::project::Project;
use crate::prompt::{PlaceholderAnalysis, PromptPair, PromptSpecRegistry};
use crate::provider::ProviderResolver;
use crate::runner::{self, RunContext, RunResult};

/// Live bookkeeping for one active run
#[derive(Debug)]
pub struct RunState {
    total: usize,
    completed: AtomicUsize,
    failures: Mutex<Vec<String>>,
    cancel: CancellationToken,
}

impl RunState {
    fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn snapshot(&self, group_id: Uuid) -> RunStatusSnapshot {
        RunStatusSnapshot {
            group_id,
            total: self.total,
            completed: self.completed.load(Ordering::SeqCst),
            failures: self.failures.lock().clone(),
            cancel_requested: self.cancel.is_cancelled(),
        }
    }
}

/// Point-in-time view of an active run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatusSnapshot {
    pub group_id: Uuid,
    pub total: usize,
    pub completed: usize,
    /// `path: message`, in failure order
    pub failures: Vec<String>,
    pub cancel_requested: bool,
}

type ActiveRuns = Arc<DashMap<Uuid, Arc<RunState>>>;

/// Drop the slot for `group_id` only while it still holds `state`
fn release(active: &ActiveRuns, group_id: Uuid, state: &Arc<RunState>) {
    active.remove_if(&group_id, |_, current| Arc::ptr_eq(current, state));
}

/// Updates the run's state, then forwards to the shared fan-out
struct TrackingEmitter {
    group_id: Uuid,
    state: Arc<RunState>,
    active: ActiveRuns,
    inner: Arc<FanOutEmitter>,
}

impl EventEmitter for TrackingEmitter {
    fn emit(&self, kind: EventKind) -> u64 {
        match &kind {
            EventKind::Progress { completed, .. } => {
                self.state.completed.store(*completed, Ordering::SeqCst);
            }
            EventKind::ItemFailed { path, error, .. } => {
                self.state.failures.lock().push(format!("{}: {}", path, error));
            }
            EventKind::Finished { .. } => release(&self.active, self.group_id, &self.state),
            _ => {}
        }
        self.inner.emit(kind)
    }
}

/// Releases the slot even if the worker panics
struct SlotGuard {
    group_id: Uuid,
    state: Arc<RunState>,
    active: ActiveRuns,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        release(&self.active, self.group_id, &self.state);
    }
}

/// An accepted run
#[derive(Debug)]
pub struct RunHandle {
    group_id: Uuid,
    label: String,
    handle: JoinHandle<RunResult>,
}

impl RunHandle {
    pub fn group_id(&self) -> Uuid {
        self.group_id
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> Result<RunResult> {
        self.handle.await.map_err(|e| {
            warn!(group = %self.label, "Run worker lost: {}", e);
            AnalysisError::WorkerLost { group: self.label }
        })
    }
}

/// Starts, tracks and cancels group runs
pub struct Coordinator {
    resolver: Arc<dyn ProviderResolver>,
    registry: Arc<PromptSpecRegistry>,
    writer: Arc<dyn ArtifactWriter>,
    values: HashMap<String, String>,
    settings: RunSettings,
    corpus: CorpusSettings,
    events: Arc<FanOutEmitter>,
    active: ActiveRuns,
}

impl Coordinator {
    pub fn new(resolver: Arc<dyn ProviderResolver>) -> Self {
        Self {
            resolver,
            registry: Arc::new(PromptSpecRegistry::with_defaults()),
            writer: Arc::new(FrontMatterWriter::new()),
            values: HashMap::new(),
            settings: RunSettings::default(),
            corpus: CorpusSettings::default(),
            events: Arc::new(FanOutEmitter::new()),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Coordinator resolving providers and settings from `config`
    pub fn from_config(config: EngineConfig) -> Self {
        let settings = config.run.clone();
        let corpus = config.corpus.clone();
        Self::new(Arc::new(config))
            .with_settings(settings)
            .with_corpus(corpus)
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_corpus(mut self, corpus: CorpusSettings) -> Self {
        self.corpus = corpus;
        self
    }

    pub fn with_registry(mut self, registry: PromptSpecRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn ArtifactWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Static placeholder values shared by every run (client name, ...)
    pub fn with_placeholder_values(mut self, values: HashMap<String, String>) -> Self {
        self.values = values;
        self
    }

    /// New event stream covering every run started after this call
    pub fn subscribe(&self) -> UnboundedReceiver<Event> {
        self.events.subscribe()
    }

    /// Synchronous observer, called before channel subscribers
    pub fn add_sink(&self, sink: Arc<dyn EventEmitter>) {
        self.events.add_sink(sink);
    }

    pub fn is_running(&self, group_id: Uuid) -> bool {
        self.active.contains_key(&group_id)
    }

    pub fn status(&self, group_id: Uuid) -> Option<RunStatusSnapshot> {
        self.active.get(&group_id).map(|state| state.snapshot(group_id))
    }

    /// Request cancellation; false when the group has no active run
    pub fn cancel(&self, group_id: Uuid) -> bool {
        match self.active.get(&group_id) {
            Some(state) => {
                info!(group = %group_id, "Cancellation requested");
                state.cancel.cancel();
                true
            }
            None => {
                debug!(group = %group_id, "Cancel ignored; no active run");
                false
            }
        }
    }

    /// Load, validate and report on a group's prompts
    pub fn check_prompts(
        &self,
        project: &Project,
        group: &AnalysisGroup,
    ) -> Result<(PromptPair, PlaceholderAnalysis)> {
        let prompts = PromptPair::load(project, group)?;
        prompts.validate(&self.registry, group)?;
        let analysis = prompts.analyse(&self.registry, group, &self.values);
        Ok((prompts, analysis))
    }

    /// Work a run of `group` would do right now
    pub fn plan(&self, project: &Project, group: &AnalysisGroup, scope: RunScope) -> Result<RunPlan> {
        let store = GroupStore::new(project.clone());
        let slugs: Vec<String> = store
            .list()?
            .iter()
            .filter_map(|g| g.slug.clone())
            .chain(group.slug.clone())
            .collect();
        let index = self.corpus.index(project.converted_dir())?;
        let context = PlanningContext::scan(
            project,
            &index,
            &self.corpus.allowed_extensions,
            slugs.iter().map(String::as_str),
        )?;
        planner::plan(
            project,
            group,
            &context,
            RunMode::for_operation(&group.operation),
            scope,
        )
    }

    /// Validate and start a run; rejected requests never touch the namespace
    #[instrument(skip(self, project), fields(group = %group_id, mode = %mode))]
    pub fn start(
        &self,
        project: &Project,
        group_id: Uuid,
        mode: RunMode,
        scope: RunScope,
    ) -> Result<RunHandle> {
        if self.is_running(group_id) {
            return Err(AnalysisError::AlreadyRunning {
                group: group_id.to_string(),
            });
        }

        let group = GroupStore::new(project.clone()).find(group_id)?;
        let label = group.require_slug()?.to_string();
        let configured = RunMode::for_operation(&group.operation);
        if configured != mode {
            return Err(AnalysisError::ModeMismatch {
                group: label,
                configured: configured.to_string(),
                requested: mode.to_string(),
            });
        }

        let (prompts, analysis) = self.check_prompts(project, &group)?;
        if analysis.has_warnings() {
            warn!(
                missing_required = ?analysis.missing_required,
                missing_optional = ?analysis.missing_optional,
                "Placeholders without values will be sent verbatim"
            );
        }
        let provider = self.resolver.resolve(&group.provider_id)?;
        if !provider.is_available() {
            warn!(provider = provider.name(), "Provider reports unavailable; calls will likely fail");
        }
        let plan = self.plan(project, &group, scope)?;

        let state = Arc::new(RunState::new(plan.total()));
        match self.active.entry(group_id) {
            Entry::Occupied(_) => {
                return Err(AnalysisError::AlreadyRunning { group: label });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&state));
            }
        }

        let emitter = TrackingEmitter {
            group_id,
            state: Arc::clone(&state),
            active: Arc::clone(&self.active),
            inner: Arc::clone(&self.events),
        };
        let ctx = RunContext {
            project: project.clone(),
            group,
            prompts,
            values: self.values.clone(),
            provider,
            writer: Arc::clone(&self.writer),
            emitter: Arc::new(emitter),
            cancel: state.cancel.clone(),
            settings: self.settings.clone(),
        };
        let guard = SlotGuard {
            group_id,
            state,
            active: Arc::clone(&self.active),
        };

        info!(total = plan.total(), scope = ?scope, "Run accepted");
        let handle = tokio::spawn(async move {
            let _guard = guard;
            runner::execute(&ctx, plan, scope).await
        });

        Ok(RunHandle {
            group_id,
            label,
            handle,
        })
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("active", &self.active.len())
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{MapInputs, OperationMode};
    use crate::provider::{FixedProvider, MockProvider};
    use std::fs;
    use tempfile::TempDir;

    fn setup(provider: MockProvider) -> (TempDir, Project, Uuid, Coordinator) {
        let tmp = TempDir::new().unwrap();
        let project = Project::new(tmp.path());
        fs::create_dir_all(project.converted_dir()).unwrap();
        fs::write(project.converted_dir().join("a.md"), "Alpha").unwrap();

        let group = AnalysisGroup::new(
            "Records",
            "mock",
            "mock-model",
            OperationMode::Map(MapInputs {
                files: vec!["a.md".into()],
                directories: Vec::new(),
            }),
        );
        let saved = GroupStore::new(project.clone()).save(&group).unwrap();
        let coordinator = Coordinator::new(Arc::new(FixedProvider(Arc::new(provider))));
        (tmp, project, saved.group_id, coordinator)
    }

    #[test]
    fn test_cancel_without_run_is_noop() {
        let (_tmp, _project, group_id, coordinator) = setup(MockProvider::new());
        assert!(!coordinator.cancel(group_id));
        assert!(coordinator.status(group_id).is_none());
    }

    #[test]
    fn test_start_unknown_group_rejected() {
        let (_tmp, project, _group_id, coordinator) = setup(MockProvider::new());
        let err = coordinator
            .start(&project, Uuid::new_v4(), RunMode::Map, RunScope::Pending)
            .unwrap_err();
        assert_eq!(err.code(), "BULK-004");
    }

    #[test]
    fn test_start_wrong_mode_rejected() {
        let (_tmp, project, group_id, coordinator) = setup(MockProvider::new());
        let err = coordinator
            .start(&project, group_id, RunMode::Reduce, RunScope::Pending)
            .unwrap_err();
        assert_eq!(err.code(), "BULK-011");
        assert!(!coordinator.is_running(group_id));
    }

    #[tokio::test]
    async fn test_slot_released_after_run() {
        let (_tmp, project, group_id, coordinator) = setup(MockProvider::new());
        let handle = coordinator
            .start(&project, group_id, RunMode::Map, RunScope::Pending)
            .unwrap();
        assert_eq!(handle.group_id(), group_id);

        let result = handle.wait().await.unwrap();
        assert_eq!(result.success_count, 1);
        assert!(!coordinator.is_running(group_id));
    }
}
