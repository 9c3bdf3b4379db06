//! Map/reduce runner
//!
//! Executes one [`RunPlan`] sequentially. Each finished item is written to
//! disk before its `Progress` event is emitted. A failing item is recorded
//! and the batch moves on. Cancellation is polled between items and
//! between chunks; an in-flight provider call is always allowed to finish.

mod map;
mod reduce;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactWriter, Provenance};
use crate::config::RunSettings;
use crate::error::{AnalysisError, Result};
use crate::event::{EventEmitter, EventKind, RunStatus};
use crate::group::AnalysisGroup;
use crate::planner::{RunPlan, RunScope};
use crate::project::Project;
use crate::prompt::PromptPair;
use crate::provider::{PromptRequest, PromptResponse, Provider};

/// Everything a run needs, owned so it can move onto a worker task
pub struct RunContext {
    pub project: Project,
    pub group: AnalysisGroup,
    pub prompts: PromptPair,
    /// Static placeholder values (client name, case name, ...)
    pub values: HashMap<String, String>,
    pub provider: Arc<dyn Provider>,
    pub writer: Arc<dyn ArtifactWriter>,
    pub emitter: Arc<dyn EventEmitter>,
    pub cancel: CancellationToken,
    pub settings: RunSettings,
}

impl RunContext {
    fn group_id(&self) -> Uuid {
        self.group.group_id
    }

    fn log(&self, message: impl Into<String>) {
        self.emitter.emit(EventKind::Log {
            group_id: self.group_id(),
            message: message.into(),
        });
    }

    fn provenance(&self) -> Provenance {
        Provenance::for_group(&self.group, self.provider.name()).with_prompts(
            self.prompts.system_source.clone(),
            self.prompts.user_source.clone(),
        )
    }

    fn context_window(&self) -> u32 {
        self.group
            .custom_context_window
            .unwrap_or_else(|| self.provider.context_window(&self.group.model))
    }

    fn request(&self, system: String, user: String, thinking: bool) -> PromptRequest {
        let mut request = PromptRequest::new(user, self.group.model.clone())
            .with_system_prompt(system)
            .with_max_tokens(self.settings.max_output_tokens)
            .with_thinking(thinking);
        if let Some(temperature) = self.settings.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }

    /// One provider call; API refusals and blank answers become errors
    async fn call(&self, request: PromptRequest) -> Result<PromptResponse> {
        let response = self.provider.generate(request).await?;
        if !response.success {
            return Err(AnalysisError::ProviderApiError {
                message: response.content,
            });
        }
        if response.content.trim().is_empty() {
            return Err(AnalysisError::ProviderApiError {
                message: "provider returned an empty response".to_string(),
            });
        }
        Ok(response)
    }

    /// Write any reasoning, then the artifact
    ///
    /// The artifact marks the item done, so it is written last and only
    /// once everything else for the item is on disk.
    fn persist(
        &self,
        path: &Path,
        body: &str,
        reasoning: Option<&str>,
        provenance: &Provenance,
    ) -> Result<()> {
        let reasoning_file = match reasoning {
            Some(reasoning) => Some(self.writer.write_reasoning(path, reasoning, provenance)?),
            None => None,
        };
        if let Err(e) = self.writer.write(path, body, provenance) {
            if let Some(file) = reasoning_file {
                let _ = fs::remove_file(file);
            }
            return Err(e);
        }
        Ok(())
    }
}

/// A failed item and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub path: String,
    pub message: String,
}

/// Aggregate outcome of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub group_id: Uuid,
    pub status: RunStatus,
    pub success_count: usize,
    pub failure_count: usize,
    /// In processing order
    pub failures: Vec<ItemFailure>,
    /// Artifacts written, in processing order
    pub artifacts: Vec<PathBuf>,
    /// Run-level error that stopped the run before any item
    pub error: Option<String>,
}

impl RunResult {
    fn new(group_id: Uuid) -> Self {
        Self {
            group_id,
            status: RunStatus::Completed,
            success_count: 0,
            failure_count: 0,
            failures: Vec::new(),
            artifacts: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn failed(group_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            error: Some(error.into()),
            ..Self::new(group_id)
        }
    }

    /// The reduce artifact, if one was written
    pub fn reduce_artifact(&self) -> Option<&Path> {
        self.artifacts.last().map(PathBuf::as_path)
    }

    fn record_success(&mut self, artifact: PathBuf) {
        self.success_count += 1;
        self.artifacts.push(artifact);
    }

    fn record_failure(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.failure_count += 1;
        self.failures.push(ItemFailure {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Why an item did not produce an artifact
pub(crate) enum ItemError {
    Cancelled,
    Failed(AnalysisError),
}

impl From<AnalysisError> for ItemError {
    fn from(err: AnalysisError) -> Self {
        Self::Failed(err)
    }
}

impl From<std::io::Error> for ItemError {
    fn from(err: std::io::Error) -> Self {
        Self::Failed(err.into())
    }
}

/// Run `plan` to completion (or cancellation) and emit `Finished`
#[instrument(skip(ctx, plan), fields(group = %ctx.group.label(), mode = %plan.mode()))]
pub async fn execute(ctx: &RunContext, plan: RunPlan, scope: RunScope) -> RunResult {
    let group_id = ctx.group_id();
    let slug = ctx.group.label().to_string();

    ctx.emitter.emit(EventKind::RunStarted {
        group_id,
        slug: slug.clone(),
        mode: plan.mode(),
        scope,
        total: plan.total(),
    });
    info!(total = plan.total(), "Run started");

    let result = match prepare_namespace(&ctx.project, &slug, &plan) {
        Err(e) => {
            let error = AnalysisError::RunFailed {
                group: slug.clone(),
                reason: format!("output namespace not writable: {}", e),
            };
            warn!("{}", error);
            ctx.log(error.to_string());
            RunResult::failed(group_id, error.to_string())
        }
        Ok(()) => match plan {
            RunPlan::Map { items, skipped } => {
                if !skipped.is_empty() {
                    ctx.log(format!("{} input(s) already analysed; skipping", skipped.len()));
                }
                map::run_map(ctx, &items).await
            }
            RunPlan::Reduce {
                sources,
                output,
                has_output,
            } => reduce::run_reduce(ctx, &sources, &output, has_output, scope.force_rerun()).await,
        },
    };

    ctx.emitter.emit(EventKind::Finished {
        group_id,
        success_count: result.success_count,
        failure_count: result.failure_count,
        status: result.status,
    });
    info!(
        success = result.success_count,
        failed = result.failure_count,
        status = ?result.status,
        "Run finished"
    );
    result
}

/// Create the target directory and prove it accepts writes
fn prepare_namespace(project: &Project, slug: &str, plan: &RunPlan) -> Result<()> {
    let dir = match plan {
        RunPlan::Map { .. } => project.group_outputs_dir(slug),
        RunPlan::Reduce { .. } => project.group_reduce_dir(slug),
    };
    fs::create_dir_all(&dir)?;
    let marker = dir.join(format!(".write-check-{}", Uuid::new_v4().simple()));
    fs::write(&marker, b"")?;
    fs::remove_file(&marker)?;
    Ok(())
}
