//! Bulk analysis - map/reduce LLM analysis over a document corpus

pub mod artifact;
pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod corpus;
pub mod error;
pub mod event;
pub mod group;
pub mod planner;
pub mod project;
pub mod prompt;
pub mod provider;
pub mod runner;

pub use artifact::{ArtifactWriter, FrontMatterWriter, Provenance};
pub use config::EngineConfig;
pub use coordinator::{Coordinator, RunHandle, RunStatusSnapshot};
pub use corpus::{CorpusIndex, CorpusSnapshot, FsCorpusIndex};
pub use error::{AnalysisError, FixSuggestion, Result};
pub use event::{Event, EventEmitter, EventKind, EventLog, RunStatus};
pub use group::{AnalysisGroup, GroupStore, OperationMode};
pub use planner::{RunMode, RunPlan, RunScope};
pub use project::Project;
pub use prompt::{render, PromptSpecRegistry};
pub use provider::{MockProvider, Provider, ProviderResolver};
pub use runner::RunResult;
