//! Execution planning
//!
//! Turns a group plus a snapshot of the corpus (and of every group's
//! outputs) into an ordered work list. All functions here are synchronous
//! and work on in-memory snapshots; only [`PlanningContext::scan`] touches
//! the filesystem.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::{is_reasoning_artifact, REASONING_SUFFIX};
use crate::corpus::{is_allowed_extension, CorpusIndex, CorpusSnapshot, FsCorpusIndex};
use crate::error::{AnalysisError, Result};
use crate::group::{normalize_relative, AnalysisGroup, CombineOrder, MapInputs, OperationMode, ReduceInputs};
use crate::project::Project;
use crate::prompt::render;

/// Suffix appended to a source stem to name its map artifact
pub const ANALYSIS_SUFFIX: &str = "_analysis";

/// Extension of every artifact the engine writes
pub const ARTIFACT_EXTENSION: &str = "md";

const REDUCE_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

// ═══════════════════════════════════════════════════════════════
// MODE AND SCOPE
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Map,
    Reduce,
}

impl RunMode {
    pub fn for_operation(operation: &OperationMode) -> Self {
        match operation {
            OperationMode::Map(_) => Self::Map,
            OperationMode::Reduce(_) => Self::Reduce,
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map => write!(f, "map"),
            Self::Reduce => write!(f, "reduce"),
        }
    }
}

/// Which inputs a run covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunScope {
    /// Only inputs without an artifact
    #[default]
    Pending,
    /// Everything, overwriting existing artifacts
    All,
}

impl RunScope {
    pub fn force_rerun(self) -> bool {
        matches!(self, Self::All)
    }
}

// ═══════════════════════════════════════════════════════════════
// PLANNING CONTEXT
// ═══════════════════════════════════════════════════════════════

/// Corpus snapshot plus the output snapshot of every group in the project
#[derive(Debug, Clone, Default)]
pub struct PlanningContext {
    pub corpus: CorpusSnapshot,
    /// slug -> artifacts under that group's `outputs/` (reasoning files excluded)
    pub group_outputs: HashMap<String, CorpusSnapshot>,
    pub extensions: Vec<String>,
}

impl PlanningContext {
    pub fn new(corpus: CorpusSnapshot, extensions: Vec<String>) -> Self {
        Self {
            corpus,
            group_outputs: HashMap::new(),
            extensions,
        }
    }

    pub fn with_group_outputs(mut self, slug: impl Into<String>, outputs: CorpusSnapshot) -> Self {
        self.group_outputs.insert(slug.into(), outputs);
        self
    }

    /// Index the corpus and the outputs of each listed group
    pub fn scan<'a>(
        project: &Project,
        corpus: &dyn CorpusIndex,
        extensions: &[String],
        slugs: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let mut context = Self::new(corpus.list_files()?, extensions.to_vec());
        for slug in slugs {
            let outputs = scan_outputs(&project.group_outputs_dir(slug))?;
            context.group_outputs.insert(slug.to_string(), outputs);
        }
        debug!(
            corpus = context.corpus.len(),
            groups = context.group_outputs.len(),
            "Planning context scanned"
        );
        Ok(context)
    }

    pub fn outputs_of(&self, slug: &str) -> Option<&CorpusSnapshot> {
        self.group_outputs.get(slug)
    }
}

/// Artifacts under a group's output directory
pub fn scan_outputs(outputs_dir: &Path) -> Result<CorpusSnapshot> {
    let snapshot = FsCorpusIndex::new(outputs_dir)
        .with_extensions([ARTIFACT_EXTENSION])
        .list_files()?;
    let mut filtered = CorpusSnapshot::new();
    for path in snapshot.paths().filter(|p| !is_reasoning_artifact(p)) {
        filtered.insert(path, snapshot.modified(path));
    }
    Ok(filtered)
}

// ═══════════════════════════════════════════════════════════════
// INPUT RESOLUTION
// ═══════════════════════════════════════════════════════════════

/// Map inputs that exist in the corpus, lexicographically ordered
///
/// Selected directories that vanished from the corpus contribute nothing.
pub fn resolve_map_inputs(inputs: &MapInputs, context: &PlanningContext) -> Vec<String> {
    let mut resolved = BTreeSet::new();

    for file in &inputs.files {
        let file = normalize_relative(file);
        if is_allowed_extension(Path::new(&file), &context.extensions)
            && context.corpus.contains(&file)
        {
            resolved.insert(file);
        }
    }

    for dir in &inputs.directories {
        let dir = normalize_relative(dir);
        if !context.corpus.has_dir(&dir) {
            debug!(dir = %dir, "Selected directory has no indexable files; skipping");
            continue;
        }
        resolved.extend(context.corpus.under(&dir).map(str::to_string));
    }

    resolved.into_iter().collect()
}

/// Where a reduce source comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    Converted,
    MapOutput { slug: String },
}

/// One input of a combined document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceSource {
    pub origin: SourceOrigin,
    /// Path relative to its root (corpus or the group's outputs)
    pub relative: String,
    /// Stable display label, unique within one reduce run
    pub label: String,
    pub absolute: PathBuf,
    pub modified: Option<SystemTime>,
}

/// All reduce sources, de-duplicated and ordered per `combine_order`
///
/// Sources are gathered in priority order: converted files, converted
/// directories, whole map groups, map subdirectories, map files. The first
/// occurrence of a label wins.
pub fn resolve_reduce_inputs(
    project: &Project,
    inputs: &ReduceInputs,
    context: &PlanningContext,
) -> Vec<ReduceSource> {
    let mut sources = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |source: ReduceSource| {
        if seen.insert(source.label.clone()) {
            sources.push(source);
        }
    };

    let converted_root = project.converted_dir();
    let converted = |relative: &str| ReduceSource {
        origin: SourceOrigin::Converted,
        relative: relative.to_string(),
        label: relative.to_string(),
        absolute: converted_root.join(relative),
        modified: context.corpus.modified(relative),
    };

    for file in &inputs.converted_files {
        let file = normalize_relative(file);
        if context.corpus.contains(&file) {
            push(converted(&file));
        }
    }
    for dir in &inputs.converted_directories {
        let dir = normalize_relative(dir);
        if !context.corpus.has_dir(&dir) {
            debug!(dir = %dir, "Converted directory has no indexable files; skipping");
            continue;
        }
        for path in context.corpus.under(&dir) {
            push(converted(path));
        }
    }

    let map_output = |slug: &str, relative: &str, outputs: &CorpusSnapshot| ReduceSource {
        origin: SourceOrigin::MapOutput {
            slug: slug.to_string(),
        },
        relative: relative.to_string(),
        label: format!("{}/{}", slug, relative),
        absolute: project.group_outputs_dir(slug).join(relative),
        modified: outputs.modified(relative),
    };

    for slug in &inputs.map_groups {
        let slug = normalize_relative(slug);
        if let Some(outputs) = context.outputs_of(&slug) {
            for path in outputs.paths() {
                push(map_output(&slug, path, outputs));
            }
        }
    }
    for reference in &inputs.map_directories {
        let Some((slug, dir)) = split_group_reference(reference) else {
            continue;
        };
        if let Some(outputs) = context.outputs_of(&slug) {
            for path in outputs.under(&dir) {
                push(map_output(&slug, path, outputs));
            }
        }
    }
    for reference in &inputs.map_files {
        let Some((slug, file)) = split_group_reference(reference) else {
            continue;
        };
        if let Some(outputs) = context.outputs_of(&slug) {
            if outputs.contains(&file) {
                push(map_output(&slug, &file, outputs));
            }
        }
    }

    order_sources(&mut sources, inputs.order);
    sources
}

fn order_sources(sources: &mut [ReduceSource], order: CombineOrder) {
    match order {
        CombineOrder::ByPath => sources.sort_by(|a, b| a.label.cmp(&b.label)),
        // Oldest first; unknown mtimes sort last
        CombineOrder::ByMtime => sources.sort_by(|a, b| {
            let key = |s: &ReduceSource| (s.modified.is_none(), s.modified);
            key(a).cmp(&key(b)).then_with(|| a.label.cmp(&b.label))
        }),
    }
}

/// `<slug>/<rest>` into its parts
fn split_group_reference(reference: &str) -> Option<(String, String)> {
    let normalized = normalize_relative(reference);
    let (slug, rest) = normalized.split_once('/')?;
    Some((slug.to_string(), rest.to_string()))
}

// ═══════════════════════════════════════════════════════════════
// OUTPUT PATHS AND CLASSIFICATION
// ═══════════════════════════════════════════════════════════════

/// Output path of a map input, relative to the group's `outputs/`
///
/// `records/intake.md` -> `records/intake_analysis.md`
pub fn map_output_relative(input_relative: &str) -> String {
    let normalized = normalize_relative(input_relative);
    let (parent, file) = match normalized.rsplit_once('/') {
        Some((parent, file)) => (Some(parent), file),
        None => (None, normalized.as_str()),
    };
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };
    let name = format!("{}{}.{}", stem, ANALYSIS_SUFFIX, ARTIFACT_EXTENSION);
    match parent {
        Some(parent) => format!("{}/{}", parent, name),
        None => name,
    }
}

/// Absolute map artifact path for an input
pub fn derive_output_path(project: &Project, slug: &str, input_relative: &str) -> PathBuf {
    project
        .group_outputs_dir(slug)
        .join(map_output_relative(input_relative))
}

/// File name of a reduce artifact
///
/// The template may use `{slug}`, `{timestamp}`, `{date}` and `{group_name}`.
/// Path separators are flattened and `.md` is appended when missing.
pub fn reduce_output_name(template: &str, group: &AnalysisGroup, now: DateTime<Local>) -> String {
    let slug = group.slug.clone().unwrap_or_else(|| crate::group::slugify(&group.name));
    let values: HashMap<String, String> = [
        ("slug", slug),
        ("timestamp", now.format(REDUCE_TIMESTAMP_FORMAT).to_string()),
        ("date", now.format("%Y-%m-%d").to_string()),
        ("group_name", group.name.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let rendered = render(template, &values);
    let flattened: String = rendered
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '-' } else { c })
        .collect();
    // Hidden names and reasoning names are never seen as reduce outputs
    let mut name = flattened.trim_start_matches('.').trim().to_string();
    if name.is_empty() {
        name = format!("{}_combined", values["slug"]);
    }
    if !name.to_ascii_lowercase().ends_with(".md") {
        name.push_str(".md");
    }
    if is_reasoning_artifact(&name) {
        let stem_len = name.len() - REASONING_SUFFIX.len();
        name = format!("{}_reasoning.md", &name[..stem_len]);
    }
    name
}

/// True when the group's `reduce/` holds at least one artifact
pub fn has_reduce_output(project: &Project, slug: &str) -> Result<bool> {
    let dir = project.group_reduce_dir(slug);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file()
            && !name.starts_with('.')
            && name.to_ascii_lowercase().ends_with(".md")
            && !is_reasoning_artifact(&name)
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Pending and done inputs of a map group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub pending: Vec<String>,
    pub done: Vec<String>,
}

/// Split inputs by whether their derived artifact exists
///
/// Presence only: an edited source with an old artifact counts as done.
pub fn classify(inputs: &[String], outputs: &CorpusSnapshot) -> Classification {
    let mut classification = Classification::default();
    for input in inputs {
        if outputs.contains(&map_output_relative(input)) {
            classification.done.push(input.clone());
        } else {
            classification.pending.push(input.clone());
        }
    }
    classification
}

// ═══════════════════════════════════════════════════════════════
// RUN PLAN
// ═══════════════════════════════════════════════════════════════

/// One map input with its artifact path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub relative: String,
    pub source: PathBuf,
    pub output: PathBuf,
}

/// Concrete work for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPlan {
    Map {
        items: Vec<WorkItem>,
        /// Inputs skipped because their artifact exists
        skipped: Vec<String>,
    },
    Reduce {
        sources: Vec<ReduceSource>,
        output: PathBuf,
        /// An earlier reduce artifact exists
        has_output: bool,
    },
}

impl RunPlan {
    pub fn mode(&self) -> RunMode {
        match self {
            Self::Map { .. } => RunMode::Map,
            Self::Reduce { .. } => RunMode::Reduce,
        }
    }

    /// Items the run reports progress against
    pub fn total(&self) -> usize {
        match self {
            Self::Map { items, .. } => items.len(),
            Self::Reduce { .. } => 1,
        }
    }
}

/// Plan a run of `group` in `mode` over `scope`
///
/// Rejects a mode that does not match the group's operation and a group
/// whose selection resolves to nothing.
pub fn plan(
    project: &Project,
    group: &AnalysisGroup,
    context: &PlanningContext,
    mode: RunMode,
    scope: RunScope,
) -> Result<RunPlan> {
    let slug = group.require_slug()?;
    let configured = RunMode::for_operation(&group.operation);
    if configured != mode {
        return Err(AnalysisError::ModeMismatch {
            group: slug.to_string(),
            configured: configured.to_string(),
            requested: mode.to_string(),
        });
    }

    let no_inputs = || AnalysisError::NoInputsResolved {
        group: slug.to_string(),
    };

    match &group.operation {
        OperationMode::Map(inputs) => {
            let resolved = resolve_map_inputs(inputs, context);
            if resolved.is_empty() {
                return Err(no_inputs());
            }
            let empty = CorpusSnapshot::new();
            let outputs = context.outputs_of(slug).unwrap_or(&empty);
            let Classification { pending, done } = classify(&resolved, outputs);
            let (selected, skipped) = match scope {
                RunScope::Pending => (pending, done),
                RunScope::All => (resolved, Vec::new()),
            };
            let converted = project.converted_dir();
            let items = selected
                .into_iter()
                .map(|relative| WorkItem {
                    source: converted.join(&relative),
                    output: derive_output_path(project, slug, &relative),
                    relative,
                })
                .collect();
            Ok(RunPlan::Map { items, skipped })
        }
        OperationMode::Reduce(inputs) => {
            let sources = resolve_reduce_inputs(project, inputs, context);
            if sources.is_empty() {
                return Err(no_inputs());
            }
            let name = reduce_output_name(&inputs.output_template, group, Local::now());
            Ok(RunPlan::Reduce {
                sources,
                output: project.group_reduce_dir(slug).join(name),
                has_output: has_reduce_output(project, slug)?,
            })
        }
    }
}
