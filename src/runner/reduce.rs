//! Reduce mode - one artifact over the concatenation of every source

use std::path::Path;

use tracing::{info, warn};

use super::{RunContext, RunResult};
use crate::artifact::strip_front_matter;
use crate::error::{AnalysisError, Result};
use crate::event::{EventKind, RunStatus};
use crate::planner::ReduceSource;
use crate::prompt::render;

pub(super) async fn run_reduce(
    ctx: &RunContext,
    sources: &[ReduceSource],
    output: &Path,
    has_output: bool,
    force_rerun: bool,
) -> RunResult {
    let group_id = ctx.group.group_id;
    let mut result = RunResult::new(group_id);

    if has_output && !force_rerun {
        info!("Reduce output already present; nothing to do");
        ctx.log("Combined output already exists; run with all scope to regenerate");
        return result;
    }
    if ctx.cancel.is_cancelled() {
        result.status = RunStatus::Cancelled;
        return result;
    }

    let label = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match combine_and_call(ctx, sources, output).await {
        Ok(()) => {
            result.record_success(output.to_path_buf());
            ctx.emitter.emit(EventKind::Progress {
                group_id,
                completed: 1,
                total: 1,
                current_label: label,
                artifact: Some(output.to_path_buf()),
            });
        }
        Err(e) => {
            warn!(output = %label, "Reduce failed: {}", e);
            result.record_failure(&label, e.to_string());
            ctx.emitter.emit(EventKind::ItemFailed {
                group_id,
                path: label.clone(),
                error: e.to_string(),
            });
            ctx.emitter.emit(EventKind::Progress {
                group_id,
                completed: 1,
                total: 1,
                current_label: label,
                artifact: None,
            });
        }
    }
    result
}

async fn combine_and_call(ctx: &RunContext, sources: &[ReduceSource], output: &Path) -> Result<()> {
    let combined = combine_sources(sources).await?;
    let use_reasoning = match &ctx.group.operation {
        crate::group::OperationMode::Reduce(inputs) => inputs.use_reasoning,
        crate::group::OperationMode::Map(_) => false,
    };

    let mut values = ctx.values.clone();
    values.insert("document_content".into(), combined);
    values.insert("document_name".into(), ctx.group.name.clone());
    values.insert("reduce_source_count".into(), sources.len().to_string());
    values.insert("reduce_source_list".into(), source_list(sources));

    let system = render(&ctx.prompts.system, &values).into_owned();
    let user = render(&ctx.prompts.user, &values).into_owned();

    let tokens = ctx
        .provider
        .count_tokens(&format!("{}\n{}", system, user), &ctx.group.model)
        .await?;
    let window = ctx.context_window();
    if tokens.saturating_add(ctx.settings.output_reserve_tokens) > window {
        ctx.log(format!(
            "Combined prompt is {} tokens; it may exceed the {} token context window",
            tokens, window
        ));
    }

    ctx.log(format!("Combining {} source(s) in one call", sources.len()));
    let response = ctx.call(ctx.request(system, user, use_reasoning)).await?;

    let mut provenance = ctx
        .provenance()
        .with_sources(sources.iter().map(|s| s.label.clone()).collect());
    provenance.usage = response.usage;

    ctx.persist(
        output,
        &response.content,
        response.reasoning.as_deref(),
        &provenance,
    )
}

/// Every source behind a marker comment and a heading
pub async fn combine_sources(sources: &[ReduceSource]) -> Result<String> {
    let mut sections = Vec::with_capacity(sources.len());
    for source in sources {
        let text = tokio::fs::read_to_string(&source.absolute)
            .await
            .map_err(|e| AnalysisError::ItemFailed {
                path: source.label.clone(),
                reason: format!("cannot read source: {}", e),
            })?;
        sections.push(format!(
            "<!-- source: {label} -->\n## {label}\n\n{body}",
            label = source.label,
            body = strip_front_matter(&text).trim_end()
        ));
    }
    Ok(sections.join("\n\n"))
}

/// Markdown bullet list of source labels
pub fn source_list(sources: &[ReduceSource]) -> String {
    sources
        .iter()
        .map(|s| format!("- {}", s.label))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::SourceOrigin;
    use std::fs;
    use tempfile::TempDir;

    fn source(root: &Path, label: &str, text: &str) -> ReduceSource {
        let absolute = root.join(label);
        fs::create_dir_all(absolute.parent().unwrap()).unwrap();
        fs::write(&absolute, text).unwrap();
        ReduceSource {
            origin: SourceOrigin::Converted,
            relative: label.to_string(),
            label: label.to_string(),
            absolute,
            modified: None,
        }
    }

    #[tokio::test]
    async fn test_combine_sources_marks_each_section() {
        let tmp = TempDir::new().unwrap();
        let sources = vec![
            source(tmp.path(), "a.md", "Alpha\n"),
            source(tmp.path(), "records/b_analysis.md", "---\ngenerator: x\n---\n\nBeta"),
        ];

        let combined = combine_sources(&sources).await.unwrap();
        assert_eq!(
            combined,
            "<!-- source: a.md -->\n## a.md\n\nAlpha\n\n\
             <!-- source: records/b_analysis.md -->\n## records/b_analysis.md\n\nBeta"
        );
        assert_eq!(source_list(&sources), "- a.md\n- records/b_analysis.md");
    }

    #[tokio::test]
    async fn test_combine_sources_unreadable_is_error() {
        let tmp = TempDir::new().unwrap();
        let missing = ReduceSource {
            origin: SourceOrigin::Converted,
            relative: "gone.md".into(),
            label: "gone.md".into(),
            absolute: tmp.path().join("gone.md"),
            modified: None,
        };
        let err = combine_sources(&[missing]).await.unwrap_err();
        assert_eq!(err.code(), "BULK-041");
    }
}
