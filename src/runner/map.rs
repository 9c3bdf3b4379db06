//! Map mode - one artifact per input document

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{ItemError, RunContext, RunResult};
use crate::chunk::{char_limits, join_chunk_outputs, split_into_chunks, ChunkBudget};
use crate::error::AnalysisError;
use crate::event::{EventKind, RunStatus};
use crate::planner::WorkItem;
use crate::prompt::render;
use crate::provider::TokenUsage;

pub(super) async fn run_map(ctx: &RunContext, items: &[WorkItem]) -> RunResult {
    let group_id = ctx.group.group_id;
    let total = items.len();
    let mut result = RunResult::new(group_id);

    for (index, item) in items.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            result.status = RunStatus::Cancelled;
            break;
        }

        let artifact = match process_item(ctx, item).await {
            Ok(path) => {
                result.record_success(path.clone());
                Some(path)
            }
            Err(ItemError::Cancelled) => {
                result.status = RunStatus::Cancelled;
                break;
            }
            Err(ItemError::Failed(e)) => {
                warn!(path = %item.relative, "Item failed: {}", e);
                result.record_failure(&item.relative, e.to_string());
                ctx.emitter.emit(EventKind::ItemFailed {
                    group_id,
                    path: item.relative.clone(),
                    error: e.to_string(),
                });
                None
            }
        };

        ctx.emitter.emit(EventKind::Progress {
            group_id,
            completed: index + 1,
            total,
            current_label: item.relative.clone(),
            artifact,
        });
    }

    if result.status == RunStatus::Cancelled {
        ctx.log(format!(
            "Run cancelled after {} of {} item(s)",
            result.success_count + result.failure_count,
            total
        ));
    }
    result
}

/// Placeholder values describing one source document
fn document_values(ctx: &RunContext, relative: &str) -> HashMap<String, String> {
    let path = Path::new(relative);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| relative.to_string());
    let source_pdf = PathBuf::from(relative).with_extension("pdf");
    let source_pdf_name = source_pdf
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut values = ctx.values.clone();
    values.insert("document_name".into(), name);
    values.insert("source_pdf_filename".into(), source_pdf_name);
    values.insert(
        "source_pdf_relative_path".into(),
        source_pdf.to_string_lossy().replace('\\', "/"),
    );
    values
}

async fn process_item(ctx: &RunContext, item: &WorkItem) -> Result<PathBuf, ItemError> {
    let text = tokio::fs::read_to_string(&item.source).await?;
    let mut values = document_values(ctx, &item.relative);
    let system = render(&ctx.prompts.system, &values).into_owned();

    let chunks = plan_chunks(ctx, &item.relative, &text, &system, &mut values).await?;
    let chunk_total = chunks.len();
    if chunk_total > 1 {
        ctx.log(format!("{} split into {} chunks", item.relative, chunk_total));
    }

    let mut outputs = Vec::with_capacity(chunk_total);
    let mut reasoning = Vec::new();
    let mut usage = TokenUsage::default();

    for (index, chunk) in chunks.into_iter().enumerate() {
        if index > 0 && ctx.cancel.is_cancelled() {
            return Err(ItemError::Cancelled);
        }

        values.insert("document_content".into(), chunk);
        values.insert("chunk_index".into(), (index + 1).to_string());
        values.insert("chunk_total".into(), chunk_total.to_string());
        let user = render(&ctx.prompts.user, &values).into_owned();

        debug!(path = %item.relative, chunk = index + 1, of = chunk_total, "Calling provider");
        let response = ctx.call(ctx.request(system.clone(), user, false)).await?;
        usage.add(response.usage);
        reasoning.extend(response.reasoning);
        outputs.push(response.content);
    }

    let mut provenance = ctx.provenance().with_sources(vec![item.relative.clone()]);
    provenance.usage = usage;
    provenance.chunk_count = (chunk_total > 1).then_some(chunk_total);

    let reasoning = (!reasoning.is_empty()).then(|| reasoning.join("\n\n"));
    ctx.persist(
        &item.output,
        &join_chunk_outputs(&outputs),
        reasoning.as_deref(),
        &provenance,
    )?;
    Ok(item.output.clone())
}

/// Whole document when it fits the budget, otherwise ordered chunks
async fn plan_chunks(
    ctx: &RunContext,
    relative: &str,
    text: &str,
    system: &str,
    values: &mut HashMap<String, String>,
) -> Result<Vec<String>, ItemError> {
    let model = &ctx.group.model;

    values.insert("document_content".into(), String::new());
    values.insert("chunk_index".into(), "1".into());
    values.insert("chunk_total".into(), "1".into());
    let frame = format!("{}\n{}", system, render(&ctx.prompts.user, values));

    let prompt_overhead = ctx.provider.count_tokens(&frame, model).await?;
    let document_tokens = ctx.provider.count_tokens(text, model).await?;
    let budget = ChunkBudget {
        context_window: ctx.context_window(),
        output_reserve: ctx.settings.output_reserve_tokens,
        prompt_overhead,
    };

    if budget.fits(document_tokens) {
        return Ok(vec![text.to_string()]);
    }
    if budget.available() == 0 {
        return Err(ItemError::Failed(AnalysisError::ItemFailed {
            path: relative.to_string(),
            reason: format!(
                "prompt ({} tokens) leaves no room in a {} token context window",
                prompt_overhead, budget.context_window
            ),
        }));
    }

    let (max_chars, overlap_chars) = char_limits(
        text.chars().count(),
        document_tokens,
        budget.available(),
        ctx.settings.chunk_overlap_tokens,
    );
    debug!(
        tokens = document_tokens,
        budget = budget.available(),
        max_chars,
        "Document exceeds budget; chunking"
    );
    Ok(split_into_chunks(text, max_chars, overlap_chars))
}
