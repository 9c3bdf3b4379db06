//! Reduce-mode runs through the coordinator

use std::fs;
use std::sync::Arc;

use bulk_analysis::artifact::{is_reasoning_artifact, reasoning_path, strip_front_matter};
use bulk_analysis::coordinator::Coordinator;
use bulk_analysis::event::RunStatus;
use bulk_analysis::group::{
    AnalysisGroup, GroupStore, MapInputs, OperationMode, ReduceInputs,
};
use bulk_analysis::planner::{RunMode, RunScope};
use bulk_analysis::project::Project;
use bulk_analysis::provider::{FixedProvider, MockProvider};
use tempfile::TempDir;

fn setup() -> (TempDir, Project, AnalysisGroup) {
    let tmp = TempDir::new().unwrap();
    let project = Project::new(tmp.path());
    let notes = project.converted_dir().join("notes");
    fs::create_dir_all(&notes).unwrap();
    fs::write(notes.join("a.md"), "Alpha notes").unwrap();
    fs::write(notes.join("b.md"), "Beta notes").unwrap();

    let store = GroupStore::new(project.clone());
    let records = store
        .save(&AnalysisGroup::new(
            "Records",
            "mock",
            "mock-model",
            OperationMode::Map(MapInputs::default()),
        ))
        .unwrap();
    let outputs = project.group_outputs_dir(records.slug.as_deref().unwrap());
    fs::create_dir_all(&outputs).unwrap();
    fs::write(
        outputs.join("x_analysis.md"),
        "---\ngenerator: bulk-analysis\n---\n\nRecord findings",
    )
    .unwrap();

    let summary = store
        .save(&AnalysisGroup::new(
            "Summary",
            "mock",
            "mock-model",
            OperationMode::Reduce(ReduceInputs {
                converted_directories: vec!["notes".into()],
                map_groups: vec!["records".into()],
                use_reasoning: true,
                ..ReduceInputs::default()
            }),
        ))
        .unwrap();
    (tmp, project, summary)
}

#[tokio::test]
async fn test_reduce_writes_one_artifact_then_skips_until_forced() {
    let (_tmp, project, summary) = setup();
    let provider = MockProvider::new()
        .with_default("Integrated analysis")
        .with_reasoning("Weighed the sources");
    let coordinator = Coordinator::new(Arc::new(FixedProvider(Arc::new(provider.clone()))));

    let result = coordinator
        .start(&project, summary.group_id, RunMode::Reduce, RunScope::Pending)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.success_count, 1);
    let output = result.reduce_artifact().unwrap().to_path_buf();
    assert_eq!(output.parent().unwrap(), project.group_reduce_dir("summary"));
    let name = output.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("summary_combined_"));
    assert!(name.ends_with(".md"));
    assert!(!is_reasoning_artifact(&name));

    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(strip_front_matter(&written), "Integrated analysis\n");
    let reasoning = fs::read_to_string(reasoning_path(&output)).unwrap();
    assert_eq!(strip_front_matter(&reasoning), "Weighed the sources\n");

    let request = provider.last_request().unwrap();
    assert!(request.thinking);
    assert!(request.prompt.contains("The following 3 sources"));
    assert!(request.prompt.contains("- notes/a.md\n- notes/b.md\n- records/x_analysis.md"));
    assert!(request.prompt.contains("<!-- source: notes/a.md -->\n## notes/a.md\n\nAlpha notes"));
    assert!(request.prompt.contains("## records/x_analysis.md\n\nRecord findings"));
    assert!(!request.prompt.contains("generator: bulk-analysis"));

    // An output exists: a pending run is a successful no-op
    let result = coordinator
        .start(&project, summary.group_id, RunMode::Reduce, RunScope::Pending)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.success_count, 0);
    assert_eq!(provider.request_count(), 1);

    let result = coordinator
        .start(&project, summary.group_id, RunMode::Reduce, RunScope::All)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(result.success_count, 1);
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn test_reduce_provider_failure_is_reported_per_item() {
    let (_tmp, project, summary) = setup();
    let provider = MockProvider::new().fail_on("Alpha notes");
    let coordinator = Coordinator::new(Arc::new(FixedProvider(Arc::new(provider))));

    let result = coordinator
        .start(&project, summary.group_id, RunMode::Reduce, RunScope::Pending)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.success_count, 0);
    assert_eq!(result.failure_count, 1);
    assert!(result.reduce_artifact().is_none());
    let leftovers: Vec<_> = fs::read_dir(project.group_reduce_dir("summary"))
        .unwrap()
        .collect();
    assert!(leftovers.is_empty());
}
