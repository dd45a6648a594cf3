//! Scheduling properties of the workflow engine on the paper pipeline's shape:
//! load → split → summarize → {glossary, insights, questions} → export.

use pdf_digest::graph::{stage_fn, WorkflowGraph, END};
use pdf_digest::{ExecutionError, GraphError, PaperState, StageError, StateUpdate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

type Log = Arc<Mutex<Vec<String>>>;

fn logged(log: &Log, entry: &str) {
    log.lock().unwrap().push(entry.to_string());
}

/// The pipeline shape with each branch sleeping for the given delay.
///
/// `export` records which branch outputs it could see in its snapshot.
fn paper_graph(delays: [u64; 3], log: Log) -> WorkflowGraph<PaperState> {
    let mut g = WorkflowGraph::<PaperState>::new();

    g.add_stage(
        "load",
        stage_fn(|_s: Arc<PaperState>| async {
            Ok::<_, StageError>(StateUpdate::document("text".into(), Default::default()))
        }),
    )
    .unwrap();
    g.add_stage(
        "split",
        stage_fn(|_s: Arc<PaperState>| async { Ok::<_, StageError>(StateUpdate::sections(vec![])) }),
    )
    .unwrap();
    g.add_stage(
        "summarize",
        stage_fn(|_s: Arc<PaperState>| async { Ok::<_, StageError>(StateUpdate::summaries(vec![])) }),
    )
    .unwrap();

    let [g_ms, i_ms, q_ms] = delays;
    let l = log.clone();
    g.add_stage(
        "glossary",
        stage_fn(move |_s: Arc<PaperState>| {
            let l = l.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(g_ms)).await;
                logged(&l, "glossary");
                Ok::<_, StageError>(StateUpdate::glossary(vec![]))
            }
        }),
    )
    .unwrap();
    let l = log.clone();
    g.add_stage(
        "insights",
        stage_fn(move |_s: Arc<PaperState>| {
            let l = l.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(i_ms)).await;
                logged(&l, "insights");
                Ok::<_, StageError>(StateUpdate::insights(vec!["i".into()]))
            }
        }),
    )
    .unwrap();
    let l = log.clone();
    g.add_stage(
        "questions",
        stage_fn(move |_s: Arc<PaperState>| {
            let l = l.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(q_ms)).await;
                logged(&l, "questions");
                Ok::<_, StageError>(StateUpdate::questions(vec!["q".into()]))
            }
        }),
    )
    .unwrap();
    let l = log;
    g.add_stage(
        "export",
        stage_fn(move |s: Arc<PaperState>| {
            let l = l.clone();
            async move {
                let seen = s.glossary.is_some() && s.insights.is_some() && s.questions.is_some();
                logged(&l, if seen { "export:all" } else { "export:partial" });
                Ok::<_, StageError>(StateUpdate::output_path("report.md".into()))
            }
        }),
    )
    .unwrap();

    g.add_edge("load", "split").unwrap();
    g.add_edge("split", "summarize").unwrap();
    for branch in ["glossary", "insights", "questions"] {
        g.add_edge("summarize", branch).unwrap();
        g.add_edge(branch, "export").unwrap();
    }
    g.add_edge("export", END).unwrap();
    g.set_entry("load").unwrap();
    g
}

#[tokio::test]
async fn export_waits_for_every_branch_in_any_finish_order() {
    let permutations = [
        [5, 25, 45],
        [5, 45, 25],
        [25, 5, 45],
        [25, 45, 5],
        [45, 5, 25],
        [45, 25, 5],
    ];
    for delays in permutations {
        let log: Log = Arc::default();
        let graph = paper_graph(delays, log.clone()).compile().unwrap();
        let state = graph
            .run(PaperState::new("paper.pdf", "Paper"))
            .await
            .unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries.len(), 4, "delays {delays:?}: {entries:?}");
        assert_eq!(entries.last().map(String::as_str), Some("export:all"));
        assert_eq!(state.insights, Some(vec!["i".to_string()]));
        assert_eq!(state.questions, Some(vec!["q".to_string()]));
        assert!(state.output_path.is_some());
    }
}

#[tokio::test]
async fn branches_run_concurrently() {
    // Each branch blocks until all three have started; a sequential
    // executor would never get past the first one.
    let barrier = Arc::new(Barrier::new(3));
    let mut g = WorkflowGraph::<PaperState>::new();
    g.add_stage(
        "summarize",
        stage_fn(|_s: Arc<PaperState>| async { Ok::<_, StageError>(StateUpdate::summaries(vec![])) }),
    )
    .unwrap();
    for branch in ["glossary", "insights", "questions"] {
        let b = barrier.clone();
        g.add_stage(
            branch,
            stage_fn(move |_s: Arc<PaperState>| {
                let b = b.clone();
                async move {
                    b.wait().await;
                    Ok::<_, StageError>(StateUpdate::default())
                }
            }),
        )
        .unwrap();
        g.add_edge("summarize", branch).unwrap();
    }
    g.set_entry("summarize").unwrap();
    let graph = g.compile().unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        graph.run(PaperState::new("paper.pdf", "Paper")),
    )
    .await;
    assert!(result.expect("branches did not overlap").is_ok());
}

#[tokio::test]
async fn cyclic_graph_is_rejected_before_any_stage_runs() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut g = WorkflowGraph::<PaperState>::new();
    for name in ["load", "split", "summarize"] {
        let r = runs.clone();
        g.add_stage(
            name,
            stage_fn(move |_s: Arc<PaperState>| {
                r.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, StageError>(StateUpdate::default()) }
            }),
        )
        .unwrap();
    }
    g.add_edge("load", "split").unwrap();
    g.add_edge("split", "summarize").unwrap();
    g.add_edge("summarize", "split").unwrap();
    g.set_entry("load").unwrap();

    match g.compile() {
        Err(GraphError::CyclicGraph { path }) => {
            assert!(path.contains(&"split".to_string()));
            assert!(path.contains(&"summarize".to_string()));
        }
        Err(other) => panic!("expected a cycle, got {other}"),
        Ok(_) => panic!("cyclic graph compiled"),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_entry_stage_stops_the_run() {
    let downstream = Arc::new(AtomicUsize::new(0));
    let mut g = WorkflowGraph::<PaperState>::new();
    g.add_stage(
        "load",
        stage_fn(|_s: Arc<PaperState>| async {
            Err::<StateUpdate, _>(StageError::Other("no text layer".into()))
        }),
    )
    .unwrap();
    let d = downstream.clone();
    g.add_stage(
        "split",
        stage_fn(move |_s: Arc<PaperState>| {
            d.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, StageError>(StateUpdate::default()) }
        }),
    )
    .unwrap();
    g.add_edge("load", "split").unwrap();
    g.set_entry("load").unwrap();
    let graph = g.compile().unwrap();

    let err = graph
        .run(PaperState::new("paper.pdf", "Paper"))
        .await
        .unwrap_err();
    match err {
        ExecutionError::StageFailed { stage, .. } => assert_eq!(stage, "load"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(downstream.load(Ordering::SeqCst), 0);
}
