// packages/engine/tests/run_scenarios.rs
//! End-to-end runs through the coordinator: launcher, channel, listener

mod common;

use common::*;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use weaver_engine::manifest::ReplayItem;
use weaver_engine::pipeline::PipelineRegistry;
use weaver_engine::registry::{
    AgentId, AgentState, Grouping, GroupingMember, InMemoryJobStore, JobOutcome, JobStore, LaunchRequest,
    RunParameters,
};
use weaver_engine::runtime::{
    result_channel, AgentCatalog, ChannelMessage, InMemoryErrorReporter, Launcher, TaskEnd,
};
use weaver_engine::{EngineError, RunCoordinator, SharedRegistry};

fn grouping(store: &InMemoryJobStore, agents: &[u64]) -> LaunchRequest {
    store.insert_grouping(Grouping {
        id: "g1".into(),
        name: "scenario".into(),
        members: agents
            .iter()
            .map(|id| GroupingMember {
                agent: AgentId(*id),
                params: RunParameters::new(),
            })
            .collect(),
    });
    LaunchRequest::Grouped { grouping: "g1".into() }
}

fn routed(names: &[&str], pipeline: Arc<RecordingPipeline>) -> Arc<PipelineRegistry> {
    let registry = PipelineRegistry::new();
    for name in names {
        registry.register(*name, pipeline.clone());
    }
    Arc::new(registry)
}

#[tokio::test]
async fn test_three_agents_one_faults_on_second_item() {
    let names = ["alpha", "beta", "gamma"];
    let store = store(&names);
    let request = grouping(&store, &[1, 2, 3]);

    let mut beta = items("beta", 3);
    beta[1] = fail("listing layout changed");
    let catalog = AgentCatalog::new()
        .with("alpha", replay(items("alpha", 3)))
        .with("beta", replay(beta))
        .with("gamma", replay(items("gamma", 3)));

    let pipeline = Arc::new(RecordingPipeline::new());
    let reporter = Arc::new(InMemoryErrorReporter::new());
    let coordinator = RunCoordinator::new(config(), store.clone(), Arc::new(catalog), routed(&names, pipeline.clone()))
        .unwrap()
        .with_reporter(reporter.clone());

    let summary = coordinator.run(&request).await.unwrap();

    assert_eq!(
        summary.states,
        vec![
            (AgentId(1), AgentState::Complete),
            (AgentId(2), AgentState::Error),
            (AgentId(3), AgentState::Complete),
        ]
    );
    assert_eq!(summary.outcome, JobOutcome::CompletedWithErrors);
    assert_eq!(summary.launch.broken.len(), 1);
    assert_eq!(summary.launch.broken[0].agent, AgentId(2));
    assert_eq!(summary.launch.broken[0].error_kind, "replay");
    assert_eq!(reporter.len(), 1);

    assert_eq!(pipeline.sequence_of("alpha"), vec![0, 1, 2]);
    assert_eq!(pipeline.sequence_of("beta"), vec![0]);
    assert_eq!(pipeline.sequence_of("gamma"), vec![0, 1, 2]);
    assert_eq!(summary.listener.persisted, 7);

    let job = store.get_job(summary.job).await.unwrap().unwrap();
    assert_eq!(job.outcome, JobOutcome::CompletedWithErrors);
}

#[tokio::test]
async fn test_per_agent_order_preserved_under_backpressure() {
    let names = ["alpha", "beta", "gamma", "delta"];
    let store = store(&names);
    let request = grouping(&store, &[1, 2, 3, 4]);

    let catalog = AgentCatalog::new();
    for name in names {
        catalog.register(name, replay(items(name, 200)));
    }

    let pipeline = Arc::new(RecordingPipeline::new());
    let mut config = config();
    config.runtime.channel_capacity = 2;
    let coordinator =
        RunCoordinator::new(config, store, Arc::new(catalog), routed(&names, pipeline.clone())).unwrap();

    let summary = coordinator.run(&request).await.unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.listener.persisted, 800);
    let expected: Vec<u64> = (0..200).collect();
    for name in names {
        assert_eq!(pipeline.sequence_of(name), expected, "order broken for {}", name);
    }
}

#[tokio::test]
async fn test_single_end_of_stream_after_every_record() {
    let names = ["alpha", "beta", "gamma"];
    let store = store(&names);
    let catalog = Arc::new(AgentCatalog::new());
    for name in names {
        catalog.register(name, replay(items(name, 25)));
    }

    let plan = weaver_engine::registry::build_plan(store.as_ref(), &grouping(&store, &[1, 2, 3]))
        .await
        .unwrap();
    let registry = Arc::new(SharedRegistry::new());
    registry.build(plan, store.as_ref()).await.unwrap();

    let (sender, mut receiver) = result_channel(4);
    let launcher = Launcher::new(registry.clone(), catalog);
    let launching = tokio::spawn(async move { launcher.launch(sender).await });

    let mut messages = Vec::new();
    while let Some(message) = receiver.recv().await {
        messages.push(message);
    }
    let report = launching.await.unwrap().unwrap();

    let eos: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| matches!(m, ChannelMessage::EndOfStream))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(eos, vec![messages.len() - 1]);
    assert_eq!(messages.len(), 76);
    assert!(report.end_of_stream_sent);
    assert!(report.agents.iter().all(|a| a.end == TaskEnd::Finished));
}

#[tokio::test(start_paused = true)]
async fn test_validation_fault_stops_further_sends() {
    let names = ["alpha", "beta"];
    let store = store(&names);
    let request = grouping(&store, &[1, 2]);

    let mut alpha = vec![ReplayItem::Record(raw(json!({ "src": "alpha", "n": 0 })))];
    alpha.extend(items("alpha", 50).into_iter().skip(1));
    let catalog = AgentCatalog::new()
        .with("alpha", paced(alpha, Duration::from_millis(10)))
        .with("beta", paced(items("beta", 10), Duration::from_millis(10)));

    let pipeline = Arc::new(RecordingPipeline::new());
    let coordinator =
        RunCoordinator::new(config(), store, Arc::new(catalog), routed(&names, pipeline.clone())).unwrap();

    let summary = coordinator.run(&request).await.unwrap();

    let alpha = summary.launch.agents.iter().find(|a| a.name == "alpha").unwrap();
    assert_eq!(alpha.end, TaskEnd::Stopped(AgentState::Error));
    assert!(alpha.forwarded <= 2, "forwarded {} after the flip", alpha.forwarded);
    assert_eq!(summary.listener.validation_failures, 1);

    assert!(summary.states.contains(&(AgentId(1), AgentState::Error)));
    assert!(summary.states.contains(&(AgentId(2), AgentState::Complete)));
    assert_eq!(pipeline.sequence_of("beta").len(), 10);

    // the flip is a listener decision, not an extraction fault
    assert!(summary.launch.broken.is_empty());
    assert_eq!(summary.outcome, JobOutcome::CompletedWithErrors);
}

#[tokio::test]
async fn test_build_faults_rejected_before_any_task() {
    let store = store(&["alpha"]);
    let counting = Arc::new(CountingFactory::default());
    let catalog = Arc::new(AgentCatalog::new().with("alpha", counting.clone()));
    let pipeline = Arc::new(RecordingPipeline::new());
    let coordinator = Arc::new(RunCoordinator::new(config(), store.clone(), catalog, routed(&["alpha"], pipeline)).unwrap());

    let err = coordinator
        .trigger(&LaunchRequest::Grouped { grouping: "nope".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::GroupingNotFound(_)));

    store.insert_grouping(Grouping {
        id: "empty".into(),
        name: "empty".into(),
        members: vec![],
    });
    let err = coordinator
        .trigger(&LaunchRequest::Grouped { grouping: "empty".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EmptyGrouping(_)));

    let err = coordinator
        .trigger(&LaunchRequest::Solo {
            agent: AgentId(99),
            params: RunParameters::new(),
            job: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AgentNotFound(AgentId(99))));

    assert!(err.is_build_fault());
    assert_eq!(counting.started.load(Ordering::SeqCst), 0);
    assert_eq!(store.job_count(), 0);
    assert!(!coordinator.registry().is_built());
}

#[tokio::test]
async fn test_listener_panic_rolls_back_job() {
    let names = ["alpha", "beta"];
    let store = store(&names);
    let request = grouping(&store, &[1, 2]);

    let catalog = AgentCatalog::new()
        .with("alpha", replay(items("alpha", 20)))
        .with("beta", replay(items("beta", 20)));
    let pipeline = Arc::new(RecordingPipeline::panicking_on_write(5));
    let coordinator =
        RunCoordinator::new(config(), store.clone(), Arc::new(catalog), routed(&names, pipeline.clone())).unwrap();

    let err = coordinator.run(&request).await.unwrap_err();

    assert!(matches!(err, EngineError::TaskFailed(_)));
    assert_eq!(store.job_count(), 0);
    assert_eq!(pipeline.discarded().len(), 1);
    assert!(pipeline.persisted().is_empty());
    assert!(!coordinator.registry().is_built());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_agents_between_items() {
    let store = store(&["alpha"]);
    let request = LaunchRequest::Solo {
        agent: AgentId(1),
        params: RunParameters::new(),
        job: None,
    };
    let catalog = AgentCatalog::new().with("alpha", paced(items("alpha", 100), Duration::from_millis(10)));
    let pipeline = Arc::new(RecordingPipeline::new());
    let coordinator = Arc::new(
        RunCoordinator::new(config(), store.clone(), Arc::new(catalog), routed(&["alpha"], pipeline.clone())).unwrap(),
    );

    let run = coordinator.trigger(&request).await.unwrap();
    tokio::time::sleep(Duration::from_millis(55)).await;
    coordinator.shutdown();

    let summary = run.await.unwrap().unwrap();
    let alpha = &summary.launch.agents[0];
    assert_eq!(alpha.end, TaskEnd::Stopped(AgentState::Running));
    assert!(alpha.forwarded < 100);
    assert_eq!(pipeline.sequence_of("alpha").len() as u64, alpha.forwarded);
    assert!(summary.listener.ended_by == weaver_engine::pipeline::ListenerEnd::EndOfStream);
    assert_eq!(summary.outcome, JobOutcome::Interrupted);
    assert_eq!(store.job_count(), 1);
    let job = store.get_job(summary.job).await.unwrap().unwrap();
    assert_eq!(job.outcome, JobOutcome::Interrupted);
}
