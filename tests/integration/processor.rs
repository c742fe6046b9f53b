//! Integration tests for the task processor
//!
//! Tests cover:
//! - Worker pool bound on concurrent pipelines
//! - Statistics after mixed outcomes
//! - Waiting on all tasks
//! - Construction from configuration

use super::test_utils::{collaborators, credential, registry, RecordingMerger, Script};
use bpmn_forge::config::{StatusBackend, StatusConfig};
use bpmn_forge::{
    ConfigError, ForgeConfig, MemoryStatusStore, ProcessorConfig, ProcessorStats, RunStatus,
    StatusStore, TaskError, TaskProcessor, TaskStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn processor(workers: usize, script: Script) -> (TaskProcessor, Arc<Script>) {
    let (collaborators, script, _) = collaborators(script, RecordingMerger::default());
    let processor = TaskProcessor::new(
        ProcessorConfig { workers },
        credential(),
        registry(),
        collaborators,
        MemoryStatusStore::shared(),
    );
    (processor, script)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_bounds_concurrency() {
    let (processor, script) = processor(
        2,
        Script {
            latency: Some(Duration::from_millis(20)),
            ..Script::default()
        },
    );

    for i in 0..8 {
        let task = processor.create_task(format!("job-{i}"), None, None).unwrap();
        processor.submit(task).unwrap();
    }
    let results = processor.wait_all().await;

    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|(_, result)| result.is_ok()));
    assert!(script.peak_concurrency() <= 2);
    assert_eq!(
        processor.stats(),
        ProcessorStats {
            completed: 8,
            ..ProcessorStats::default()
        }
    );
}

#[tokio::test]
async fn failures_are_counted_and_status_is_kept() {
    let (processor, _) = processor(
        3,
        Script {
            continue_fails_with: Some(RunStatus::Cancelled),
            ..Script::default()
        },
    );

    let task = processor.create_task("returns", None, None).unwrap();
    let id = processor.submit(task).unwrap();
    let err = processor.wait(id).await.unwrap_err();

    assert!(matches!(err, TaskError::ProviderIncomplete { .. }));
    assert_eq!(processor.get_status(id).unwrap(), TaskStatus::GeneratingGraphic);
    assert_eq!(processor.stats().failed, 1);
    assert_eq!(processor.task_ids(), vec![id]);
}

#[tokio::test]
async fn wait_all_skips_taken_results() {
    let (processor, _) = processor(2, Script::default());
    let first = processor
        .submit(processor.create_task("a", None, None).unwrap())
        .unwrap();
    let second = processor
        .submit(processor.create_task("b", None, None).unwrap())
        .unwrap();

    processor.wait(first).await.unwrap();
    let rest = processor.wait_all().await;

    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].0, second);
    assert_eq!(rest[0].1.as_deref().unwrap(), "process(b)+graphic(thread-b)");
}

#[tokio::test]
async fn abandoned_wait_keeps_the_result() {
    let (processor, _) = processor(
        1,
        Script {
            latency: Some(Duration::from_millis(50)),
            ..Script::default()
        },
    );
    let id = processor
        .submit(processor.create_task("slow", None, None).unwrap())
        .unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(5), processor.wait(id)).await;
    assert!(abandoned.is_err());

    assert_eq!(
        processor.wait(id).await.unwrap(),
        "process(slow)+graphic(thread-slow)"
    );
    assert_eq!(processor.get_status(id).unwrap(), TaskStatus::Completed);
    assert!(matches!(
        processor.wait(id).await,
        Err(TaskError::ResultTaken(_))
    ));
}

#[tokio::test]
async fn tasks_from_another_processor_store_are_tracked_on_submit() {
    let (processor, _) = processor(1, Script::default());
    let foreign = Arc::new(bpmn_forge::Task::new("elsewhere", None, None).unwrap());
    let id = processor.submit(foreign).unwrap();

    processor.wait(id).await.unwrap();
    assert_eq!(processor.get_status(id).unwrap(), TaskStatus::Completed);
}

#[test]
fn from_config_requires_capabilities_and_credential() {
    let merger = Arc::new(RecordingMerger::default());

    let err = TaskProcessor::from_config(&ForgeConfig::default(), merger.clone()).err();
    assert!(matches!(err, Some(ConfigError::Invalid(_))));

    let mut config = ForgeConfig {
        capabilities: Some(registry()),
        ..ForgeConfig::default()
    };
    config.provider.api_key_env = "BPMN_FORGE_IT_MISSING_KEY".to_string();
    std::env::remove_var("BPMN_FORGE_IT_MISSING_KEY");
    let err = TaskProcessor::from_config(&config, merger).err();
    assert!(matches!(err, Some(ConfigError::MissingCredential(_))));
}

#[test]
fn from_config_opens_the_configured_store() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = ForgeConfig {
        capabilities: Some(registry()),
        status: StatusConfig {
            backend: StatusBackend::Sled,
            path: Some(temp_dir.path().join("status")),
        },
        ..ForgeConfig::default()
    };
    config.processor.workers = 3;
    config.provider.api_key_env = "BPMN_FORGE_IT_PRESENT_KEY".to_string();
    std::env::set_var("BPMN_FORGE_IT_PRESENT_KEY", "sk-it");

    let processor =
        TaskProcessor::from_config(&config, Arc::new(RecordingMerger::default())).unwrap();
    assert_eq!(processor.config().workers, 3);

    let task = processor.create_task("persisted", None, None).unwrap();
    assert_eq!(
        processor.store().get(task.get_id()).unwrap(),
        Some(TaskStatus::Created)
    );
}
