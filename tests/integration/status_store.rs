//! Integration tests for status stores shared between workers

use super::test_utils::{collaborators, credential, registry, RecordingMerger, Script};
use bpmn_forge::{
    ProcessorConfig, SledStatusStore, StatusStore, Task, TaskProcessor, TaskStatus,
};
use std::sync::Arc;
use tempfile::TempDir;

fn open_pair(temp_dir: &TempDir) -> (Arc<dyn StatusStore>, Arc<dyn StatusStore>) {
    let db = sled::open(temp_dir.path().join("status")).unwrap();
    let writer = SledStatusStore::new(db.clone()).unwrap();
    let reader = SledStatusStore::new(db).unwrap();
    (Arc::new(writer), Arc::new(reader))
}

#[tokio::test]
async fn status_written_by_one_handle_is_read_by_another() {
    let temp_dir = TempDir::new().unwrap();
    let (writer, reader) = open_pair(&temp_dir);
    let (collaborators, _, _) = collaborators(Script::default(), RecordingMerger::default());

    let task = Task::with_store(writer, "invoice approval", None, None).unwrap();
    assert_eq!(reader.get(task.get_id()).unwrap(), Some(TaskStatus::Created));

    task.run(&credential(), &registry(), &collaborators).await.unwrap();
    assert_eq!(reader.get(task.get_id()).unwrap(), Some(TaskStatus::Completed));

    let id = task.get_id();
    drop(task);
    assert_eq!(reader.get(id).unwrap(), None);
}

#[tokio::test]
async fn processor_reads_status_of_tasks_it_never_saw() {
    let temp_dir = TempDir::new().unwrap();
    let (writer, reader) = open_pair(&temp_dir);
    let (worker_collaborators, _, _) =
        collaborators(Script::default(), RecordingMerger::default());
    let (observer_collaborators, _, _) =
        collaborators(Script::default(), RecordingMerger::default());

    let worker = TaskProcessor::new(
        ProcessorConfig::default(),
        credential(),
        registry(),
        worker_collaborators,
        writer,
    );
    let observer = TaskProcessor::new(
        ProcessorConfig::default(),
        credential(),
        registry(),
        observer_collaborators,
        reader,
    );

    let id = worker
        .submit(worker.create_task("travel request", None, None).unwrap())
        .unwrap();
    worker.wait(id).await.unwrap();

    assert!(observer.task_ids().is_empty());
    assert_eq!(observer.get_status(id).unwrap(), TaskStatus::Completed);
}

#[test]
fn entries_lists_every_live_task() {
    let store = Arc::new(SledStatusStore::temporary().unwrap());
    let shared: Arc<dyn StatusStore> = store.clone();
    let tasks: Vec<Task> = (0..3)
        .map(|i| Task::with_store(shared.clone(), format!("p{i}"), None, None).unwrap())
        .collect();

    let mut listed: Vec<_> = store.entries().unwrap().into_iter().map(|(id, _)| id).collect();
    let mut expected: Vec<_> = tasks.iter().map(|t| t.get_id()).collect();
    listed.sort();
    expected.sort();
    assert_eq!(listed, expected);
    store.flush().unwrap();
}
