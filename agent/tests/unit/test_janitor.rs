//! Host janitor tests

use std::time::Duration;

use depman::deploy::janitor::Janitor;
use depman::runtime::ContainerState;

use crate::fakes::{intent, FakeRuntime};
use crate::harness::Harness;

/// Poll until `done` holds, for up to two seconds
async fn eventually(done: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

#[tokio::test]
async fn test_removes_only_exited_containers() {
    let runtime = FakeRuntime::new();
    let exited = runtime.add_container("batch", "registry/batch:v1", None, ContainerState::Exited);
    let running = runtime.add_container("api", "registry/api:v1", None, ContainerState::Running);
    let created = runtime.add_container("web", "registry/web:v1", None, ContainerState::Created);

    let janitor = Janitor::new(runtime.clone());
    let removed = janitor.remove_exited_containers().await.unwrap();

    assert_eq!(removed, 1);
    assert!(runtime.container(&exited).is_none());
    assert!(runtime.container(&running).is_some());
    assert!(runtime.container(&created).is_some());
}

#[tokio::test]
async fn test_removes_only_dangling_images() {
    let runtime = FakeRuntime::new();
    runtime.add_image("sha256:aaa", true);
    runtime.add_image("sha256:bbb", false);
    runtime.add_image("sha256:ccc", true);

    let janitor = Janitor::new(runtime.clone());
    let removed = janitor.remove_dangling_images().await.unwrap();

    assert_eq!(removed, 2);
    let left: Vec<String> = runtime.images().into_iter().map(|i| i.id).collect();
    assert_eq!(left, vec!["sha256:bbb".to_string()]);
}

#[tokio::test]
async fn test_background_cleanup_runs_to_completion() {
    let runtime = FakeRuntime::new();
    runtime.add_container("batch", "registry/batch:v1", None, ContainerState::Exited);
    runtime.add_image("sha256:aaa", true);

    let janitor = Janitor::new(runtime.clone());
    janitor.spawn_remove_exited().await.unwrap();
    janitor.spawn_remove_dangling().await.unwrap();

    assert!(runtime.containers().is_empty());
    assert!(runtime.images().is_empty());
}

#[tokio::test]
async fn test_deploy_triggers_host_cleanup() {
    let runtime = FakeRuntime::new();
    let bystander =
        runtime.add_container("batch", "registry/batch:v1", None, ContainerState::Exited);
    runtime.add_image("sha256:aaa", true);
    runtime.add_image("sha256:bbb", false);
    let h = Harness::with_cleanup(runtime.clone()).await;

    let id = h
        .state
        .reconciler
        .deploy(&intent("api", "registry/api:v1"))
        .await
        .unwrap();

    assert!(eventually(|| runtime.container(&bystander).is_none()).await);
    assert!(eventually(|| runtime.images().iter().all(|i| !i.dangling)).await);
    assert_eq!(runtime.images().len(), 1);
    assert_eq!(runtime.container(&id).unwrap().state, ContainerState::Running);

    h.cleanup().await;
}

#[tokio::test]
async fn test_failing_cleanup_does_not_fail_deploy() {
    let runtime = FakeRuntime::new();
    let bystander =
        runtime.add_container("batch", "registry/batch:v1", None, ContainerState::Exited);
    runtime.add_image("sha256:aaa", true);
    runtime.fail_cleanup();
    let h = Harness::with_cleanup(runtime.clone()).await;

    let result = h
        .state
        .reconciler
        .deploy(&intent("api", "registry/api:v1"))
        .await;
    assert!(result.is_ok());

    // Give the background jobs time to fail
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(runtime.container(&bystander).is_some());
    assert_eq!(runtime.images().len(), 1);
    let api = runtime.named("api");
    assert_eq!(api.len(), 1);
    assert_eq!(api[0].state, ContainerState::Running);

    h.cleanup().await;
}
