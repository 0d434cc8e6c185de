//! Request tracking across runs: skipping, deletion invalidation,
//! persisted results and plugin invalidation.

mod helpers;

use std::sync::Arc;

use helpers::*;
use kiln_config::CompressorRule;
use kiln_writer::{
    CacheStore, DevDepSpecifier, DevDeps, ProjectConfig, RequestTracker,
};

fn counting_project() -> (TestProject, CountingCompressor) {
    let counter = CountingCompressor::default();
    let mut registry = test_registry();
    registry.register("counting", "/plugins/counting", counter.clone());
    let project = TestProject::with_registry(
        vec![CompressorRule::new("*", ["counting"])],
        registry,
    );
    project.cache.set_blob("app:content", app_source());
    (project, counter)
}

#[tokio::test]
async fn unchanged_request_is_skipped() {
    let (project, counter) = counting_project();
    let tracker = project.tracker();

    let first = project
        .writer
        .write_bundles(&[app_request()], &tokens(), &tracker)
        .await
        .remove(0)
        .unwrap();
    let second = project
        .writer
        .write_bundles(&[app_request()], &tokens(), &tracker)
        .await
        .remove(0)
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(counter.calls(), 1);
    assert_eq!(tracker.config_runs(), 1);
}

#[tokio::test]
async fn changed_content_hash_runs_again() {
    let (project, counter) = counting_project();
    let tracker = project.tracker();

    project
        .writer
        .write_bundles(&[app_request()], &tokens(), &tracker)
        .await
        .remove(0)
        .unwrap();

    let mut changed = app_request();
    changed.info.hash = "content-v2".into();
    project
        .writer
        .write_bundles(&[changed], &tokens(), &tracker)
        .await
        .remove(0)
        .unwrap();

    assert_eq!(counter.calls(), 2);
    // The request for the old content is superseded, not kept alongside.
    assert_eq!(tracker.request_count(), 1);
}

#[tokio::test]
async fn deleting_output_forces_rewrite() {
    let (project, counter) = counting_project();
    let tracker = project.tracker();

    project
        .writer
        .write_bundles(&[app_request()], &tokens(), &tracker)
        .await
        .remove(0)
        .unwrap();

    let output = project.root().join(app_path());
    std::fs::remove_file(&output).unwrap();
    let invalidated = tracker.respond_to_deletions([&output]).unwrap();
    assert_eq!(invalidated.len(), 1);

    project
        .writer
        .write_bundles(&[app_request()], &tokens(), &tracker)
        .await
        .remove(0)
        .unwrap();

    assert_eq!(counter.calls(), 2);
    assert_eq!(project.read(&app_path()), app_output().as_bytes());
}

#[tokio::test]
async fn deleting_dist_dir_forces_rewrite() {
    let (project, counter) = counting_project();
    let tracker = project.tracker();

    project
        .writer
        .write_bundles(&[app_request()], &tokens(), &tracker)
        .await
        .remove(0)
        .unwrap();

    std::fs::remove_dir_all(project.root().join("dist")).unwrap();
    tracker.respond_to_deletions(["dist"]).unwrap();

    project
        .writer
        .write_bundles(&[app_request()], &tokens(), &tracker)
        .await
        .remove(0)
        .unwrap();

    assert_eq!(counter.calls(), 2);
    assert!(project.exists(&app_path()));
}

#[tokio::test]
async fn persisted_results_skip_across_sessions() {
    let (project, counter) = counting_project();
    let store = CacheStore::open(&project.root().join(".kiln-cache")).unwrap();

    for _ in 0..2 {
        let tracker = Arc::new(
            RequestTracker::new(project.root(), project.config.clone()).with_store(store.clone()),
        );
        project
            .writer
            .write_bundles(&[app_request()], &tokens(), &tracker)
            .await
            .remove(0)
            .unwrap();
    }
    assert_eq!(counter.calls(), 1);

    // Output removed while no session was running.
    std::fs::remove_file(project.root().join(app_path())).unwrap();
    let tracker = Arc::new(
        RequestTracker::new(project.root(), project.config.clone()).with_store(store.clone()),
    );
    project
        .writer
        .write_bundles(&[app_request()], &tokens(), &tracker)
        .await
        .remove(0)
        .unwrap();
    assert_eq!(counter.calls(), 2);
}

#[tokio::test]
async fn concurrent_requests_share_config() {
    let project = TestProject::new(vec![
        CompressorRule::new("*.js", ["...", "gzip"]),
        CompressorRule::new("*", ["raw"]),
    ]);
    project.cache.set_blob("app:content", app_source());
    project.cache.set_blob("dep:content", "export const dep = 1;\n");

    let mut dep = app_request();
    dep.bundle.id = "dep".into();
    dep.bundle.name = format!("dep.{DEP_TOKEN}.js");
    dep.bundle.hash_reference = DEP_TOKEN.into();
    dep.info.cache_keys.content = "dep:content".into();
    dep.info.hash_references.clear();

    let tracker = project.tracker();
    let results = project
        .writer
        .write_bundles(&[app_request(), dep], &tokens(), &tracker)
        .await;

    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(result.is_ok(), "{result:?}");
    }
    assert!(project.exists(&format!("dist/dep.{DEP_HASH}.js")));
    assert!(project.exists(&format!("dist/dep.{DEP_HASH}.js.gz")));
    assert_eq!(tracker.config_runs(), 1);
}

#[tokio::test]
async fn invalid_dev_dependency_reloads_plugin() {
    let project = TestProject::new(vec![CompressorRule::new("*", ["raw", "gzip"])]);
    project.cache.set_blob("app:content", app_source());

    let tracker = project.tracker();
    project
        .writer
        .write_bundles(&[app_request()], &tokens(), &tracker)
        .await
        .remove(0)
        .unwrap();
    assert_eq!(project.config.resolved_paths(), 1);

    let gzip = DevDepSpecifier::new("gzip", "/plugins/gzip");
    project.dev_deps.mark_invalid(gzip.clone());
    assert_eq!(project.dev_deps.snapshot().await.unwrap().invalid, vec![gzip.clone()]);

    let mut changed = app_request();
    changed.info.hash = "content-v2".into();
    project
        .writer
        .write_bundles(&[changed], &tokens(), &tracker)
        .await
        .remove(0)
        .unwrap();

    // Re-registered after running, so no longer invalid.
    assert!(project.dev_deps.snapshot().await.unwrap().invalid.is_empty());
    assert_eq!(
        project.config.compressors(&app_path()).unwrap().len(),
        2
    );
}
