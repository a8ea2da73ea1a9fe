//! Patch runner and shipped patch tests

use serde_json::json;

use benchctl::errors::BenchError;
use benchctl::patches::v3::DeprecateOldConfig;
use benchctl::patches::v5::{UpdateArchivedSites, UpdateSiteLogging};
use benchctl::patches::{Patch, PatchOutcome, PatchRunner};

use crate::common::{journal, BenchFixture, Script, ScriptedPatch};

#[tokio::test]
async fn test_runs_in_order_and_records_each() {
    let fixture = BenchFixture::new();
    let bench = fixture.open().await;
    let runs = journal();
    let runner = PatchRunner::new(vec![
        ScriptedPatch::boxed("app.patches.first", Script::Apply, &runs),
        ScriptedPatch::boxed("app.patches.second", Script::Apply, &runs),
    ]);

    let summary = runner.run(&bench).await.unwrap();
    assert_eq!(summary.applied, vec!["app.patches.first", "app.patches.second"]);
    assert_eq!(*runs.lock().unwrap(), vec!["app.patches.first", "app.patches.second"]);
    assert_eq!(fixture.ledger(), vec!["app.patches.first", "app.patches.second"]);
}

#[tokio::test]
async fn test_recorded_patches_never_rerun() {
    let fixture = BenchFixture::new().with_ledger(&["app.patches.first"]);
    let bench = fixture.open().await;
    let runs = journal();
    let runner = PatchRunner::new(vec![
        ScriptedPatch::boxed("app.patches.first", Script::Fail, &runs),
        ScriptedPatch::boxed("app.patches.second", Script::Apply, &runs),
    ]);

    let summary = runner.run(&bench).await.unwrap();
    assert_eq!(summary.already_recorded, 1);
    assert_eq!(*runs.lock().unwrap(), vec!["app.patches.second"]);

    // Second run is a no-op
    let summary = runner.run(&bench).await.unwrap();
    assert_eq!(summary.executed(), 0);
    assert_eq!(summary.already_recorded, 2);
    assert_eq!(runs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_skip_marker_is_recorded() {
    let fixture = BenchFixture::new();
    let bench = fixture.open().await;
    let runs = journal();
    let runner = PatchRunner::new(vec![ScriptedPatch::boxed(
        "app.patches.nothing_to_do",
        Script::Mark,
        &runs,
    )]);

    let summary = runner.run(&bench).await.unwrap();
    assert_eq!(summary.marked, vec!["app.patches.nothing_to_do"]);
    assert_eq!(fixture.ledger(), vec!["app.patches.nothing_to_do"]);

    runner.run(&bench).await.unwrap();
    assert_eq!(runs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_not_applicable_is_retried() {
    let fixture = BenchFixture::new();
    let bench = fixture.open().await;
    let runs = journal();
    let runner = PatchRunner::new(vec![ScriptedPatch::boxed(
        "app.patches.later",
        Script::Skip,
        &runs,
    )]);

    let summary = runner.run(&bench).await.unwrap();
    assert_eq!(summary.skipped, vec!["app.patches.later"]);
    assert!(fixture.ledger().is_empty());

    runner.run(&bench).await.unwrap();
    assert_eq!(runs.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_failure_keeps_earlier_records() {
    let fixture = BenchFixture::new();
    let bench = fixture.open().await;
    let runs = journal();
    let runner = PatchRunner::new(vec![
        ScriptedPatch::boxed("app.patches.first", Script::Apply, &runs),
        ScriptedPatch::boxed("app.patches.broken", Script::Fail, &runs),
        ScriptedPatch::boxed("app.patches.third", Script::Apply, &runs),
    ]);

    match runner.run(&bench).await {
        Err(BenchError::PatchExecution { identifier, .. }) => {
            assert_eq!(identifier, "app.patches.broken")
        }
        other => panic!("expected PatchExecution, got {other:?}"),
    }
    assert_eq!(fixture.ledger(), vec!["app.patches.first"]);
    assert_eq!(*runs.lock().unwrap(), vec!["app.patches.first", "app.patches.broken"]);
}

#[tokio::test]
async fn test_rerun_after_failure_resumes_at_failed_patch() {
    let fixture = BenchFixture::new();
    let bench = fixture.open().await;
    let runs = journal();
    let ids = ["p.one", "p.two", "p.three", "p.four", "p.five"];
    let runner = PatchRunner::new(
        ids.iter()
            .map(|id| {
                let script = if *id == "p.three" { Script::FailOnce } else { Script::Apply };
                ScriptedPatch::boxed(id, script, &runs)
            })
            .collect(),
    );

    assert!(runner.run(&bench).await.is_err());
    assert_eq!(fixture.ledger(), vec!["p.one", "p.two"]);

    let before = runs.lock().unwrap().len();
    let summary = runner.run(&bench).await.unwrap();
    assert_eq!(summary.already_recorded, 2);
    assert_eq!(runs.lock().unwrap()[before..], ["p.three", "p.four", "p.five"]);
    assert_eq!(fixture.ledger(), ids.to_vec());
}

#[tokio::test]
async fn test_ledger_comments_survive() {
    let fixture = BenchFixture::new().with_ledger(&["# applied by hand", "app.patches.first #2019"]);
    let bench = fixture.open().await;
    let runs = journal();
    let runner = PatchRunner::new(vec![
        ScriptedPatch::boxed("app.patches.first", Script::Fail, &runs),
        ScriptedPatch::boxed("app.patches.second", Script::Apply, &runs),
    ]);

    runner.run(&bench).await.unwrap();
    assert_eq!(
        fixture.ledger(),
        vec!["# applied by hand", "app.patches.first #2019", "app.patches.second"]
    );
}

#[tokio::test]
async fn test_status_lists_shipped_patches() {
    let fixture = BenchFixture::new().with_ledger(&["bench.patches.v3.deprecate_old_config"]);
    let bench = fixture.open().await;

    let status = PatchRunner::shipped().status(&bench).await.unwrap();
    assert_eq!(status.len(), 3);
    assert!(status[0].recorded);
    assert!(!status[1].recorded);
}

#[tokio::test]
async fn test_deprecate_old_config_merges_legacy_file() {
    let fixture = BenchFixture::new().with_config(json!({ "frappe_user": "frappe" }));
    std::fs::write(
        fixture.path().join("config.json"),
        r#"{"celery_broker": "redis://10.0.0.5:6379", "shallow_clone": 0}"#,
    )
    .unwrap();
    let bench = fixture.open().await;

    let outcome = DeprecateOldConfig.execute(&bench).await.unwrap();
    assert_eq!(outcome, PatchOutcome::Applied);
    assert!(!fixture.path().join("config.json").exists());

    let config = fixture.config();
    assert_eq!(config["frappe_user"], json!("frappe"));
    assert_eq!(config["shallow_clone"], json!(0));
    assert_eq!(config["redis_queue"], json!("redis://10.0.0.5:6379"));
    assert!(config.get("celery_broker").is_none());

    // Nothing left to fold
    let outcome = DeprecateOldConfig.execute(&bench).await.unwrap();
    assert_eq!(outcome, PatchOutcome::AppliedWithSkipMarker);
}

#[tokio::test]
async fn test_update_site_logging_creates_dirs() {
    let fixture = BenchFixture::new().with_site("a.example.com").with_site("b.example.com");
    let bench = fixture.open().await;

    let outcome = UpdateSiteLogging.execute(&bench).await.unwrap();
    assert_eq!(outcome, PatchOutcome::Applied);
    assert!(fixture.path().join("sites/a.example.com/logs").is_dir());
    assert!(fixture.path().join("sites/b.example.com/logs").is_dir());
}

#[tokio::test]
async fn test_archived_sites_waits_for_v14() {
    let fixture = BenchFixture::new().with_app("frappe", "13.40.0", "version-13");
    std::fs::create_dir_all(fixture.path().join("archived_sites/old.example.com")).unwrap();
    let bench = fixture.open().await;

    let outcome = UpdateArchivedSites.execute(&bench).await.unwrap();
    assert_eq!(outcome, PatchOutcome::NotApplicable);
    assert!(fixture.path().join("archived_sites/old.example.com").is_dir());
}

#[cfg(unix)]
#[tokio::test]
async fn test_archived_sites_moves_and_links() {
    let fixture = BenchFixture::new().with_app("frappe", "14.3.0", "version-14");
    std::fs::create_dir_all(fixture.path().join("archived_sites/old.example.com")).unwrap();
    let bench = fixture.open().await;

    let outcome = UpdateArchivedSites.execute(&bench).await.unwrap();
    assert_eq!(outcome, PatchOutcome::Applied);
    assert!(fixture.path().join("archived/sites/old.example.com").is_dir());

    let link = fixture.path().join("archived_sites");
    assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert!(link.join("old.example.com").is_dir());

    let outcome = UpdateArchivedSites.execute(&bench).await.unwrap();
    assert_eq!(outcome, PatchOutcome::AppliedWithSkipMarker);
}

#[cfg(unix)]
#[tokio::test]
async fn test_archived_sites_dangling_link_is_not_recorded() {
    let fixture = BenchFixture::new().with_app("frappe", "14.3.0", "version-14");
    std::os::unix::fs::symlink(
        fixture.path().join("archived").join("sites"),
        fixture.path().join("archived_sites"),
    )
    .unwrap();
    let bench = fixture.open().await;

    let outcome = UpdateArchivedSites.execute(&bench).await.unwrap();
    assert_eq!(outcome, PatchOutcome::NotApplicable);

    let runner = PatchRunner::new(vec![Box::new(UpdateArchivedSites)]);
    runner.run(&bench).await.unwrap();
    assert!(fixture.ledger().is_empty());
}
