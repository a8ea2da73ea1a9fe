//! Bench model tests

use serde_json::json;

use benchctl::errors::BenchError;

use crate::common::BenchFixture;

#[tokio::test]
async fn test_apps_read_version_and_branch() {
    let fixture = BenchFixture::new()
        .with_app("frappe", "15.2.0", "version-15")
        .with_app("erpnext", "15.1.3", "version-15")
        .with_app("frappe", "15.2.0", "version-15");
    let bench = fixture.open().await;

    let apps = bench.apps().await.unwrap();
    assert_eq!(apps.len(), 2);
    assert_eq!(apps[0].name, "frappe");
    assert_eq!(apps[0].version.as_deref(), Some("15.2.0"));
    assert_eq!(apps[0].branch.as_deref(), Some("version-15"));
    assert!(apps[0].is_framework());
    assert!(apps[1].is_primary());
    assert!(bench.app("hrms").await.unwrap().is_none());
}

#[tokio::test]
async fn test_app_listed_without_source_is_skipped() {
    let fixture = BenchFixture::new().with_app("frappe", "15.0.0", "version-15");
    std::fs::write(fixture.path().join("sites/apps.txt"), "frappe\nghost\n").unwrap();
    let bench = fixture.open().await;

    let names: Vec<String> = bench.apps().await.unwrap().into_iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["frappe"]);
}

#[tokio::test]
async fn test_set_maintenance_keeps_other_keys() {
    let fixture = BenchFixture::new().with_config(json!({
        "restart_supervisor_on_update": 1,
        "frappe_user": "frappe"
    }));
    let bench = fixture.open().await;

    bench.set_maintenance(true).await.unwrap();
    let config = fixture.config();
    assert_eq!(config["maintenance_mode"], json!(1));
    assert_eq!(config["pause_scheduler"], json!(1));
    assert_eq!(config["frappe_user"], json!("frappe"));

    bench.set_maintenance(false).await.unwrap();
    let config = fixture.config();
    assert_eq!(config["maintenance_mode"], json!(0));
    assert_eq!(config["pause_scheduler"], json!(0));
    assert_eq!(config["restart_supervisor_on_update"], json!(1));
}

#[tokio::test]
async fn test_config_must_be_an_object() {
    let fixture = BenchFixture::new().with_config(json!(["not", "a", "map"]));
    let bench = fixture.open().await;

    assert!(matches!(
        bench.config().await,
        Err(BenchError::ConfigError(_))
    ));
}

#[tokio::test]
async fn test_exclude_app() {
    let fixture = BenchFixture::new()
        .with_app("frappe", "15.0.0", "version-15")
        .with_app("payments", "0.1.0", "develop");
    let bench = fixture.open().await;

    bench.exclude_app("payments").await.unwrap();
    bench.exclude_app("payments").await.unwrap();
    assert_eq!(bench.excluded_apps().await.unwrap(), vec!["payments"]);

    assert!(matches!(
        bench.exclude_app("frappe").await,
        Err(BenchError::ValidationError(_))
    ));
}
