use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{NaiveDate, TimeZone, Utc};
use infercore::{NodeError, NodeOutput, NodeResult, RunStatus};
use inferruntime::store::{sanitize_name, NodeSummary, ResultStore, RunMetadata};
use serde_json::{json, Value};
use std::path::Path;
use uuid::Uuid;

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn detection_result(image: &str) -> NodeResult {
    NodeResult::from_outcome(
        "detect",
        "model.detect",
        Ok(NodeOutput::new()
            .with_output("detections", json!([{"label": "cat", "score": 0.9}]))
            .with_output("image", image)
            .with_output("original_image", format!("data:image/jpeg;base64,{image}"))),
        12,
        Utc::now(),
    )
}

#[test]
fn test_sanitize_name() {
    assert_eq!(sanitize_name("Invoice OCR / v2"), "Invoice_OCR___v2");
    assert_eq!(sanitize_name("keep-this_one"), "keep-this_one");
    assert_eq!(sanitize_name(""), "workflow");
    assert_eq!(sanitize_name(&"a".repeat(80)).len(), 50);
}

#[tokio::test]
async fn test_run_layout_and_artifacts() {
    let root = tempfile::tempdir().unwrap();
    let store = ResultStore::new(root.path());
    let started = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

    let run = store.begin_run("Shelf Audit", started).await.unwrap();
    assert_eq!(
        run.dir,
        root.path().join("2024-03-09").join("14-05-07_Shelf_Audit")
    );

    let pixels = [0xFFu8, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    let encoded = STANDARD.encode(pixels);
    let saved = store
        .save_node_result(&run, 1, &detection_result(&encoded))
        .await
        .unwrap();

    assert_eq!(saved, run.dir.join("node_01_model_detect.json"));
    assert_eq!(
        std::fs::read(run.dir.join("node_01_model_detect.jpg")).unwrap(),
        pixels
    );
    assert_eq!(
        std::fs::read(run.dir.join("node_01_model_detect_original.jpg")).unwrap(),
        pixels
    );

    let document = read_json(&saved);
    assert_eq!(document["success"], json!(true));
    assert_eq!(document["node_id"], json!("detect"));
    assert_eq!(document["data"]["image"], json!(true));
    assert_eq!(document["data"]["original_image"], json!(true));
    assert_eq!(document["data"]["detections"][0]["label"], json!("cat"));
}

#[tokio::test]
async fn test_same_second_runs_do_not_collide() {
    let root = tempfile::tempdir().unwrap();
    let store = ResultStore::new(root.path());
    let started = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

    let first = store.begin_run("audit", started).await.unwrap();
    let second = store.begin_run("audit", started).await.unwrap();
    assert_ne!(first.dir, second.dir);
    assert!(second.dir.ends_with("14-05-07_audit_2"));
}

#[tokio::test]
async fn test_invalid_image_is_not_fatal() {
    let root = tempfile::tempdir().unwrap();
    let store = ResultStore::new(root.path());
    let run = store.begin_run("bad image", Utc::now()).await.unwrap();

    let saved = store
        .save_node_result(&run, 3, &detection_result("not base64 at all!"))
        .await
        .unwrap();

    assert!(saved.exists());
    assert!(!run.dir.join("node_03_model_detect.jpg").exists());
}

#[tokio::test]
async fn test_failure_envelope_and_metadata() {
    let root = tempfile::tempdir().unwrap();
    let store = ResultStore::new(root.path());
    let started = Utc::now();
    let run = store.begin_run("metadata", started).await.unwrap();

    let failed = NodeResult::from_outcome(
        "ocr",
        "model.ocr",
        Err(NodeError::Timeout { millis: 500 }),
        500,
        Utc::now(),
    );
    let saved = store.save_node_result(&run, 2, &failed).await.unwrap();
    assert_eq!(read_json(&saved)["error"], json!("Timeout after 500ms"));

    let metadata = RunMetadata {
        run_id: Uuid::new_v4(),
        workflow_id: "wf-1".to_string(),
        workflow_name: "metadata".to_string(),
        started_at: started,
        finished_at: Utc::now(),
        duration_ms: 510,
        status: RunStatus::Failed,
        nodes: vec![NodeSummary {
            node_id: "ocr".to_string(),
            node_type: "model.ocr".to_string(),
            label: "Read text".to_string(),
            status: "failed".to_string(),
            execution_time_ms: Some(500),
        }],
    };
    let path = store.finish_run(&run, &metadata).await.unwrap();

    let written = read_json(&path);
    assert_eq!(path, run.dir.join("metadata.json"));
    assert_eq!(written["workflow_id"], json!("wf-1"));
    assert_eq!(written["status"], json!("failed"));
    assert_eq!(written["nodes"][0]["type"], json!("model.ocr"));
    assert_eq!(written["nodes"][0]["execution_time_ms"], json!(500));
}

fn seed_run(root: &Path, date: &str, run: &str, files: &[(&str, usize)]) {
    let dir = root.join(date).join(run);
    std::fs::create_dir_all(&dir).unwrap();
    for (name, size) in files {
        std::fs::write(dir.join(name), vec![b'x'; *size]).unwrap();
    }
}

#[test]
fn test_cleanup_dry_run_matches_real_sweep() {
    let root = tempfile::tempdir().unwrap();
    seed_run(root.path(), "2024-01-01", "10-00-00_a", &[("node_01_x.json", 100), ("metadata.json", 50)]);
    seed_run(root.path(), "2024-01-01", "11-00-00_b", &[("metadata.json", 25)]);
    seed_run(root.path(), "2024-01-05", "09-00-00_c", &[("node_01_x.jpg", 300)]);
    seed_run(root.path(), "2024-02-01", "09-00-00_d", &[("metadata.json", 10)]);
    std::fs::create_dir_all(root.path().join("not-a-date")).unwrap();

    let store = ResultStore::new(root.path());
    let cutoff = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();

    let preview = store.cleanup_before(cutoff, true).unwrap();
    assert!(preview.dry_run);
    assert_eq!(preview.dates, vec!["2024-01-01", "2024-01-05"]);
    assert_eq!(preview.runs, 3);
    assert_eq!(preview.files, 4);
    assert_eq!(preview.bytes, 475);
    assert!(root.path().join("2024-01-01").exists());

    let swept = store.cleanup_before(cutoff, false).unwrap();
    assert!(!swept.dry_run);
    assert_eq!(
        (swept.dates.clone(), swept.runs, swept.files, swept.bytes),
        (preview.dates.clone(), preview.runs, preview.files, preview.bytes)
    );
    assert!(!root.path().join("2024-01-01").exists());
    assert!(!root.path().join("2024-01-05").exists());
    assert!(root.path().join("2024-02-01").exists());
    assert!(root.path().join("not-a-date").exists());
}

#[test]
fn test_cleanup_retention_days_and_missing_root() {
    let root = tempfile::tempdir().unwrap();
    let today = Utc::now().date_naive();
    let recent = today.format("%Y-%m-%d").to_string();
    seed_run(root.path(), &recent, "08-00-00_today", &[("metadata.json", 10)]);
    seed_run(root.path(), "2000-01-01", "08-00-00_old", &[("metadata.json", 10)]);

    let store = ResultStore::new(root.path());
    let stats = store.cleanup_old_results(30, false).unwrap();
    assert_eq!(stats.dates, vec!["2000-01-01"]);
    assert!(root.path().join(&recent).exists());

    let empty = ResultStore::new(root.path().join("missing"));
    let stats = empty.cleanup_old_results(30, true).unwrap();
    assert_eq!(stats.runs, 0);
    assert!(stats.dates.is_empty());
}
