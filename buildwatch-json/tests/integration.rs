use buildwatch::logger::MemoryLogTracker;
use buildwatch::publisher::Publisher;
use buildwatch::{ExecutionReport, TaskLength, TaskMessageState};
use buildwatch_json::{JsonPublisher, JsonPublisherConfiguration, WriteMode};
use std::sync::Arc;

fn report(build_id: &str) -> ExecutionReport {
    let tasks = vec![TaskLength::new(50, ":app:compile", TaskMessageState::Executed)];
    ExecutionReport {
        build_id: Some(build_id.into()),
        success: true,
        tasks: Some(tasks.clone()),
        unfiltered_tasks: Some(tasks),
        ..Default::default()
    }
}

#[tokio::test]
async fn appends_one_report_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("reports.jsonl");
    let publisher = JsonPublisher::new(
        JsonPublisherConfiguration { path: path.clone(), ..Default::default() },
        Arc::new(MemoryLogTracker::new()),
    );
    publisher.validate().unwrap();

    publisher.publish(&report("first")).await.unwrap();
    publisher.publish(&report("second")).await.unwrap();

    let contents = std::fs::read_to_string(&path).expect("file");
    let lines: Vec<_> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    let parsed: ExecutionReport = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(parsed.build_id.as_deref(), Some("second"));
    assert_eq!(parsed.tasks()[0].identifier, ":app:compile");
}

#[tokio::test]
async fn overwrite_keeps_latest_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("latest.json");
    let logger = MemoryLogTracker::new();
    let publisher = JsonPublisher::new(
        JsonPublisherConfiguration {
            path: path.clone(),
            mode: WriteMode::Overwrite,
            ..Default::default()
        },
        Arc::new(logger.clone()),
    );

    publisher.publish(&report("first")).await.unwrap();
    publisher.publish(&report("second")).await.unwrap();

    let contents = std::fs::read_to_string(&path).expect("file");
    assert_eq!(contents.lines().count(), 1);
    assert!(contents.contains("\"second\""));
    assert_eq!(logger.messages_for("JsonPublisher").len(), 2);
}

#[tokio::test]
async fn unwritable_path_is_delivery_failure() {
    let dir = tempfile::tempdir().unwrap();
    // a directory cannot be opened as a file
    let publisher = JsonPublisher::new(
        JsonPublisherConfiguration { path: dir.path().to_path_buf(), ..Default::default() },
        Arc::new(MemoryLogTracker::new()),
    );
    let err = publisher.publish(&report("x")).await.unwrap_err();
    assert!(err.is_delivery_failed());
}
