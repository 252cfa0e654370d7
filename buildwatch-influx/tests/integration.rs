use buildwatch::logger::MemoryLogTracker;
use buildwatch::publisher::Publisher;
use buildwatch::{ExecutionReport, TaskLength, TaskMessageState};
use buildwatch_influx::{InfluxDbPublisher, InfluxDbPublisherConfiguration};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Captured {
    request_line: String,
    headers: String,
    body: String,
}

/// Minimal HTTP endpoint answering every request with `status`.
async fn serve(status: &'static str) -> (String, Arc<Mutex<Vec<Captured>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { return };
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let header_end = loop {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break None;
                }
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break Some(pos + 4);
                }
            };
            let Some(header_end) = header_end else { continue };
            let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let length = head
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse().ok())?
                })
                .unwrap_or(0usize);
            while buf.len() < header_end + length {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
            let mut lines = head.lines();
            let request_line = lines.next().unwrap_or_default().to_string();
            let headers = lines.collect::<Vec<_>>().join("\n");
            sink.lock().unwrap().push(Captured { request_line, headers, body });
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    (format!("http://{addr}"), captured)
}

fn report() -> ExecutionReport {
    let tasks = vec![
        TaskLength::new(120, ":app:compile", TaskMessageState::Executed),
        TaskLength::new(40, ":app:test", TaskMessageState::FromCache),
    ];
    ExecutionReport {
        build_id: Some("b-1".into()),
        end_ms: Some("1700000000000".into()),
        duration_ms: Some("5000".into()),
        success: true,
        tasks: Some(tasks.clone()),
        unfiltered_tasks: Some(tasks),
        ..Default::default()
    }
}

#[tokio::test]
async fn writes_one_point_per_document() {
    let (url, captured) = serve("204 No Content").await;
    let logger = MemoryLogTracker::new();
    let publisher = InfluxDbPublisher::new(
        InfluxDbPublisherConfiguration {
            url,
            db_name: "builds".into(),
            username: Some("ci".into()),
            password: Some("token".into()),
            ..Default::default()
        },
        Arc::new(logger.clone()),
    );
    publisher.validate().unwrap();
    publisher.publish(&report()).await.unwrap();

    let requests = captured.lock().unwrap().clone();
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert!(request.request_line.starts_with("POST /write?db=builds&precision=ms "));
        assert!(request.headers.to_ascii_lowercase().contains("authorization: basic"));
    }
    assert!(requests[0].body.starts_with("build,"));
    assert!(requests[0].body.contains("duration=5000i"));
    assert!(requests[1].body.starts_with("task,"));
    assert!(requests[1].body.contains("task=:app:compile"));
    assert!(requests[1].body.ends_with(" value=120i 1700000000000"));
    assert_eq!(logger.messages_for("InfluxDbPublisher")[1], "InfluxDbPublisher");
}

#[tokio::test]
async fn rejected_writes_are_reported() {
    let (url, captured) = serve("500 Internal Server Error").await;
    let logger = MemoryLogTracker::new();
    let publisher = InfluxDbPublisher::new(
        InfluxDbPublisherConfiguration {
            url,
            db_name: "builds".into(),
            publish_build_metrics: false,
            ..Default::default()
        },
        Arc::new(logger.clone()),
    );
    let err = publisher.publish(&report()).await.unwrap_err();
    assert!(err.is_delivery_failed());
    assert_eq!(captured.lock().unwrap().len(), 2);
    assert_eq!(logger.errors().len(), 2);
}
