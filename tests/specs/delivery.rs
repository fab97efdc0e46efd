//! End-to-end delivery: tailed lines arrive at the sink, enriched.

use crate::prelude::*;
use shiplog_agent::Agent;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn tailed_lines_reach_the_sink_enriched() {
    let server = SpecServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("app.log");
    append(&log_path, "");

    let config = agent_config(&server.addr, &dir.path().join("buffer"), &log_path);
    let ctx = CancellationToken::new();
    let agent = tokio::spawn(Agent::new(config).run(ctx.clone()));

    // Wait for registration before writing, so the from-end tailer is
    // attached
    {
        let registry = &server.registry;
        wait_for("agent registration", 10, || !registry.is_empty()).await;
    }

    append(&log_path, "INFO one\nERROR two\nthree\n");
    {
        let sink = &server.sink;
        wait_for("records at sink", 10, || sink.records().len() == 3).await;
    }

    let records = server.sink.records();
    let messages: Vec<_> = records.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, vec!["INFO one", "ERROR two", "three"]);

    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.source, "app");
        assert_eq!(record.line_number, i as u64 + 1);
        assert_eq!(record.file_path, log_path.display().to_string());
        assert_eq!(record.labels.get("source").map(String::as_str), Some("app"));
        assert_eq!(record.labels.get("env").map(String::as_str), Some("spec"));
    }
    assert_eq!(records[0].level, shiplog_core::LogLevel::Info);
    assert_eq!(records[1].level, shiplog_core::LogLevel::Error);

    assert!(server.stats.records() >= 3);

    ctx.cancel();
    let _ = agent.await;
    server.stop().await;
}

#[tokio::test]
async fn many_lines_arrive_in_order_without_loss() {
    let server = SpecServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("app.log");
    append(&log_path, "");

    let config = agent_config(&server.addr, &dir.path().join("buffer"), &log_path);
    let ctx = CancellationToken::new();
    let agent = tokio::spawn(Agent::new(config).run(ctx.clone()));

    {
        let registry = &server.registry;
        wait_for("agent registration", 10, || !registry.is_empty()).await;
    }

    let lines: String = (0..200).map(|i| format!("line-{i:03}\n")).collect();
    append(&log_path, &lines);

    {
        let sink = &server.sink;
        wait_for("all records at sink", 15, || sink.records().len() == 200).await;
    }

    // Single source: merger order is emission order end to end
    let messages = server.sink.messages();
    let expected: Vec<String> = (0..200).map(|i| format!("line-{i:03}")).collect();
    assert_eq!(messages, expected);

    ctx.cancel();
    let _ = agent.await;
    server.stop().await;
}
