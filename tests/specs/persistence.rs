//! Restart durability: records buffered by one agent process are
//! replayed by the next one sharing its buffer directory.

use crate::prelude::*;
use shiplog_agent::Agent;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn buffered_records_survive_an_agent_restart() {
    let server = SpecServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("app.log");
    let buffer_dir = dir.path().join("buffer");
    append(&log_path, "");

    // First agent: connect, lose the server, buffer, shut down
    let config = agent_config(&server.addr, &buffer_dir, &log_path);
    let ctx = CancellationToken::new();
    let first = tokio::spawn(Agent::new(config).run(ctx.clone()));

    {
        let registry = &server.registry;
        wait_for("agent registration", 10, || !registry.is_empty()).await;
    }
    let addr = server.addr.clone();
    server.stop().await;

    append(&log_path, "orphan-1\norphan-2\n");
    let buffer_file = buffer_dir.join("buffer.dat");
    wait_for("records buffered", 10, || {
        buffer_file
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    })
    .await;

    // Clean shutdown: the final flush also lands on disk
    ctx.cancel();
    first.await.expect("agent task").expect("agent run");

    // Second agent process inherits the buffer dir; a server is back
    let revived = SpecServer::start_at(&addr).await;
    let other_log = dir.path().join("other.log");
    append(&other_log, "");
    let config = agent_config(&revived.addr, &buffer_dir, &other_log);
    let ctx = CancellationToken::new();
    let second = tokio::spawn(Agent::new(config).run(ctx.clone()));

    // Registration triggers the replay of the inherited buffer
    {
        let sink = &revived.sink;
        wait_for("orphans replayed", 15, || {
            let seen = sink.messages();
            ["orphan-1", "orphan-2"]
                .iter()
                .all(|m| seen.iter().any(|s| s == m))
        })
        .await;
    }

    ctx.cancel();
    let _ = second.await;
    revived.stop().await;
}
