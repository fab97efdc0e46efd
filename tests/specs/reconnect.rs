//! Fault recovery: records produced during an outage are buffered and
//! replayed after reconnect.

use crate::prelude::*;
use shiplog_agent::Agent;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn outage_buffers_then_replays_everything() {
    let server = SpecServer::start().await;
    let addr = server.addr.clone();
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("app.log");
    let buffer_dir = dir.path().join("buffer");
    append(&log_path, "");

    let config = agent_config(&addr, &buffer_dir, &log_path);
    let ctx = CancellationToken::new();
    let agent = tokio::spawn(Agent::new(config).run(ctx.clone()));

    {
        let registry = &server.registry;
        wait_for("agent registration", 10, || !registry.is_empty()).await;
    }

    append(&log_path, "before-1\nbefore-2\n");
    {
        let sink = &server.sink;
        wait_for("pre-outage records", 10, || sink.records().len() == 2).await;
    }

    // Outage: the server goes away entirely
    server.stop().await;

    append(&log_path, "during-1\nduring-2\nduring-3\n");

    // The agent keeps ingesting; records divert to the disk buffer
    let buffer_file = buffer_dir.join("buffer.dat");
    wait_for("records buffered to disk", 10, || {
        buffer_file
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    })
    .await;

    // Recovery: a new server appears on the same address
    let revived = SpecServer::start_at(&addr).await;

    // The agent reconnects on its own and replays the buffer
    {
        let sink = &revived.sink;
        wait_for("replayed records", 15, || {
            let seen = sink.messages();
            ["during-1", "during-2", "during-3"]
                .iter()
                .all(|m| seen.iter().any(|s| s == m))
        })
        .await;
    }

    // Anything written after recovery flows normally again
    append(&log_path, "after-1\n");
    {
        let sink = &revived.sink;
        wait_for("post-recovery record", 10, || {
            sink.messages().iter().any(|s| s == "after-1")
        })
        .await;
    }

    ctx.cancel();
    let _ = agent.await;
    revived.stop().await;
}
