//! Admission control and protocol limits, exercised over real TCP.

use crate::prelude::*;
use shiplog_core::{AgentId, LogRecord};
use shiplog_proto::{
    read_frame, write_frame, AgentInfo, ClientFrame, LogBatch, ProtocolError, RegisterResponse,
    ServerFrame,
};
use std::time::Duration;
use tokio::net::TcpStream;

async fn register(addr: &str, name: &str) -> (TcpStream, RegisterResponse) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let agent = AgentInfo {
        name: name.to_string(),
        ..AgentInfo::default()
    };
    write_frame(&mut stream, &ClientFrame::Register { agent })
        .await
        .expect("send register");
    let frame: ServerFrame = read_frame(&mut stream).await.expect("read response");
    match frame {
        ServerFrame::Registered(response) => (stream, response),
        other => panic!("expected Registered, got {other:?}"),
    }
}

#[tokio::test]
async fn registration_flood_is_limited_to_the_burst() {
    let server = SpecServer::start().await;

    let mut accepted = 0u32;
    let mut denied = 0u32;
    for i in 0..100 {
        let (_stream, response) = register(&server.addr, &format!("flood-{i}")).await;
        if response.success {
            accepted += 1;
        } else {
            assert_eq!(
                response.error_message.as_deref(),
                Some("registration rate limit exceeded")
            );
            denied += 1;
        }
    }

    // At least the burst gets through; the flood beyond it is denied
    assert!(accepted >= 50, "accepted only {accepted}");
    assert!(denied > 0, "nothing was denied");

    // The bucket refills and the server keeps accepting
    tokio::time::sleep(Duration::from_millis(400)).await;
    let (_stream, response) = register(&server.addr, "straggler").await;
    assert!(response.success);

    server.stop().await;
}

#[tokio::test]
async fn oversized_batch_rejects_the_stream_but_not_the_agent() {
    let server = SpecServer::start().await;

    let (mut stream, response) = register(&server.addr, "bulk").await;
    assert!(response.success);
    let agent_id: AgentId = response.agent_id;

    let batch = LogBatch {
        agent_id: agent_id.clone(),
        sequence: 1,
        entries: (0..101)
            .map(|i| LogRecord::from_message(format!("m{i}")))
            .collect(),
    };
    write_frame(&mut stream, &ClientFrame::Batch(batch))
        .await
        .expect("send oversized batch");

    match read_frame::<_, ServerFrame>(&mut stream).await.expect("ack") {
        ServerFrame::BatchAck(ack) => {
            assert_eq!(ack.error.as_deref(), Some("batch exceeds maximum size"));
        }
        other => panic!("expected error ack, got {other:?}"),
    }

    // The stream is closed...
    let err = read_frame::<_, ServerFrame>(&mut stream).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
    assert!(server.sink.records().is_empty());

    // ...but a new one opens fine and a legal batch is accepted
    let (mut stream, response) = register(&server.addr, "bulk").await;
    assert!(response.success);
    let batch = LogBatch {
        agent_id: response.agent_id,
        sequence: 1,
        entries: vec![LogRecord::from_message("legal")],
    };
    write_frame(&mut stream, &ClientFrame::Batch(batch))
        .await
        .expect("send legal batch");
    match read_frame::<_, ServerFrame>(&mut stream).await.expect("ack") {
        ServerFrame::BatchAck(ack) => assert!(ack.error.is_none()),
        other => panic!("expected ack, got {other:?}"),
    }
    assert_eq!(server.sink.messages(), vec!["legal"]);

    server.stop().await;
}
