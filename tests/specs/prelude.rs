//! Shared harness for pipeline specs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shiplog_agent::AgentConfig;
use shiplog_server::{AgentRegistry, LogSink, MemorySink, Server, ServerConfig, ServerStats};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running server plus handles to observe it.
pub struct SpecServer {
    pub addr: String,
    pub sink: Arc<MemorySink>,
    pub registry: Arc<AgentRegistry>,
    pub stats: Arc<ServerStats>,
    ctx: CancellationToken,
    task: JoinHandle<Result<(), shiplog_server::ServerError>>,
}

impl SpecServer {
    /// Start on an ephemeral port.
    pub async fn start() -> Self {
        Self::start_at("127.0.0.1:0").await
    }

    /// Start on a specific address (used to resurrect a server on the
    /// port an agent is retrying).
    pub async fn start_at(listen_addr: &str) -> Self {
        let config = ServerConfig {
            listen_addr: listen_addr.to_string(),
            ..ServerConfig::default()
        };
        let sink = Arc::new(MemorySink::new());
        let server = Server::bind(config, Arc::clone(&sink) as Arc<dyn LogSink>)
            .await
            .expect("server bind");
        let addr = server.local_addr().to_string();
        let registry = server.registry();
        let stats = server.stats();

        let ctx = CancellationToken::new();
        let task = tokio::spawn(server.run(ctx.clone()));

        Self {
            addr,
            sink,
            registry,
            stats,
            ctx,
            task,
        }
    }

    /// Stop and wait until the listener is released.
    pub async fn stop(self) {
        self.ctx.cancel();
        let _ = self.task.await;
    }
}

/// Agent config with test-friendly timings: small batches, fast
/// flushes, fast reconnects.
pub fn agent_config(server_addr: &str, buffer_dir: &Path, log_path: &Path) -> AgentConfig {
    toml::from_str::<AgentConfig>(&format!(
        r#"
server_addr = "{server_addr}"
name = "spec-agent"
buffer_dir = "{}"
batch_size = 5
flush_interval_ms = 40
reconnect_initial_ms = 20
reconnect_max_secs = 1

[[source]]
name = "app"
path = "{}"
parser = "plain"
follow = true

[source.labels]
env = "spec"
"#,
        buffer_dir.display(),
        log_path.display(),
    ))
    .expect("agent config")
}

pub fn append(path: &Path, text: &str) {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open log file");
    file.write_all(text.as_bytes()).expect("append");
    file.sync_all().expect("sync");
}

/// Poll until `check` holds or the deadline passes.
pub async fn wait_for(what: &str, secs: u64, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
