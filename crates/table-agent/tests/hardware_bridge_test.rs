//! Device bridge tests against an in-memory device and a local TCP listener.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use round_coordination::{
    ApiError, BetDeadline, Collaborators, OrchestratorConfig, ResultValue, RoundApiClient, RoundId,
    RoundPayload, RoundStart, RoundState, TableHandle, TableId, TableOrchestrator,
};
use table_agent::{Agent, AgentConfig, GameKind, HardwareBridge, LogHealthReporter, TableConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

/// Backend that accepts everything and records deals.
#[derive(Default)]
struct OkApi {
    deals: Mutex<Vec<ResultValue>>,
}

#[async_trait]
impl RoundApiClient for OkApi {
    async fn start(&self, _table: &TableId) -> Result<RoundStart, ApiError> {
        Ok(RoundStart {
            round_id: RoundId::new("rnd-1"),
            bet_deadline: BetDeadline::after(Duration::from_secs(3600)),
        })
    }

    async fn stop_bet_or_deal(&self, _round: &RoundId, payload: &RoundPayload) -> Result<(), ApiError> {
        if let RoundPayload::Deal { result } = payload {
            self.deals.lock().unwrap().push(result.clone());
        }
        Ok(())
    }

    async fn finish(&self, _round: &RoundId) -> Result<(), ApiError> {
        Ok(())
    }

    async fn pause(&self, _table: &TableId, _reason: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn resume(&self, _table: &TableId) -> Result<(), ApiError> {
        Ok(())
    }

    async fn pause_status(&self, _table: &TableId) -> Result<bool, ApiError> {
        Ok(false)
    }
}

fn table_config(device: &str) -> TableConfig {
    TableConfig {
        id: "R-01".into(),
        device: device.into(),
        game: GameKind::Roulette,
        reconnect_ms: 50,
        result_wait_secs: Some(3600),
        notify_bet_stop: None,
        auto_reopen: None,
        auto_recover_after_secs: None,
    }
}

fn spawn_table(api: Arc<OkApi>) -> TableHandle {
    let mut config = OrchestratorConfig::default();
    config.result_wait_secs = 3600;
    let collaborators = Collaborators::new(api, Arc::new(LogHealthReporter));
    let (orchestrator, handle) =
        TableOrchestrator::new(TableId::new("R-01"), config, collaborators);
    orchestrator.spawn();
    handle
}

async fn expect_line(lines: &mut Lines<BufReader<ReadHalf<DuplexStream>>>, expected: &str) {
    let line = timeout(WAIT, lines.next_line())
        .await
        .expect("device read timed out")
        .expect("device read failed");
    assert_eq!(line.as_deref(), Some(expected));
}

#[tokio::test]
async fn test_round_driven_through_device_lines() {
    let api = Arc::new(OkApi::default());
    let handle = spawn_table(Arc::clone(&api));
    let bridge = HardwareBridge::new(handle.clone(), &table_config("unused"));

    let (agent_side, device_side) = tokio::io::duplex(1024);
    let (agent_read, agent_write) = tokio::io::split(agent_side);
    let (device_read, mut device_write) = tokio::io::split(device_side);
    let mut lines = BufReader::new(device_read).lines();

    let cancel = CancellationToken::new();
    let serve_cancel = cancel.clone();
    let serving =
        tokio::spawn(async move { bridge.serve(agent_read, agent_write, &serve_cancel).await });

    expect_line(&mut lines, "IDLE").await;

    handle.open_table().await.unwrap();
    expect_line(&mut lines, "OPEN").await;

    device_write.write_all(b"PING\nBETSTOP\n").await.unwrap();
    expect_line(&mut lines, "CLOSE").await;

    device_write.write_all(b"RESULT 17\n").await.unwrap();
    expect_line(&mut lines, "IDLE").await;

    assert_eq!(handle.state(), RoundState::Closed);
    assert_eq!(
        *api.deals.lock().unwrap(),
        vec![ResultValue::Roulette { number: 17 }]
    );

    cancel.cancel();
    assert!(serving.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_malformed_lines_do_not_stop_the_bridge() {
    let handle = spawn_table(Arc::new(OkApi::default()));
    let bridge = HardwareBridge::new(handle.clone(), &table_config("unused"));

    let (agent_side, device_side) = tokio::io::duplex(1024);
    let (agent_read, agent_write) = tokio::io::split(agent_side);
    let (device_read, mut device_write) = tokio::io::split(device_side);
    let mut lines = BufReader::new(device_read).lines();

    let cancel = CancellationToken::new();
    let serve_cancel = cancel.clone();
    tokio::spawn(async move { bridge.serve(agent_read, agent_write, &serve_cancel).await });

    expect_line(&mut lines, "IDLE").await;
    handle.open_table().await.unwrap();
    expect_line(&mut lines, "OPEN").await;

    device_write
        .write_all(b"SPIN 4\nRESULT 99\nFAULT E7\n")
        .await
        .unwrap();
    expect_line(&mut lines, "IDLE").await;
    assert_eq!(handle.state(), RoundState::Error);

    cancel.cancel();
}

#[tokio::test]
async fn test_device_eof_ends_connection() {
    let handle = spawn_table(Arc::new(OkApi::default()));
    let bridge = HardwareBridge::new(handle, &table_config("unused"));

    let (agent_side, device_side) = tokio::io::duplex(1024);
    let (agent_read, agent_write) = tokio::io::split(agent_side);
    drop(device_side);

    let cancel = CancellationToken::new();
    let result = timeout(WAIT, bridge.serve(agent_read, agent_write, &cancel))
        .await
        .expect("serve did not return");
    // Writing the initial lamp command may already fail on a dropped peer.
    match result {
        Ok(()) => {}
        Err(e) => assert!(e.to_string().contains("i/o"), "unexpected {e}"),
    }
}

#[tokio::test]
async fn test_bridge_connects_and_reconnects_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let handle = spawn_table(Arc::new(OkApi::default()));
    let bridge = HardwareBridge::new(handle, &table_config(&address));
    let cancel = CancellationToken::new();
    let running = tokio::spawn(bridge.run(cancel.clone()));

    for _ in 0..2 {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut lines = BufReader::new(stream).lines();
        let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap();
        assert_eq!(line.as_deref(), Some("IDLE"));
        // Dropping the stream makes the bridge reconnect.
    }

    cancel.cancel();
    timeout(WAIT, running).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_agent_runs_tables_and_shuts_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let mut config = AgentConfig::default();
    config.tables.push(table_config(&address));
    config.validate().unwrap();

    let agent = Agent::start(
        &config,
        Arc::new(OkApi::default()),
        Arc::new(LogHealthReporter),
    );
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut lines = BufReader::new(stream).lines();
    let first = timeout(WAIT, lines.next_line()).await.unwrap().unwrap();
    assert_eq!(first.as_deref(), Some("IDLE"));

    agent.open_all().await.unwrap();
    let opened = timeout(WAIT, lines.next_line()).await.unwrap().unwrap();
    assert_eq!(opened.as_deref(), Some("OPEN"));
    let handle = agent.handles().next().unwrap().clone();
    assert_eq!(handle.state(), RoundState::Betting);

    timeout(WAIT, agent.shutdown()).await.unwrap();
    assert_eq!(handle.state(), RoundState::Closed);
}
