//! Client transport, broadcaster and pipeline lifecycle over a real socket

use presence_audio::stream_buffer;
use presence_core::{PresenceConfig, SessionState};
use presence_session::{
    run_client, ClientExit, EventRouter, PresenceBroadcaster, PresenceError, PresencePipeline,
    RenderFeed, SessionMachine,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::watch;

async fn wait_for_clients(broadcaster: &PresenceBroadcaster, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while broadcaster.client_count() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client never subscribed");
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_client_routes_broadcast_events() {
    let broadcaster = PresenceBroadcaster::new(64);
    let server = broadcaster.bind("127.0.0.1:0").await.unwrap();

    let (producer, mut consumer) = stream_buffer();
    let session = Arc::new(SessionMachine::new());
    let router = Arc::new(EventRouter::new(Arc::clone(&session), producer, RenderFeed::default()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let url = server.url();
    let client = tokio::spawn(run_client_owned(url, Arc::clone(&router), shutdown_rx));
    wait_for_clients(&broadcaster, 1).await;

    broadcaster.tts_begin(24_000, "u1").unwrap();
    broadcaster.tts_chunk("u1", 0.0, &[0.5, 0.5]).unwrap();
    broadcaster.tts_chunk("u1", 1.0, &[0.25]).unwrap();
    broadcaster.tts_end("u1").unwrap();

    let stats = router.buffer_stats();
    wait_until(|| router.routed() >= 4).await;
    assert_eq!(stats.queued_samples(), 3);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(consumer.drain(4), vec![0.5, 0.5, 0.25, 0.0]);

    shutdown_tx.send(true).unwrap();
    let exit = client.await.unwrap().unwrap();
    assert_eq!(exit, ClientExit::Shutdown);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_shutdown_ends_client() {
    let broadcaster = PresenceBroadcaster::new(8);
    let server = broadcaster.bind("127.0.0.1:0").await.unwrap();

    let (producer, _consumer) = stream_buffer();
    let router = Arc::new(EventRouter::new(
        Arc::new(SessionMachine::new()),
        producer,
        RenderFeed::default(),
    ));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let client = tokio::spawn(run_client_owned(server.url(), router, shutdown_rx));
    wait_for_clients(&broadcaster, 1).await;

    server.shutdown().await.unwrap();
    let exit = tokio::time::timeout(Duration::from_secs(5), client)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(exit, Ok(ClientExit::ClosedByServer) | Err(PresenceError::Network(_))));
}

#[tokio::test]
async fn test_connect_failure_is_network_error() {
    // Grab a free port, then release it so nothing is listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (producer, _consumer) = stream_buffer();
    let router = Arc::new(EventRouter::new(
        Arc::new(SessionMachine::new()),
        producer,
        RenderFeed::default(),
    ));
    let (_tx, rx) = watch::channel(false);
    let result = run_client(&format!("ws://{}/", addr), router, rx).await;
    assert!(matches!(result, Err(PresenceError::Network(_))));
}

#[tokio::test]
async fn test_headless_pipeline_lifecycle() {
    let broadcaster = PresenceBroadcaster::new(64);
    let server = broadcaster.bind("127.0.0.1:0").await.unwrap();

    let mut config = PresenceConfig::default();
    config.connection.url = server.url();
    config.playback.headless = true;

    let pipeline = PresencePipeline::start(config).unwrap();
    wait_for_clients(&broadcaster, 1).await;

    broadcaster.state(SessionState::Thinking).unwrap();
    broadcaster.tts_begin(24_000, "demo").unwrap();
    broadcaster.tts_chunk("demo", 0.0, &vec![0.3; 480]).unwrap();

    let session = Arc::clone(pipeline.session());
    wait_until(|| session.state() == SessionState::Speaking).await;

    // The headless clock drains the queue on its own
    let stats = pipeline.buffer_stats();
    wait_until(|| stats.queued_samples() == 0 && stats.frames() > 0).await;
    // Played chunks are released on the sampler tick without another push
    wait_until(|| stats.spent_samples() == 0).await;

    let mut frames = pipeline.frames();
    frames.borrow_and_update();
    frames.changed().await.unwrap();
    assert_eq!(frames.borrow().state, SessionState::Speaking);

    let exit = pipeline.shutdown().await.unwrap();
    assert_eq!(exit, ClientExit::Shutdown);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_aborts_client_stuck_in_handshake() {
    // Accepts TCP but never answers the WebSocket upgrade
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = PresenceConfig::default();
    config.connection.url = format!("ws://{}/", addr);
    config.playback.headless = true;

    let pipeline = PresencePipeline::start(config).unwrap();
    let (mut socket, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();

    let exit = tokio::time::timeout(Duration::from_secs(8), pipeline.shutdown())
        .await
        .expect("shutdown hung")
        .unwrap();
    assert_eq!(exit, ClientExit::Shutdown);

    // The aborted client drops its half of the connection right away
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        let mut buf = [0u8; 1024];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "client task kept the connection open");
}

#[tokio::test]
async fn test_pipeline_rejects_invalid_config() {
    let mut config = PresenceConfig::default();
    config.connection.url = "http://localhost:1".to_string();
    config.playback.headless = true;
    assert!(matches!(PresencePipeline::start(config), Err(PresenceError::Config(_))));
}

async fn run_client_owned(
    url: String,
    router: Arc<EventRouter>,
    shutdown: watch::Receiver<bool>,
) -> Result<ClientExit, PresenceError> {
    run_client(&url, router, shutdown).await
}
