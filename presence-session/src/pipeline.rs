//! Pipeline lifecycle: wiring, start and teardown

use crate::client::{run_client, ClientExit};
use crate::error::PresenceError;
use crate::presence::{PresenceFrame, PresenceSampler};
use crate::render_feed::RenderFeed;
use crate::router::EventRouter;
use crate::session::SessionMachine;
use presence_audio::{start_output, stream_buffer, IntensityExtractor, PlaybackHandle, Renderer, StreamStats};
use presence_core::PresenceConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const RENDER_FEED_CAPACITY: usize = 256;
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A running client pipeline: network channel, router, stream buffer,
/// render clock and presence sampler.
pub struct PresencePipeline {
    session: Arc<SessionMachine>,
    router: Arc<EventRouter>,
    extractor: Arc<IntensityExtractor>,
    feed: RenderFeed,
    frames: watch::Receiver<PresenceFrame>,
    shutdown_tx: watch::Sender<bool>,
    playback: Option<PlaybackHandle>,
    client: Option<JoinHandle<Result<ClientExit, PresenceError>>>,
    client_result: Option<Result<ClientExit, PresenceError>>,
    sampler: Option<JoinHandle<()>>,
}

impl PresencePipeline {
    /// Validate `config`, start playback and connect. Must be called from
    /// within a tokio runtime.
    pub fn start(config: PresenceConfig) -> Result<Self, PresenceError> {
        config
            .validate()
            .map_err(|e| PresenceError::Config(e.to_string()))?;

        let (producer, consumer) = stream_buffer();
        let extractor = Arc::new(IntensityExtractor::new(
            config.intensity.window_size,
            config.intensity.gain,
        ));
        let session = Arc::new(SessionMachine::new());
        let feed = RenderFeed::new(RENDER_FEED_CAPACITY);

        let router = Arc::new(
            EventRouter::new(Arc::clone(&session), producer, feed.clone())
                .with_policy(config.session.utterance_policy)
                .with_max_message_bytes(config.connection.max_message_bytes),
        );

        let renderer = Renderer::new(consumer, Arc::clone(&extractor));
        let playback = start_output(&config.playback, renderer)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sampler = PresenceSampler::new(&config.intensity, Arc::clone(&router), Arc::clone(&extractor));
        let (frames, sampler) = sampler.spawn(shutdown_rx.clone());

        let url = config.connection.url.clone();
        let client_router = Arc::clone(&router);
        let client = tokio::spawn(async move { run_client(&url, client_router, shutdown_rx).await });

        info!(
            url = %config.connection.url,
            output = ?playback.kind(),
            policy = ?config.session.utterance_policy,
            "Presence pipeline started"
        );

        Ok(Self {
            session,
            router,
            extractor,
            feed,
            frames,
            shutdown_tx,
            playback: Some(playback),
            client: Some(client),
            client_result: None,
            sampler: Some(sampler),
        })
    }

    pub fn session(&self) -> &Arc<SessionMachine> {
        &self.session
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn extractor(&self) -> &Arc<IntensityExtractor> {
        &self.extractor
    }

    pub fn feed(&self) -> &RenderFeed {
        &self.feed
    }

    /// Latest presence frame, updated once per display tick
    pub fn frames(&self) -> watch::Receiver<PresenceFrame> {
        self.frames.clone()
    }

    pub fn buffer_stats(&self) -> StreamStats {
        self.router.buffer_stats()
    }

    /// Wait until the network channel ends on its own
    pub async fn closed(&mut self) -> &Result<ClientExit, PresenceError> {
        if let Some(handle) = self.client.take() {
            let result = handle
                .await
                .unwrap_or_else(|e| Err(PresenceError::Network(format!("Client task failed: {}", e))));
            self.client_result = Some(result);
        }
        self.client_result.get_or_insert(Ok(ClientExit::Shutdown))
    }

    /// Close the network channel, stop the render clock and the sampler, and
    /// release the queue. Queued audio is discarded. Returns how the client
    /// ended, including any network error it hit before shutdown.
    pub async fn shutdown(mut self) -> Result<ClientExit, PresenceError> {
        let _ = self.shutdown_tx.send(true);

        if let Some(mut handle) = self.client.take() {
            let result = match tokio::time::timeout(TASK_STOP_TIMEOUT, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(PresenceError::Network(format!("Client task failed: {}", e))),
                Err(_) => {
                    warn!("Client did not stop in time, aborting");
                    handle.abort();
                    Ok(ClientExit::Shutdown)
                }
            };
            self.client_result = Some(result);
        }

        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }

        if let Some(mut sampler) = self.sampler.take() {
            if tokio::time::timeout(TASK_STOP_TIMEOUT, &mut sampler).await.is_err() {
                warn!("Presence sampler did not stop in time, aborting");
                sampler.abort();
            }
        }

        info!("Presence pipeline stopped");
        self.client_result.take().unwrap_or(Ok(ClientExit::Shutdown))
    }
}

impl Drop for PresencePipeline {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
