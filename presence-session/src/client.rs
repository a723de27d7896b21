//! WebSocket client transport feeding the event router

use crate::error::PresenceError;
use crate::router::EventRouter;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How the client loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// Local shutdown was requested
    Shutdown,
    /// The server closed the channel
    ClosedByServer,
}

/// Validate a presence server URL
pub fn parse_server_url(url: &str) -> Result<Url, PresenceError> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(PresenceError::Config(format!(
            "Unsupported URL scheme '{}', expected ws or wss",
            other
        ))),
    }
}

/// Connect to `url` and route every text message until the server closes the
/// channel or `shutdown` flips to true. No reconnection is attempted; a
/// connect or receive failure is returned to the caller.
pub async fn run_client(
    url: &str,
    router: Arc<EventRouter>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ClientExit, PresenceError> {
    let url = parse_server_url(url)?;
    if *shutdown.borrow() {
        return Ok(ClientExit::Shutdown);
    }

    let (mut ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
        .await
        .map_err(|_| PresenceError::Network(format!("Connection to {} timed out", url)))?
        .map_err(|e| PresenceError::Network(format!("Failed to connect to {}: {}", url, e)))?;

    info!(url = %url, "Connected to presence server");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    match tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await {
                        Ok(Ok(())) => debug!("WebSocket closed"),
                        Ok(Err(e)) => warn!("WebSocket close error: {}", e),
                        Err(_) => warn!("WebSocket close timed out"),
                    }
                    info!("Client shut down");
                    return Ok(ClientExit::Shutdown);
                }
            }
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    router.handle_text(&text);
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Server closed the channel");
                    return Ok(ClientExit::ClosedByServer);
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!(bytes = data.len(), "Ignoring binary message");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(PresenceError::Network(format!("WebSocket receive failed: {}", e)));
                }
                None => {
                    info!("Server channel ended");
                    return Ok(ClientExit::ClosedByServer);
                }
            }
        }
    }
}
