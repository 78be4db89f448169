//! WebSocket head subscription feeding a [`LiveSubscriptionGuard`].
//!
//! [`LiveSubscriptionGuard`]: crate::LiveSubscriptionGuard

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use chainstream_core::Block;

use crate::error::GuardError;
use crate::guard::Subscription;

/// A live head subscription over WebSocket.
///
/// Connects, sends the caller's subscribe request verbatim, and forwards each
/// notification the decoder recognizes into the returned channel. The decoder
/// owns the chain-specific message shape; anything it rejects is skipped. No
/// reconnect happens here — when the task exits the channel closes and the
/// guard's consumer reconnects from its last position.
pub struct WsHeadSubscription {
    close_tx: Option<oneshot::Sender<()>>,
}

impl WsHeadSubscription {
    pub async fn subscribe(
        url: &str,
        subscribe_request: Value,
        decode: fn(&Value) -> Option<Block>,
        channel_capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<Block>), GuardError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| GuardError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let msg = serde_json::to_string(&subscribe_request)
            .map_err(|e| GuardError::Connect(e.to_string()))?;
        sink.send(Message::Text(msg.into()))
            .await
            .map_err(|e| GuardError::Connect(e.to_string()))?;
        tracing::info!(url = %url, "head subscription established");

        let (tx, rx) = mpsc::channel(channel_capacity);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut close_rx => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                    msg = stream.next() => match msg {
                        None => return,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "head subscription receive error");
                            return;
                        }
                        Some(Ok(Message::Text(text))) => {
                            let Ok(value) = serde_json::from_str::<Value>(text.as_ref()) else {
                                tracing::debug!("head subscription message is not JSON");
                                continue;
                            };
                            if let Some(block) = decode(&value) {
                                // Consumer gone; nothing left to feed.
                                if tx.send(block).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) => return,
                        Some(Ok(_)) => {}
                    }
                }
            }
        });

        Ok((Self { close_tx: Some(close_tx) }, rx))
    }
}

impl Subscription for WsHeadSubscription {
    fn cancel(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for WsHeadSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
