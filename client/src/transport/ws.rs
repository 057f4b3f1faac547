//! WebSocket channel against the marksync hub.
//!
//! Each subscription gets its own socket so that a drop on one topic never
//! takes the other down silently; the pump task reports the drop as a
//! [`LinkEvent::Dropped`] and ends the event stream.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use marksync_engine::{ClientMessage, Notification, OwnerId, ServerMessage, Topic};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::channel::{Channel, LinkEvent, Subscription, SubscriptionId};
use crate::error::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
struct WsLink {
    topic: Topic,
    outgoing: mpsc::UnboundedSender<ClientMessage>,
}

/// Pub-sub channel over WebSocket.
#[derive(Debug)]
pub struct WsChannel {
    url: String,
    owner_id: OwnerId,
    links: DashMap<SubscriptionId, WsLink>,
    next_id: AtomicU64,
}

impl WsChannel {
    /// Create a channel for `owner_id` against the hub at `url`.
    pub fn new(url: impl Into<String>, owner_id: impl Into<OwnerId>) -> Self {
        Self {
            url: url.into(),
            owner_id: owner_id.into(),
            links: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn connect(&self) -> Result<WsStream> {
        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.owner_id))
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) = connect_async(request).await?;
        Ok(stream)
    }
}

fn encode(message: &ClientMessage) -> Result<Message> {
    Ok(Message::Text(serde_json::to_string(message)?.into()))
}

/// Wait for the hub to confirm the subscription.
async fn await_subscribed(read: &mut SplitStream<WsStream>, topic: &Topic) -> Result<()> {
    while let Some(frame) = read.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text)? {
                ServerMessage::Subscribed { topic: confirmed } if &confirmed == topic => {
                    return Ok(())
                }
                ServerMessage::Error { message, .. } => return Err(ClientError::Rejected(message)),
                _ => {}
            },
            Message::Close(_) => return Err(ClientError::ConnectionClosed),
            _ => {}
        }
    }
    Err(ClientError::ConnectionClosed)
}

/// Pump one socket until it drops or is released.
async fn run_link(
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    mut outgoing: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedSender<LinkEvent>,
    topic: Topic,
) {
    let reason = loop {
        tokio::select! {
            message = outgoing.recv() => match message {
                Some(message) => {
                    let frame = match encode(&message) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!("Failed to serialize WebSocket message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(frame).await {
                        break e.to_string();
                    }
                }
                None => {
                    // Released locally.
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::Notification { notification, .. }) => {
                            if events.send(LinkEvent::Message(notification)).is_err() {
                                let _ = write.send(Message::Close(None)).await;
                                return;
                            }
                        }
                        Ok(ServerMessage::Error { message, .. }) => {
                            tracing::warn!(topic = %topic, "Hub reported error: {}", message);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(topic = %topic, "Failed to parse hub message: {}", e);
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        break e.to_string();
                    }
                }
                Some(Ok(Message::Close(_))) => break "closed by hub".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            }
        }
    };

    tracing::info!(topic = %topic, reason = %reason, "WebSocket link dropped");
    let _ = events.send(LinkEvent::Dropped { reason });
}

#[async_trait]
impl Channel for WsChannel {
    async fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        let stream = self.connect().await?;
        let (mut write, mut read) = stream.split();

        write
            .send(encode(&ClientMessage::Subscribe {
                topic: topic.clone(),
            })?)
            .await?;
        await_subscribed(&mut read, &topic).await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_link(write, read, outgoing_rx, events_tx, topic.clone()));
        self.links.insert(
            id,
            WsLink {
                topic: topic.clone(),
                outgoing,
            },
        );

        tracing::info!(topic = %topic, subscription = id, "WebSocket subscription active");

        Ok(Subscription { id, topic, events })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if let Some((_, link)) = self.links.remove(&id) {
            // Dropping the sender afterwards closes the socket.
            let _ = link.outgoing.send(ClientMessage::Unsubscribe { topic: link.topic });
            tracing::debug!(subscription = id, "WebSocket subscription released");
        }
        Ok(())
    }

    async fn publish(&self, topic: &Topic, notification: &Notification) -> Result<()> {
        let outgoing = self
            .links
            .iter()
            .find(|entry| &entry.value().topic == topic)
            .map(|entry| entry.value().outgoing.clone())
            .ok_or_else(|| ClientError::NotConnected(topic.clone()))?;

        outgoing
            .send(ClientMessage::Publish {
                topic: topic.clone(),
                notification: notification.clone(),
            })
            .map_err(|_| ClientError::NotConnected(topic.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_link_is_not_connected() {
        let channel = WsChannel::new("ws://127.0.0.1:9/ws", "alice");
        let err = channel
            .publish(&Topic::owner("alice"), &Notification::insert_hint())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected(_)));
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id_is_ok() {
        let channel = WsChannel::new("ws://127.0.0.1:9/ws", "alice");
        channel.unsubscribe(42).await.unwrap();
    }
}
