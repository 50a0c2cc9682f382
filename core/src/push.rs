//! Kitchen push channel: one authenticated WebSocket subscription feeding an
//! [`OrderFeed`].

use crate::error::FeedError;
use crate::feed::{FeedCommand, FeedEvent, FeedStatus, OrderFeed};
use crate::order::{OrderStatus, RecordId};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

enum Outbound {
    Command(FeedCommand),
    Flush(oneshot::Sender<()>),
}

/// Tracks which subscription currently owns the shared feed. A reader whose
/// generation has been superseded can no longer publish into it.
#[derive(Clone, Default)]
struct Generation(Arc<Mutex<u64>>);

impl Generation {
    fn advance(&self) -> u64 {
        let mut current = self.0.lock();
        *current += 1;
        *current
    }

    /// Runs `update` while holding the generation, only if `generation` is
    /// still the current one.
    fn publish(&self, generation: u64, update: impl FnOnce()) -> bool {
        let current = self.0.lock();
        if *current != generation {
            return false;
        }
        update();
        true
    }
}

/// Handle to a live subscription. Dropping it stops both socket tasks.
struct Subscription {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    commands: UnboundedSender<Outbound>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Owns at most one push subscription for a consumer such as the kitchen board.
pub struct LiveOrderFeed {
    url: Url,
    feed: OrderFeed,
    generation: Generation,
    subscription: Option<Subscription>,
}

impl LiveOrderFeed {
    pub fn new(url: Url, feed: OrderFeed) -> Self {
        Self {
            url,
            feed,
            generation: Generation::default(),
            subscription: None,
        }
    }

    pub fn feed(&self) -> &OrderFeed {
        &self.feed
    }

    /// True while a subscription is open and its connection has not been lost.
    pub fn is_connected(&self) -> bool {
        self.live_subscription().is_some()
    }

    /// Replaces any current subscription with one authenticated by `credential`.
    /// Without a credential nothing is opened and no error is reported.
    pub async fn connect(&mut self, credential: Option<&str>) -> Result<(), FeedError> {
        self.disconnect();
        let Some(token) = credential else {
            debug!("no credential held, kitchen feed stays idle");
            self.feed.set_status(FeedStatus::Idle);
            return Ok(());
        };

        let generation = self.generation.advance();
        self.feed.set_status(FeedStatus::Connecting);
        let opened = open_subscription(
            &self.url,
            token,
            self.feed.clone(),
            self.generation.clone(),
            generation,
        )
        .await;
        match opened {
            Ok(subscription) => {
                info!(url = %self.url, generation, "kitchen feed connected");
                self.subscription = Some(subscription);
                Ok(())
            }
            Err(err) => {
                error!(url = %self.url, %err, "kitchen feed connection failed");
                self.feed.set_status(FeedStatus::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.generation.advance();
            drop(subscription);
            info!("kitchen feed disconnected");
            self.feed.set_status(FeedStatus::Closed);
        }
    }

    /// Asks the server to move an order. Local columns change only when the
    /// server echoes the update back.
    pub fn request_status_change(
        &self,
        order_id: RecordId,
        status: OrderStatus,
    ) -> Result<(), FeedError> {
        let subscription = self.live_subscription().ok_or(FeedError::NotConnected)?;
        debug!(%order_id, %status, "requesting status change");
        subscription
            .commands
            .send(Outbound::Command(FeedCommand::StatusChange { order_id, status }))
            .map_err(|_| FeedError::NotConnected)
    }

    /// Resolves once every status change requested so far has been written to
    /// the socket.
    pub async fn flush(&self) -> Result<(), FeedError> {
        let subscription = self.live_subscription().ok_or(FeedError::NotConnected)?;
        let (ack, written) = oneshot::channel();
        subscription
            .commands
            .send(Outbound::Flush(ack))
            .map_err(|_| FeedError::NotConnected)?;
        written.await.map_err(|_| FeedError::NotConnected)
    }

    fn live_subscription(&self) -> Option<&Subscription> {
        self.subscription
            .as_ref()
            .filter(|subscription| !subscription.commands.is_closed())
            .filter(|_| self.feed.status() == FeedStatus::Live)
    }
}

impl Drop for LiveOrderFeed {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn open_subscription(
    url: &Url,
    token: &str,
    feed: OrderFeed,
    owner: Generation,
    generation: u64,
) -> Result<Subscription, FeedError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|err| FeedError::Connect(err.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|err| FeedError::Connect(format!("invalid credential: {err}")))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (stream, _) = connect_async(request)
        .await
        .map_err(|err| FeedError::Connect(err.to_string()))?;
    let (mut sink, mut source) = stream.split();
    // Must precede the reader, which may record a failure right away.
    feed.set_status(FeedStatus::Live);

    // Dropped when the reader ends, which stops the writer too.
    let (reader_alive, mut reader_gone) = oneshot::channel::<()>();
    let reader = tokio::spawn(async move {
        let _alive = reader_alive;
        let reason = loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => match decode_event(text.as_str()) {
                    Ok(event) => {
                        if !owner.publish(generation, || feed.apply(event)) {
                            return;
                        }
                    }
                    Err(err) => warn!(%err, "ignoring malformed kitchen event"),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| format!("closed by server: {}", f.reason.as_str()))
                        .unwrap_or_else(|| "closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break err.to_string(),
                None => break "connection dropped".to_string(),
            }
        };
        if owner.publish(generation, || feed.set_status(FeedStatus::Failed(reason.clone()))) {
            warn!(%reason, "kitchen feed lost");
        } else {
            debug!(%reason, generation, "superseded kitchen subscription ended");
        }
    });

    let (commands, mut outbound) = unbounded_channel::<Outbound>();
    let writer = tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                next = outbound.recv() => next,
                _ = &mut reader_gone => None,
            };
            match next {
                Some(Outbound::Command(command)) => {
                    let text = match serde_json::to_string(&command) {
                        Ok(text) => text,
                        Err(err) => {
                            error!(%err, "failed to encode kitchen command");
                            continue;
                        }
                    };
                    if let Err(err) = sink.send(Message::text(text)).await {
                        warn!(%err, "failed to send kitchen command");
                        break;
                    }
                }
                Some(Outbound::Flush(ack)) => {
                    if let Err(err) = sink.flush().await {
                        warn!(%err, "failed to flush kitchen commands");
                        break;
                    }
                    ack.send(()).ok();
                }
                None => break,
            }
        }
    });

    Ok(Subscription {
        reader,
        writer,
        commands,
    })
}

pub(crate) fn decode_event(text: &str) -> Result<FeedEvent, serde_json::Error> {
    serde_json::from_str(text)
}
