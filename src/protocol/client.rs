//! WebSocket broker client.
//!
//! One background reader task owns the read half of the socket and fans
//! every inbound frame out to registered listeners. Writers share a
//! single mutex-guarded sink so concurrent sends never interleave.
//! Transport drops are healed in place: the reader clears authorization,
//! waits briefly and redials under the connection lock.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::messages::{AuthorizeRequest, Frame, OpenContractRequest, TicksRequest};

pub const AUTH_TIMEOUT_SECS: u64 = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Capability for receiving every inbound broker frame.
///
/// Listeners run sequentially on the reader task; a listener error is
/// logged and never stops dispatch to the rest.
#[async_trait]
pub trait FrameListener: Send + Sync {
    async fn on_frame(&self, frame: &Frame) -> Result<()>;
}

struct Inner {
    url: String,
    /// Serializes connects and reconnects.
    conn_lock: tokio::sync::Mutex<()>,
    /// Write half of the socket; `None` while disconnected.
    writer: tokio::sync::Mutex<Option<WsSink>>,
    reader_alive: AtomicBool,
    closed: AtomicBool,
    authorized: AtomicBool,
    auth_notify: Notify,
    balance: parking_lot::Mutex<Option<Decimal>>,
    listeners: parking_lot::RwLock<Vec<(u64, Arc<dyn FrameListener>)>>,
    next_listener_id: AtomicU64,
}

#[derive(Clone)]
pub struct ProtocolClient {
    inner: Arc<Inner>,
}

impl ProtocolClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                conn_lock: tokio::sync::Mutex::new(()),
                writer: tokio::sync::Mutex::new(None),
                reader_alive: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                authorized: AtomicBool::new(false),
                auth_notify: Notify::new(),
                balance: parking_lot::Mutex::new(None),
                listeners: parking_lot::RwLock::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Establish the connection if it is not already up. Safe to call
    /// concurrently; overlapping calls serialize on the connection lock
    /// and the later ones find the socket already live.
    pub async fn connect(&self) -> Result<()> {
        Inner::establish(&self.inner).await
    }

    /// Send the credential frame and wait for the matching authorize
    /// response. A timeout is an answer, not an error.
    pub async fn authorize(&self, token: &str) -> Result<bool> {
        let notified = self.inner.auth_notify.notified();
        self.send(&AuthorizeRequest {
            authorize: token.to_string(),
        })
        .await?;

        if self.inner.authorized.load(Ordering::Acquire) {
            return Ok(true);
        }
        match timeout(Duration::from_secs(AUTH_TIMEOUT_SECS), notified).await {
            Ok(()) => Ok(self.inner.authorized.load(Ordering::Acquire)),
            Err(_) => {
                warn!(timeout_secs = AUTH_TIMEOUT_SECS, "authorization timed out");
                Ok(false)
            }
        }
    }

    /// Serialize and send one frame, connecting first if needed.
    pub async fn send<T: Serialize>(&self, frame: &T) -> Result<()> {
        Inner::establish(&self.inner).await?;
        let text = serde_json::to_string(frame)?;
        let mut writer = self.inner.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => {
                sink.send(Message::Text(text)).await?;
                Ok(())
            }
            None => Err(ProtocolError::Connection("socket is not connected".into()).into()),
        }
    }

    pub async fn subscribe_ticks(&self, symbol: &str) -> Result<()> {
        self.send(&TicksRequest::new(symbol)).await
    }

    pub async fn subscribe_contract(&self, contract_id: &str) -> Result<()> {
        self.send(&OpenContractRequest::subscribe(contract_id)).await
    }

    pub fn add_listener(&self, listener: Arc<dyn FrameListener>) -> u64 {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: u64) {
        self.inner.listeners.write().retain(|(lid, _)| *lid != id);
    }

    pub fn is_authorized(&self) -> bool {
        self.inner.authorized.load(Ordering::Acquire)
    }

    /// Last balance reported by the broker on authorize, buy or sell
    /// frames.
    pub fn balance(&self) -> Option<Decimal> {
        *self.inner.balance.lock()
    }

    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut writer = self.inner.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        self.inner.authorized.store(false, Ordering::Release);
        info!("protocol client closed");
    }

    /// Dispatch one frame as the reader task would. Exposed for the
    /// engine's tests, which feed frames without a live socket.
    #[doc(hidden)]
    pub async fn dispatch(&self, frame: &Frame) {
        Inner::dispatch(&self.inner, frame).await;
    }
}

impl Inner {
    /// Dial the broker and install the write half. Returns the read
    /// half for the caller to drive, or `None` when another task
    /// already holds a live connection.
    async fn dial(inner: &Arc<Inner>) -> Result<Option<WsStream>> {
        let _guard = inner.conn_lock.lock().await;
        {
            let writer = inner.writer.lock().await;
            if writer.is_some() && inner.reader_alive.load(Ordering::Acquire) {
                return Ok(None);
            }
        }

        let (ws, _) = connect_async(&inner.url)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        let (sink, stream) = ws.split();

        *inner.writer.lock().await = Some(sink);
        inner.authorized.store(false, Ordering::Release);
        inner.closed.store(false, Ordering::Release);
        inner.reader_alive.store(true, Ordering::Release);

        info!(url = %inner.url, "connected to broker");
        Ok(Some(stream))
    }

    async fn establish(inner: &Arc<Inner>) -> Result<()> {
        if let Some(stream) = Inner::dial(inner).await? {
            let reader_inner = Arc::clone(inner);
            tokio::spawn(async move {
                Inner::read_loop(reader_inner, stream).await;
            });
        }
        Ok(())
    }

    /// One reader task owns the stream for the life of the client,
    /// redialing in place after a transport drop. Reconnection never
    /// spawns; only `establish` does, so the two never recurse into
    /// each other.
    async fn read_loop(inner: Arc<Inner>, mut stream: WsStream) {
        loop {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => Inner::dispatch(&inner, &frame).await,
                        Err(e) => warn!(error = %e, "unparseable frame from broker"),
                    },
                    Ok(Message::Ping(payload)) => {
                        let mut writer = inner.writer.lock().await;
                        if let Some(sink) = writer.as_mut() {
                            let _ = sink.send(Message::Pong(payload)).await;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("broker closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "transport error, dropping connection");
                        break;
                    }
                }
            }

            inner.reader_alive.store(false, Ordering::Release);
            inner.authorized.store(false, Ordering::Release);
            *inner.writer.lock().await = None;

            loop {
                if inner.closed.load(Ordering::Acquire) {
                    return;
                }
                sleep(RECONNECT_DELAY).await;
                match Inner::dial(&inner).await {
                    Ok(Some(new_stream)) => {
                        info!("reconnected to broker");
                        stream = new_stream;
                        break;
                    }
                    // Another task re-established the connection and a
                    // fresh reader owns it.
                    Ok(None) => return,
                    Err(e) => warn!(error = %e, "reconnect attempt failed"),
                }
            }
        }
    }

    async fn dispatch(inner: &Arc<Inner>, frame: &Frame) {
        // Snapshot so listeners may add/remove during dispatch.
        let snapshot: Vec<(u64, Arc<dyn FrameListener>)> = inner.listeners.read().clone();
        for (id, listener) in snapshot {
            if let Err(e) = listener.on_frame(frame).await {
                error!(listener_id = id, error = %e, "frame listener failed");
            }
        }
        Inner::apply_internal(inner, frame);
    }

    /// Internal bookkeeping applied after listener fan-out: the
    /// authorization flag and the cached balance.
    fn apply_internal(inner: &Arc<Inner>, frame: &Frame) {
        if let Some(auth) = &frame.authorize {
            if frame.error.is_none() {
                if let Some(balance) = auth.balance {
                    *inner.balance.lock() = Some(balance);
                }
                inner.authorized.store(true, Ordering::Release);
                inner.auth_notify.notify_waiters();
                debug!(loginid = ?auth.loginid, "authorized");
            }
        }
        if let Some(buy) = &frame.buy {
            if let Some(balance) = buy.balance_after {
                *inner.balance.lock() = Some(balance);
            }
        }
        if let Some(sell) = &frame.sell {
            if let Some(balance) = sell.balance_after {
                *inner.balance.lock() = Some(balance);
            }
        }
    }
}
