//! Order submission over a live loopback socket.
//!
//! The broker here is a real WebSocket endpoint, so frames travel the
//! same reader task they would in production. The scenario that matters:
//! a submission triggered from inside frame dispatch must not stop that
//! same task from delivering the acknowledgement it is waiting on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;

use risefall::config::{ConsensusConfig, RecoveryConfig, RiskConfig};
use risefall::domain::{Side, Trade};
use risefall::engine::consensus::{NearestCentroidClassifier, SignalConsensus};
use risefall::engine::executor::OrderExecutor;
use risefall::engine::positions::PositionManager;
use risefall::engine::risk::RiskManager;
use risefall::error::Result;
use risefall::protocol::{Frame, FrameListener, ProtocolClient};
use risefall::store::{InMemoryLedger, InMemoryTradeStore};

/// One-connection broker: greets with a tick, acknowledges any buy
/// request instantly, ignores everything else.
async fn spawn_broker() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(
            r#"{"msg_type":"tick","tick":{"symbol":"R_100","quote":100.0,"epoch":1}}"#.into(),
        ))
        .await
        .unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                if text.contains("\"buy\":1") {
                    ws.send(Message::Text(
                        r#"{"msg_type":"buy","buy":{"contract_id":901,"balance_after":"99.0"}}"#
                            .into(),
                    ))
                    .await
                    .unwrap();
                }
            }
        }
    });
    format!("ws://{addr}")
}

/// Places one trade from inside frame dispatch, the way the engine's
/// tick listener does.
struct TickSubmitter {
    executor: Arc<OrderExecutor>,
    fired: AtomicBool,
}

#[async_trait]
impl FrameListener for TickSubmitter {
    async fn on_frame(&self, frame: &Frame) -> Result<()> {
        if frame.tick.is_some() && !self.fired.swap(true, Ordering::SeqCst) {
            self.executor
                .place_trade(Trade::new("R_100", Side::Rise, dec!(1), 5, "t"), None, Vec::new())
                .await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn submission_from_reader_context_does_not_stall_dispatch() {
    let url = spawn_broker().await;
    let client = ProtocolClient::new(url);
    let positions = Arc::new(PositionManager::new());
    let risk = Arc::new(RiskManager::new(
        RiskConfig::default(),
        RecoveryConfig::default(),
        dec!(1),
    ));
    risk.start_session(dec!(100));
    let consensus = Arc::new(SignalConsensus::new(
        ConsensusConfig::default(),
        Box::new(NearestCentroidClassifier::new()),
    ));
    let executor = Arc::new(OrderExecutor::new(
        client.clone(),
        positions.clone(),
        risk,
        consensus,
        Arc::new(InMemoryTradeStore::new()),
        Arc::new(InMemoryLedger::new()),
        "USD",
    ));
    client.add_listener(executor.clone() as Arc<dyn FrameListener>);
    client.add_listener(Arc::new(TickSubmitter {
        executor: executor.clone(),
        fired: AtomicBool::new(false),
    }));
    client.connect().await.unwrap();

    // The greeting tick triggers the submission on the reader task; the
    // acknowledgement arrives on that same task moments later.
    let mut opened = false;
    for _ in 0..50 {
        if positions.get_open_count() == 1 {
            opened = true;
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    assert!(opened, "buy acknowledgement never opened a position");
    assert_eq!(executor.pending_count(), 0);
    client.close().await;
}
