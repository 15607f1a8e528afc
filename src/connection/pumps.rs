//! Per-connection tasks.
//!
//! Each session runs three tasks:
//!
//! - [`inbound_pump`] reads frames, persists the user turn, hands it to the
//!   worker, and enforces the read deadline. It never waits on the worker:
//!   a client whose turn queue is full is evicted.
//! - [`responder_worker`] answers turns one at a time, in order.
//! - [`outbound_pump`] writes queued payloads, pings, and sends the close
//!   frame once the connection is closed.
//!
//! Both pumps end through the shared [`Teardown`].

// Rust guideline compliant 2026-02

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};

use super::frame::InboundFrame;
use super::{Connection, OutboundReceiver, Teardown};
use crate::constants::{PING_PERIOD, PONG_WAIT, WRITE_WAIT};
use crate::pipeline::{ChatPipeline, Turn};
use crate::store::Conversation;
use crate::ws::{WireError, WsMessage, WsReader, WsWriter};

/// Liveness timings of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpSettings {
    /// Read deadline, reset on every received frame.
    pub pong_wait: Duration,
    /// Keepalive ping cadence.
    pub ping_period: Duration,
    /// Deadline for each write.
    pub write_wait: Duration,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            pong_wait: PONG_WAIT,
            ping_period: PING_PERIOD,
            write_wait: WRITE_WAIT,
        }
    }
}

/// Read frames until the peer goes away, the deadline passes, or the
/// sibling pump stops us.
pub async fn inbound_pump(
    mut reader: WsReader,
    conversation: Conversation,
    pipeline: Arc<ChatPipeline>,
    turns: mpsc::Sender<Turn>,
    teardown: Arc<Teardown>,
    pong_wait: Duration,
) {
    let id = teardown.connection().id();

    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = teardown.stopped() => break "stopped".to_string(),
            next = tokio::time::timeout(pong_wait, reader.recv()) => next,
        };

        let message = match next {
            Err(_) => break format!("no frame within {}s", pong_wait.as_secs()),
            Ok(None) => break "stream ended".to_string(),
            Ok(Some(Err(e))) => break e.to_string(),
            Ok(Some(Ok(message))) => message,
        };

        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Close { code, reason } => {
                break format!("peer closed ({code} {reason})");
            }
            WsMessage::Binary(data) => {
                log::debug!("[Conn] {} ignoring {}-byte binary frame", id, data.len());
                continue;
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
        };

        let frame = match InboundFrame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("[Conn] {} dropped frame: {}", id, e);
                continue;
            }
        };

        if frame.is_end() {
            match pipeline.end_session(&conversation, teardown.connection()).await {
                Ok(()) => break "conversation ended by client".to_string(),
                Err(e) => {
                    log::warn!("[Conn] {} could not end conversation {}: {}", id, conversation.id, e);
                    continue;
                }
            }
        }

        let Some(turn) = pipeline.accept_user_turn(&conversation, frame).await else {
            continue;
        };

        match turns.try_send(turn) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!(
                    "[Conn] {} turn queue full, evicting ({})",
                    id,
                    teardown.connection().key()
                );
                break "turn queue full".to_string();
            }
            Err(TrySendError::Closed(_)) => break "responder worker gone".to_string(),
        }
    };

    log::debug!("[Conn] {} inbound pump ended: {}", id, reason);
    teardown.finish().await;
}

/// Answer turns in arrival order until the inbound side hangs up or the
/// connection closes.
pub async fn responder_worker(
    mut turns: mpsc::Receiver<Turn>,
    pipeline: Arc<ChatPipeline>,
    connection: Connection,
) {
    loop {
        let turn = tokio::select! {
            biased;
            _ = connection.closed() => break,
            turn = turns.recv() => match turn {
                Some(turn) => turn,
                None => break,
            },
        };
        pipeline.answer(turn, &connection).await;
    }
    log::debug!("[Conn] {} responder worker ended", connection.id());
}

/// Write queued payloads and keepalives until the connection closes or a
/// write fails.
pub async fn outbound_pump(
    mut writer: WsWriter,
    mut outbound: OutboundReceiver,
    teardown: Arc<Teardown>,
    settings: PumpSettings,
) {
    let connection = teardown.connection().clone();
    let mut ping = tokio::time::interval_at(
        Instant::now() + settings.ping_period,
        settings.ping_period,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            biased;
            _ = connection.closed() => {
                break close_gracefully(&mut writer, &mut outbound, settings.write_wait).await;
            }
            item = outbound.recv() => {
                let Some(payload) = item else { break Ok(()) };
                if let Err(e) = write_batch(&mut writer, &mut outbound, payload, settings.write_wait).await {
                    break Err(e);
                }
            }
            _ = ping.tick() => {
                if let Err(e) = with_deadline(settings.write_wait, writer.send_ping()).await {
                    break Err(e);
                }
            }
        }
    };

    match result {
        Ok(()) => log::debug!("[Conn] {} outbound pump ended", connection.id()),
        Err(e) => log::debug!("[Conn] {} outbound pump ended: {}", connection.id(), e),
    }
    teardown.finish().await;
}

/// Write `first` plus everything already queued, then flush once.
async fn write_batch(
    writer: &mut WsWriter,
    outbound: &mut OutboundReceiver,
    first: String,
    write_wait: Duration,
) -> Result<(), WireError> {
    with_deadline(write_wait, async {
        writer.feed_text(first).await?;
        while let Ok(next) = outbound.try_recv() {
            writer.feed_text(next).await?;
        }
        writer.flush().await
    })
    .await
}

/// Flush what is left in the queue, then send a close frame.
async fn close_gracefully(
    writer: &mut WsWriter,
    outbound: &mut OutboundReceiver,
    write_wait: Duration,
) -> Result<(), WireError> {
    with_deadline(write_wait, async {
        while let Ok(next) = outbound.try_recv() {
            writer.feed_text(next).await?;
        }
        writer.flush().await?;
        writer.send_close().await
    })
    .await
}

async fn with_deadline<F>(write_wait: Duration, write: F) -> Result<(), WireError>
where
    F: std::future::Future<Output = Result<(), WireError>>,
{
    tokio::time::timeout(write_wait, write)
        .await
        .map_err(|_elapsed| WireError::Write(format!("write deadline of {}s exceeded", write_wait.as_secs())))?
}
