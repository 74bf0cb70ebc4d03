//! The persistent duplex worker connection.
//!
//! Flow:
//! 1. Split the connection into framed read/write halves
//! 2. A reader task forwards decoded worker messages into an mpsc queue
//! 3. The main loop polls the queued stage on a bounded interval and drains
//!    each snapshot: offer, await ack, claim (or abandon on ack timeout)
//! 4. Replies route to the table whenever they arrive, including mid-drain
//! 5. On connection loss: fail every pending entry so no caller hangs

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::FrameCodec;
use crate::bridge::protocol::{OfferMessage, WorkerMessage};
use crate::reply::{Resolution, normalize_reply};
use crate::submission::CommandRun;
use crate::table::PendingRequests;

/// Lifecycle of a channel instance. Draining is entered per snapshot and
/// Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Ready,
    Draining,
    Closed,
}

/// Timing knobs for the drain loop.
///
/// The poll interval must stay well under the ack timeout, and the ack
/// timeout strictly under the caller's submit timeout, so an unresponsive
/// worker is detected before the caller's own budget runs out.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub poll_interval: Duration,
    pub ack_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            ack_timeout: Duration::from_millis(1500),
        }
    }
}

/// The single bidirectional connection to the remote worker.
///
/// Owns no I/O until [`run`] is called with the two halves of a connection;
/// the transport itself (socket accept/connect, reconnection policy) is the
/// collaborator's concern.
///
/// [`run`]: WorkerChannel::run
pub struct WorkerChannel {
    table: Arc<PendingRequests>,
    config: ChannelConfig,
    state_tx: watch::Sender<ChannelState>,
}

impl WorkerChannel {
    pub fn new(table: Arc<PendingRequests>, config: ChannelConfig) -> Self {
        let (state_tx, _rx) = watch::channel(ChannelState::Connecting);
        Self {
            table,
            config,
            state_tx,
        }
    }

    /// Observe state transitions. Subscribe before calling [`run`].
    ///
    /// [`run`]: WorkerChannel::run
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }

    /// Drive the connection until it drops.
    ///
    /// On exit the table has been mass-failed with
    /// [`Resolution::WorkerUnavailable`]; a reconnecting caller builds a fresh
    /// channel instance.
    pub async fn run<R, W>(self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let mut writer = FramedWrite::new(writer, FrameCodec::<OfferMessage>::new());
        let mut reader = FramedRead::new(reader, FrameCodec::<WorkerMessage>::new());

        let (msg_tx, mut msg_rx) = mpsc::channel::<WorkerMessage>(32);
        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(msg) => {
                        if msg_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "worker channel read error");
                        break;
                    }
                }
            }
            tracing::debug!("worker channel reader exiting");
        });

        self.set_state(ChannelState::Ready);

        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let batch = self.table.drain_queued();
                    if batch.is_empty() {
                        continue;
                    }
                    self.set_state(ChannelState::Draining);
                    if !self.drain(&mut writer, &mut msg_rx, batch).await {
                        break;
                    }
                    self.set_state(ChannelState::Ready);
                }

                msg = msg_rx.recv() => match msg {
                    Some(WorkerMessage::Reply { key, payload }) => {
                        self.dispatch_reply(&key, &payload);
                    }
                    Some(WorkerMessage::Ack { key }) => {
                        tracing::warn!(%key, "ack outside a drain cycle, ignoring");
                    }
                    None => {
                        tracing::warn!("worker connection closed");
                        break;
                    }
                }
            }
        }

        self.close();
    }

    /// Offer every submission in the snapshot, then mark the batch end.
    ///
    /// Returns `false` once the connection is gone.
    async fn drain<W>(
        &self,
        writer: &mut FramedWrite<W, FrameCodec<OfferMessage>>,
        msg_rx: &mut mpsc::Receiver<WorkerMessage>,
        batch: Vec<(String, CommandRun)>,
    ) -> bool
    where
        W: AsyncWrite + Unpin,
    {
        for (key, run) in batch {
            if !self.offer(writer, msg_rx, &key, run).await {
                return false;
            }
        }
        if let Err(e) = writer.send(OfferMessage::EndOfBatch).await {
            tracing::error!(error = %e, "failed to send end-of-batch");
            return false;
        }
        true
    }

    /// Send one work offer and wait for the worker's ack within the bounded
    /// timeout.
    ///
    /// Ack: the entry moves to in-progress. Ack timeout: the entry is dropped
    /// from the table entirely (never left dangling in queued) and the
    /// caller's own longer timeout surfaces the failure. Replies arriving
    /// while we wait are dispatched inline. Returns `false` only when the
    /// connection is gone.
    async fn offer<W>(
        &self,
        writer: &mut FramedWrite<W, FrameCodec<OfferMessage>>,
        msg_rx: &mut mpsc::Receiver<WorkerMessage>,
        key: &str,
        run: CommandRun,
    ) -> bool
    where
        W: AsyncWrite + Unpin,
    {
        tracing::debug!(%key, command = %run.command, "offering work");
        let offer = OfferMessage::WorkOffer {
            key: key.to_string(),
            submission: run,
        };
        if let Err(e) = writer.send(offer).await {
            tracing::error!(%key, error = %e, "failed to send work offer");
            return false;
        }

        let deadline = tokio::time::Instant::now() + self.config.ack_timeout;
        loop {
            match tokio::time::timeout_at(deadline, msg_rx.recv()).await {
                Ok(Some(WorkerMessage::Ack { key: acked })) if acked == key => {
                    if !self.table.claim(key) {
                        tracing::debug!(%key, "key left the queue before the ack");
                    }
                    return true;
                }
                Ok(Some(WorkerMessage::Ack { key: acked })) => {
                    tracing::warn!(offered = %key, acked = %acked, "ack for a different key, skipping");
                }
                Ok(Some(WorkerMessage::Reply { key: reply_key, payload })) => {
                    self.dispatch_reply(&reply_key, &payload);
                }
                Ok(None) => {
                    tracing::warn!(%key, "worker connection closed during ack wait");
                    return false;
                }
                Err(_) => {
                    tracing::warn!(
                        %key,
                        timeout = ?self.config.ack_timeout,
                        "worker did not ack in time, abandoning submission"
                    );
                    self.table.remove(key);
                    return true;
                }
            }
        }
    }

    fn dispatch_reply(&self, key: &str, payload: &serde_json::Value) {
        let text = normalize_reply(payload);
        match self.table.resolve_and_remove(key, Resolution::Replied(text)) {
            Ok(()) => tracing::debug!(%key, "reply delivered"),
            Err(_) => tracing::warn!(%key, "reply for unknown key, discarding"),
        }
    }

    fn set_state(&self, state: ChannelState) {
        if *self.state_tx.borrow() != state {
            tracing::debug!(?state, "worker channel state");
            let _ = self.state_tx.send(state);
        }
    }

    fn close(&self) {
        self.set_state(ChannelState::Closed);
        tracing::warn!("worker channel closed, failing all pending requests");
        self.table.fail_all();
    }
}
