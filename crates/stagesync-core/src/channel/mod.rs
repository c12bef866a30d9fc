//! Real-time multi-client propagation channel.
//!
//! One supervisor task per connected event owns the connection: it pumps
//! inbound frames to subscribers, sends heartbeats, declares the link dead
//! when nothing arrives for `heartbeat_timeout`, and reconnects with backoff
//! after an abnormal close. Once `max_reconnect_attempts` is used up it
//! switches to fallback polling and only emits [`ChannelEvent::FallbackPoll`]
//! ticks until [`RealtimeChannel::reset_fallback`] is called.

pub mod transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::metrics::{Metric, SyncMetrics};
use crate::models::{MessageKind, StatusRecord, SyncMessage};
use crate::state::ChannelState;
use crate::util::compact_text;

pub use transport::{
    ChannelError, Connection, Frame, MemoryHub, Transport, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};

/// What subscribers of the channel hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { code: u16 },
    /// A status change published by another client
    StatusUpdate(StatusRecord),
    /// A full snapshot that overwrites the receiver's cache entries
    BulkSync(Vec<StatusRecord>),
    /// The channel is down for good; re-read state from the store
    FallbackPoll,
    Latency(Duration),
}

struct ChannelInner {
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    client_id: String,
    metrics: Arc<SyncMetrics>,
    state: watch::Sender<ChannelState>,
    events: broadcast::Sender<ChannelEvent>,
    outbound: StdMutex<Option<mpsc::Sender<Frame>>>,
    latency_ms: AtomicU64,
    resume: Notify,
}

struct Session {
    event_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum SessionEnd {
    Cancelled,
    Closed(u16),
}

pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
    session: StdMutex<Option<Session>>,
}

impl RealtimeChannel {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ChannelConfig,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self::with_client_id(transport, config, metrics, Uuid::now_v7().to_string())
    }

    pub fn with_client_id(
        transport: Arc<dyn Transport>,
        config: ChannelConfig,
        metrics: Arc<SyncMetrics>,
        client_id: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        let (events, _) = broadcast::channel(config.send_buffer.max(16));
        Self {
            inner: Arc::new(ChannelInner {
                transport,
                config,
                client_id: client_id.into(),
                metrics,
                state,
                events,
                outbound: StdMutex::new(None),
                latency_ms: AtomicU64::new(0),
                resume: Notify::new(),
            }),
            session: StdMutex::new(None),
        }
    }

    /// Sender id stamped on every outgoing message.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Round-trip time of the last answered heartbeat.
    pub fn latency(&self) -> Option<Duration> {
        match self.inner.latency_ms.load(Ordering::Relaxed) {
            0 => None,
            millis => Some(Duration::from_millis(millis)),
        }
    }

    /// Event the channel is currently attached to.
    pub fn event_id(&self) -> Option<String> {
        self.lock_session()
            .as_ref()
            .map(|session| session.event_id.clone())
    }

    /// Attach to `event_id` and keep the connection alive in the background.
    /// An existing session for another event, or one that ended with a
    /// normal close, is torn down first.
    pub async fn connect(&self, event_id: &str) {
        let attached = self
            .lock_session()
            .as_ref()
            .is_some_and(|session| session.event_id == event_id && !session.handle.is_finished());
        if attached {
            return;
        }
        self.disconnect().await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.inner).supervise(
            event_id.to_string(),
            cancel.clone(),
        ));
        *self.lock_session() = Some(Session {
            event_id: event_id.to_string(),
            cancel,
            handle,
        });
    }

    /// Close the connection and stop every background loop. Idempotent.
    pub async fn disconnect(&self) {
        let session = self.lock_session().take();
        let Some(session) = session else {
            return;
        };
        session.cancel.cancel();
        if let Err(error) = session.handle.await {
            tracing::warn!(error = %error, "Channel supervisor ended abnormally");
        }
        self.inner.state.send_replace(ChannelState::Disconnected);
        tracing::info!(event_id = %session.event_id, "Channel disconnected");
    }

    /// Leave fallback polling and start a fresh round of connect attempts.
    pub fn reset_fallback(&self) -> bool {
        if self.state() != ChannelState::FallbackPolling {
            return false;
        }
        self.inner.resume.notify_one();
        true
    }

    /// Fire-and-forget send. Failures are logged and counted, never raised.
    pub fn send(&self, message: &SyncMessage) -> bool {
        self.inner.send(message)
    }

    pub fn broadcast_status(&self, record: &StatusRecord) -> bool {
        let message =
            SyncMessage::status_update(&record.event_id, &self.inner.client_id, record.clone());
        self.send(&message)
    }

    pub fn broadcast_snapshot(&self, event_id: &str, records: Vec<StatusRecord>) -> bool {
        let message = SyncMessage::bulk_sync(event_id, &self.inner.client_id, records);
        self.send(&message)
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.cancel.cancel();
        }
    }
}

impl ChannelInner {
    fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ChannelEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_outbound(&self, sender: Option<mpsc::Sender<Frame>>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = sender;
    }

    fn send(&self, message: &SyncMessage) -> bool {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(error = %error, "Failed to encode channel message");
                self.metrics.record(Metric::MessageDropped);
                return false;
            }
        };
        let sender = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            tracing::debug!(kind = message.kind.label(), "Channel not connected; message dropped");
            self.metrics.record(Metric::MessageDropped);
            return false;
        };
        match sender.try_send(Frame::Text(text)) {
            Ok(()) => {
                self.metrics.record(Metric::MessageSent);
                true
            }
            Err(error) => {
                tracing::warn!(kind = message.kind.label(), error = %error, "Channel send failed");
                self.metrics.record(Metric::MessageDropped);
                false
            }
        }
    }

    async fn supervise(self: Arc<Self>, event_id: String, cancel: CancellationToken) {
        let backoff = self.config.reconnect_backoff();
        let mut attempts: u32 = 0;

        loop {
            self.set_state(if attempts == 0 {
                ChannelState::Connecting
            } else {
                ChannelState::Reconnecting(attempts)
            });

            let connect = tokio::time::timeout(
                self.config.connect_timeout,
                self.transport.connect(&event_id, &self.client_id),
            );
            let outcome = tokio::select! {
                () = cancel.cancelled() => break,
                outcome = connect => outcome,
            };

            match outcome {
                Ok(Ok(connection)) => {
                    attempts = 0;
                    self.set_state(ChannelState::Connected);
                    self.emit(ChannelEvent::Connected);
                    tracing::info!(event_id = %event_id, client_id = %self.client_id, "Channel connected");

                    let end = self.pump(connection, &event_id, &cancel).await;
                    self.set_outbound(None);
                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Closed(code) => {
                            self.emit(ChannelEvent::Disconnected { code });
                            if code == NORMAL_CLOSURE {
                                tracing::info!(event_id = %event_id, "Channel closed normally");
                                self.set_state(ChannelState::Disconnected);
                                return;
                            }
                            tracing::warn!(event_id = %event_id, code, "Channel closed abnormally");
                        }
                    }
                }
                Ok(Err(error)) => {
                    tracing::warn!(event_id = %event_id, attempt = attempts, error = %error, "Channel connect failed");
                }
                Err(_) => {
                    let error = ChannelError::Timeout(self.config.connect_timeout);
                    tracing::warn!(event_id = %event_id, attempt = attempts, error = %error, "Channel connect failed");
                }
            }

            attempts += 1;
            if attempts > self.config.max_reconnect_attempts {
                tracing::warn!(
                    event_id = %event_id,
                    attempts = attempts - 1,
                    "Reconnect attempts exhausted; switching to fallback polling"
                );
                self.set_state(ChannelState::FallbackPolling);
                if !self.fallback(&cancel).await {
                    break;
                }
                tracing::info!(event_id = %event_id, "Fallback polling reset; reconnecting");
                attempts = 0;
                continue;
            }

            let delay = backoff.delay(attempts);
            self.set_state(ChannelState::Reconnecting(attempts));
            tracing::debug!(
                event_id = %event_id,
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling reconnect"
            );
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_outbound(None);
        self.set_state(ChannelState::Disconnected);
    }

    /// Emit poll ticks until reset (true) or cancelled (false).
    async fn fallback(&self, cancel: &CancellationToken) -> bool {
        let period = self.config.fallback_poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = self.resume.notified() => return true,
                _ = ticker.tick() => self.emit(ChannelEvent::FallbackPoll),
            }
        }
    }

    async fn pump(
        &self,
        mut connection: Connection,
        event_id: &str,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        self.set_outbound(Some(connection.outbound.clone()));

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();
        let mut pending_ping: Option<(String, Instant)> = None;

        loop {
            let dead_at = last_seen + self.config.heartbeat_timeout;
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = connection.outbound.try_send(Frame::Close(NORMAL_CLOSURE));
                    return SessionEnd::Cancelled;
                }
                frame = connection.inbound.recv() => match frame {
                    None => return SessionEnd::Closed(ABNORMAL_CLOSURE),
                    Some(Frame::Close(code)) => return SessionEnd::Closed(code),
                    Some(Frame::Text(text)) => {
                        last_seen = Instant::now();
                        self.handle_text(&text, event_id, &mut pending_ping);
                    }
                },
                _ = heartbeat.tick() => {
                    let ping = SyncMessage::ping(event_id, &self.client_id);
                    if let Some(id) = ping.message_id.clone() {
                        pending_ping = Some((id, Instant::now()));
                    }
                    self.send(&ping);
                }
                () = tokio::time::sleep_until(dead_at) => {
                    tracing::warn!(event_id, "No frames within heartbeat timeout; connection is dead");
                    return SessionEnd::Closed(ABNORMAL_CLOSURE);
                }
            }
        }
    }

    fn handle_text(
        &self,
        text: &str,
        event_id: &str,
        pending_ping: &mut Option<(String, Instant)>,
    ) {
        let message = match SyncMessage::parse(text) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(error = %error, frame = %compact_text(text), "Dropping malformed channel frame");
                self.metrics.record(Metric::MessageDropped);
                return;
            }
        };
        if message.event_id != event_id {
            tracing::debug!(event_id = %message.event_id, "Ignoring frame for another event");
            return;
        }
        if message.sender_id == self.client_id {
            return;
        }
        self.metrics.record(Metric::MessageReceived);

        match message.kind {
            MessageKind::StatusUpdate { status, .. } => {
                self.emit(ChannelEvent::StatusUpdate(status));
            }
            MessageKind::BulkSync { statuses } => {
                tracing::debug!(count = statuses.len(), "Received bulk status sync");
                self.emit(ChannelEvent::BulkSync(statuses));
            }
            MessageKind::Ping => {
                let pong = SyncMessage::pong(&message, &self.client_id);
                self.send(&pong);
            }
            MessageKind::Pong => {
                let answered = pending_ping
                    .as_ref()
                    .is_some_and(|(id, _)| message.message_id.as_deref() == Some(id.as_str()));
                if answered {
                    if let Some((_, sent_at)) = pending_ping.take() {
                        let latency = sent_at.elapsed();
                        self.latency_ms.store(
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX).max(1),
                            Ordering::Relaxed,
                        );
                        self.metrics.record_latency(latency);
                        self.emit(ChannelEvent::Latency(latency));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{PerformanceStatus, StatusUpdate};

    fn fast_config() -> ChannelConfig {
        ChannelConfig {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(75),
            connect_timeout: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(2),
            reconnect_max_delay: Duration::from_millis(10),
            reconnect_jitter: Duration::ZERO,
            fallback_poll_interval: Duration::from_millis(20),
            send_buffer: 64,
        }
    }

    fn channel(hub: &MemoryHub, client_id: &str, config: ChannelConfig) -> RealtimeChannel {
        RealtimeChannel::with_client_id(
            Arc::new(hub.clone()),
            config,
            Arc::new(SyncMetrics::default()),
            client_id,
        )
    }

    fn record(artist: &str) -> StatusRecord {
        StatusRecord::from_update(
            artist,
            &StatusUpdate::status(PerformanceStatus::CurrentlyOnStage).with_event("e1"),
        )
        .unwrap()
    }

    async fn wait_for_state(channel: &RealtimeChannel, wanted: ChannelState) {
        let mut states = channel.subscribe_state();
        tokio::time::timeout(Duration::from_secs(5), states.wait_for(|state| *state == wanted))
            .await
            .unwrap()
            .unwrap();
    }

    async fn next_event(
        events: &mut broadcast::Receiver<ChannelEvent>,
        matches: impl Fn(&ChannelEvent) -> bool,
    ) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn status_updates_reach_other_clients_but_not_the_sender() {
        let hub = MemoryHub::new();
        let sender = channel(&hub, "stage-manager", fast_config());
        let viewer = channel(&hub, "live-board", fast_config());
        let mut sender_events = sender.subscribe();
        let mut viewer_events = viewer.subscribe();

        sender.connect("e1").await;
        viewer.connect("e1").await;
        wait_for_state(&sender, ChannelState::Connected).await;
        wait_for_state(&viewer, ChannelState::Connected).await;

        assert!(sender.broadcast_status(&record("artist-1")));
        let received = next_event(&mut viewer_events, |event| {
            matches!(event, ChannelEvent::StatusUpdate(_))
        })
        .await;
        let ChannelEvent::StatusUpdate(status) = received else {
            unreachable!();
        };
        assert_eq!(status.artist_id, "artist-1");
        assert_eq!(status.performance_status, PerformanceStatus::CurrentlyOnStage);

        // The sender's own echo comes back from the hub but is suppressed.
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = sender_events.try_recv() {
            assert!(!matches!(event, ChannelEvent::StatusUpdate(_)));
        }

        sender.disconnect().await;
        viewer.disconnect().await;
    }

    #[tokio::test]
    async fn peer_ping_is_answered_with_matching_pong() {
        let hub = MemoryHub::new();
        let client = channel(&hub, "mc", fast_config());
        client.connect("e1").await;
        wait_for_state(&client, ChannelState::Connected).await;

        let mut probe = hub.connect("e1", "probe").await.unwrap();
        let ping = SyncMessage::ping("e1", "probe");
        probe
            .outbound
            .send(Frame::Text(ping.to_json().unwrap()))
            .await
            .unwrap();

        let pong = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let Some(Frame::Text(text)) = probe.inbound.recv().await else {
                    panic!("probe connection closed");
                };
                let message = SyncMessage::parse(&text).unwrap();
                if message.kind == MessageKind::Pong {
                    return message;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(pong.message_id, ping.message_id);
        assert_eq!(pong.sender_id, "mc");

        client.disconnect().await;
    }

    #[tokio::test]
    async fn malformed_frames_do_not_stop_the_listener() {
        let hub = MemoryHub::new();
        let client = channel(&hub, "dj", fast_config());
        let mut events = client.subscribe();
        client.connect("e1").await;
        wait_for_state(&client, ChannelState::Connected).await;

        hub.inject("e1", "{ not json").await;
        let snapshot = SyncMessage::bulk_sync("e1", "admin", vec![record("a"), record("b")]);
        hub.inject("e1", snapshot.to_json().unwrap()).await;

        let event = next_event(&mut events, |event| matches!(event, ChannelEvent::BulkSync(_))).await;
        let ChannelEvent::BulkSync(records) = event else {
            unreachable!();
        };
        assert_eq!(records.len(), 2);
        assert!(client.is_connected());

        client.disconnect().await;
    }

    #[tokio::test]
    async fn heartbeat_measures_latency() {
        let hub = MemoryHub::new();
        let config = ChannelConfig {
            heartbeat_interval: Duration::from_millis(20),
            heartbeat_timeout: Duration::from_secs(5),
            ..fast_config()
        };
        let client = channel(&hub, "board", config.clone());
        let peer = channel(&hub, "peer", config);
        let mut events = client.subscribe();
        client.connect("e1").await;
        peer.connect("e1").await;

        next_event(&mut events, |event| matches!(event, ChannelEvent::Latency(_))).await;
        assert!(client.latency().is_some());

        client.disconnect().await;
        peer.disconnect().await;
    }

    #[tokio::test]
    async fn silent_connection_is_declared_dead_and_reconnected() {
        let hub = MemoryHub::new();
        let config = ChannelConfig {
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_millis(40),
            ..fast_config()
        };
        let client = channel(&hub, "lonely", config);
        let mut events = client.subscribe();
        client.connect("e1").await;

        let event = next_event(&mut events, |event| {
            matches!(event, ChannelEvent::Disconnected { .. })
        })
        .await;
        assert_eq!(event, ChannelEvent::Disconnected { code: ABNORMAL_CLOSURE });
        next_event(&mut events, |event| matches!(event, ChannelEvent::Connected)).await;

        client.disconnect().await;
    }

    #[tokio::test]
    async fn exhausted_reconnects_switch_to_fallback_polling_until_reset() {
        let hub = MemoryHub::new();
        let client = channel(&hub, "stage-manager", fast_config());
        let mut events = client.subscribe();
        client.connect("e1").await;
        wait_for_state(&client, ChannelState::Connected).await;
        assert_eq!(hub.connect_count(), 1);

        hub.set_refuse_connections(true);
        hub.drop_all(4001).await;
        wait_for_state(&client, ChannelState::FallbackPolling).await;
        // One initial connect plus five failed reconnects.
        assert_eq!(hub.connect_count(), 6);

        next_event(&mut events, |event| matches!(event, ChannelEvent::FallbackPoll)).await;
        next_event(&mut events, |event| matches!(event, ChannelEvent::FallbackPoll)).await;
        assert_eq!(hub.connect_count(), 6);

        hub.set_refuse_connections(false);
        assert!(client.reset_fallback());
        wait_for_state(&client, ChannelState::Connected).await;
        assert_eq!(hub.connect_count(), 7);

        client.disconnect().await;
        assert_eq!(client.state(), ChannelState::Disconnected);
        assert!(!client.reset_fallback());
    }

    #[tokio::test]
    async fn normal_close_does_not_reconnect() {
        let hub = MemoryHub::new();
        let client = channel(&hub, "mc", fast_config());
        client.connect("e1").await;
        wait_for_state(&client, ChannelState::Connected).await;

        hub.drop_all(NORMAL_CLOSURE).await;
        wait_for_state(&client, ChannelState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hub.connect_count(), 1);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn sending_while_disconnected_is_dropped_quietly() {
        let hub = MemoryHub::new();
        let metrics = Arc::new(SyncMetrics::default());
        let client = RealtimeChannel::with_client_id(
            Arc::new(hub),
            fast_config(),
            metrics.clone(),
            "offline",
        );
        assert!(!client.broadcast_status(&record("a")));
        assert_eq!(metrics.snapshot().messages_dropped, 1);
        client.disconnect().await;
    }
}
