//! Per-venue upstream connection task
//!
//! Each venue gets exactly one [`VenueConnection`], driven as an explicit
//! `Disconnected -> Connecting -> Connected` state machine. The desired
//! symbol set and page visibility arrive over a watch channel from the
//! multiplexer's coordinator; ticks and status changes flow back over an
//! mpsc channel. Dropping the watch sender is the shutdown signal.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::venue::VenueProtocol;
use crate::common::errors::Result;
use crate::common::traits::{Connector, Transport};
use crate::common::types::{ConnectionStatus, PriceTick, Venue};
use crate::config::types::FeedSettings;

/// Lifecycle state of one upstream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the coordinator wants from a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionControl {
    /// Internal symbols of interest on this venue
    pub symbols: BTreeSet<String>,
    /// Whether the consuming page is visible
    pub visible: bool,
}

impl Default for ConnectionControl {
    fn default() -> Self {
        Self {
            symbols: BTreeSet::new(),
            visible: true,
        }
    }
}

impl ConnectionControl {
    fn wants_connection(&self) -> bool {
        self.visible && !self.symbols.is_empty()
    }
}

/// Events sent from a connection task to the coordinator
#[derive(Debug, Clone)]
pub(crate) enum VenueEvent {
    Ticks(Vec<PriceTick>),
    Status(Venue, ConnectionStatus),
}

/// Reconnection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Failed attempts tolerated before degrading (0 = retry forever)
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), doubling up to `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt > self.max_attempts
    }

    /// A lost session resets the retry budget only if it delivered a tick
    /// or outlived the longest backoff delay
    pub fn session_was_healthy(&self, delivered_ticks: bool, lasted: Duration) -> bool {
        delivered_ticks || lasted >= self.max_delay
    }
}

impl From<&FeedSettings> for ReconnectPolicy {
    fn from(settings: &FeedSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.reconnect_delay_ms),
            max_delay: Duration::from_millis(settings.max_reconnect_delay_ms),
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// How a connected session ended
enum SessionEnd {
    /// Control sender dropped
    Shutdown,
    /// Page hidden; closed on purpose
    Suspended,
    /// Peer closed or the socket failed
    Lost { reason: Option<String>, healthy: bool },
}

/// Maps upstream keys back to the internal symbols that asked for them
#[derive(Debug, Default)]
struct Routes {
    by_key: BTreeMap<String, BTreeSet<String>>,
}

impl Routes {
    fn build(protocol: &dyn VenueProtocol, symbols: &BTreeSet<String>) -> Self {
        let mut by_key: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for symbol in symbols {
            by_key
                .entry(protocol.upstream_key(symbol))
                .or_default()
                .insert(symbol.clone());
        }
        Self { by_key }
    }

    fn keys(&self) -> BTreeSet<String> {
        self.by_key.keys().cloned().collect()
    }

    fn symbols_for(&self, key: &str) -> impl Iterator<Item = &String> {
        self.by_key.get(key).into_iter().flatten()
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

pub struct VenueConnection {
    protocol: Arc<dyn VenueProtocol>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    control: watch::Receiver<ConnectionControl>,
    events: mpsc::UnboundedSender<VenueEvent>,
    state: watch::Sender<ConnectionState>,
}

impl VenueConnection {
    pub(crate) fn new(
        protocol: Arc<dyn VenueProtocol>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        control: watch::Receiver<ConnectionControl>,
        events: mpsc::UnboundedSender<VenueEvent>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            protocol,
            connector,
            policy,
            control,
            events,
            state,
        }
    }

    fn venue(&self) -> Venue {
        self.protocol.venue()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn emit_status(&self, status: ConnectionStatus) {
        let _ = self.events.send(VenueEvent::Status(self.venue(), status));
    }

    /// Run until the control channel is dropped
    #[instrument(skip(self), fields(venue = %self.protocol.venue()))]
    pub(crate) async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            let control = self.control.borrow_and_update().clone();
            if !control.wants_connection() {
                self.set_state(ConnectionState::Disconnected);
                if self.control.changed().await.is_err() {
                    break;
                }
                attempt = 0;
                continue;
            }

            self.set_state(ConnectionState::Connecting);
            self.emit_status(ConnectionStatus::Connecting);
            info!("Connecting to {}", self.protocol.url());

            let headers = self.protocol.auth_headers();
            let connected = tokio::select! {
                result = self.connector.connect(self.protocol.url(), &headers) => Some(result),
                changed = self.control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    None
                }
            };

            let failure = match connected {
                // Interest or visibility changed mid-connect; re-evaluate
                None => continue,
                Some(Ok(transport)) => match self.drive(transport).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Suspended => {
                        attempt = 0;
                        continue;
                    }
                    SessionEnd::Lost { reason, healthy } => {
                        if healthy {
                            attempt = 0;
                        }
                        reason
                    }
                },
                Some(Err(e)) => Some(e.to_string()),
            };

            self.set_state(ConnectionState::Disconnected);
            self.emit_status(ConnectionStatus::Disconnected(failure.clone()));

            attempt += 1;
            if self.policy.exhausted(attempt) {
                let attempts = attempt - 1;
                error!(
                    "Giving up on {} feed after {} reconnect attempts: {:?}",
                    self.venue(),
                    attempts,
                    failure
                );
                self.emit_status(ConnectionStatus::Degraded { attempts });
                if self.control.changed().await.is_err() {
                    break;
                }
                attempt = 0;
                continue;
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                "{} feed disconnected ({:?}); reconnect attempt {} in {:?}",
                self.venue(),
                failure,
                attempt,
                delay
            );
            self.emit_status(ConnectionStatus::Reconnecting { attempt });

            tokio::select! {
                _ = sleep(delay) => {}
                changed = self.control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("{} connection task stopped", self.venue());
    }

    /// Drive one connected session until it ends
    async fn drive(&mut self, mut transport: Box<dyn Transport>) -> SessionEnd {
        let mut active: BTreeSet<String> = BTreeSet::new();
        let mut routes = Routes::build(&*self.protocol, &self.control.borrow_and_update().symbols);
        let started = Instant::now();
        let mut delivered = false;
        let policy = self.policy;
        let lost = |reason: Option<String>, delivered: bool| SessionEnd::Lost {
            reason,
            healthy: policy.session_was_healthy(delivered, started.elapsed()),
        };

        if let Err(e) = self.apply_interest(transport.as_mut(), &mut active, &routes).await {
            return lost(Some(e.to_string()), delivered);
        }

        self.set_state(ConnectionState::Connected);
        self.emit_status(ConnectionStatus::Connected);

        let mut heartbeat = self.protocol.heartbeat_interval().filter(|p| !p.is_zero()).map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                frame = transport.next_text() => match frame {
                    Some(Ok(text)) => delivered |= self.publish(&routes, &text),
                    Some(Err(e)) => {
                        warn!("{} feed error: {}", self.venue(), e);
                        return lost(Some(e.to_string()), delivered);
                    }
                    None => return lost(None, delivered),
                },
                changed = self.control.changed() => {
                    if changed.is_err() {
                        let _ = transport.close().await;
                        return SessionEnd::Shutdown;
                    }

                    let control = self.control.borrow_and_update().clone();
                    if !control.visible {
                        info!("Suspending {} feed while hidden", self.venue());
                        let _ = transport.close().await;
                        self.set_state(ConnectionState::Disconnected);
                        self.emit_status(ConnectionStatus::Disconnected(Some("suspended".to_string())));
                        return SessionEnd::Suspended;
                    }

                    routes = Routes::build(&*self.protocol, &control.symbols);
                    if let Err(e) = self.apply_interest(transport.as_mut(), &mut active, &routes).await {
                        return lost(Some(e.to_string()), delivered);
                    }
                },
                _ = next_heartbeat(&mut heartbeat) => {
                    if let Some(frame) = self.protocol.heartbeat_frame() {
                        debug!("Sending {} heartbeat", self.venue());
                        if let Err(e) = transport.send_text(frame).await {
                            return lost(Some(e.to_string()), delivered);
                        }
                    }
                },
            }
        }
    }

    /// Send incremental unsubscribe / subscribe frames to reach `routes`
    async fn apply_interest(
        &self,
        transport: &mut dyn Transport,
        active: &mut BTreeSet<String>,
        routes: &Routes,
    ) -> Result<()> {
        let desired = routes.keys();
        let removed: Vec<String> = active.difference(&desired).cloned().collect();
        let added: Vec<String> = desired.difference(active).cloned().collect();

        if !removed.is_empty() {
            debug!("Unsubscribing {:?} on {}", removed, self.venue());
            transport.send_text(self.protocol.unsubscribe_frame(&removed)?).await?;
        }
        if !added.is_empty() {
            debug!("Subscribing {:?} on {}", added, self.venue());
            transport.send_text(self.protocol.subscribe_frame(&added)?).await?;
        }

        *active = desired;
        Ok(())
    }

    /// Normalize a frame into ticks keyed by internal symbol and forward them.
    /// Returns whether any tick was forwarded.
    fn publish(&self, routes: &Routes, text: &str) -> bool {
        let quotes = self.protocol.parse_frame(text);
        if quotes.is_empty() {
            return false;
        }

        let received_at = Utc::now();
        let venue = self.venue();
        let ticks: Vec<PriceTick> = quotes
            .into_iter()
            .flat_map(|quote| {
                routes
                    .symbols_for(&quote.key)
                    .map(|symbol| PriceTick {
                        symbol: symbol.clone(),
                        venue,
                        bid: quote.bid,
                        ask: quote.ask,
                        price: quote.price,
                        change: quote.change,
                        received_at,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        if ticks.is_empty() {
            return false;
        }
        let _ = self.events.send(VenueEvent::Ticks(ticks));
        true
    }
}
