//! Live price feed multiplexer
//!
//! A single coordinator task owns the "symbols of interest" (local
//! subscriptions, the viewed instrument and committed positions) and
//! routes them to one [`VenueConnection`] per venue. Ticks coming back are
//! cached last-write-wins and fanned out to subscribers of the symbol.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{ConnectionControl, ConnectionState, ReconnectPolicy, VenueConnection, VenueEvent};
use super::venue::VenueProtocol;
use crate::common::channels::{create_event_channel_with_size, DEFAULT_CHANNEL_SIZE};
use crate::common::errors::{CoreError, Result};
use crate::common::traits::Connector;
use crate::common::types::{ConnectionStatus, FeedEvent, Position, PriceTick, Venue};
use crate::config::types::FeedSettings;
use crate::instrument::{classify, InstrumentError};

enum Command {
    Subscribe {
        id: u64,
        symbol: String,
        venue: Venue,
        sender: mpsc::Sender<FeedEvent>,
    },
    Unsubscribe {
        id: u64,
    },
    SetViewed(Option<String>),
    SyncPositions(BTreeSet<String>),
    SetVisible(bool),
    LatestTick {
        symbol: String,
        reply: oneshot::Sender<Option<PriceTick>>,
    },
    Interest {
        reply: oneshot::Sender<BTreeMap<Venue, BTreeSet<String>>>,
    },
    Shutdown,
}

/// Stream of events for one subscribed symbol
///
/// Dropping the subscription (or calling [`TickSubscription::close`])
/// stops delivery immediately and releases the symbol's interest.
pub struct TickSubscription {
    id: u64,
    symbol: String,
    receiver: mpsc::Receiver<FeedEvent>,
    commands: mpsc::UnboundedSender<Command>,
}

impl TickSubscription {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Next tick or status event; `None` once the feed shut down
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        self.receiver.try_recv().ok()
    }

    /// Next price tick, skipping status events
    pub async fn next_tick(&mut self) -> Option<PriceTick> {
        loop {
            match self.receiver.recv().await? {
                FeedEvent::Tick(tick) => return Some(tick),
                FeedEvent::Status { .. } => continue,
            }
        }
    }

    pub fn close(self) {}
}

impl Drop for TickSubscription {
    fn drop(&mut self) {
        self.receiver.close();
        let _ = self.commands.send(Command::Unsubscribe { id: self.id });
    }
}

struct Subscriber {
    symbol: String,
    venue: Venue,
    sender: mpsc::Sender<FeedEvent>,
}

struct VenueHandle {
    control: watch::Sender<ConnectionControl>,
    task: JoinHandle<()>,
}

struct Coordinator {
    subscribers: HashMap<u64, Subscriber>,
    viewed: Option<(String, Venue)>,
    positions: BTreeMap<String, Venue>,
    visible: bool,
    latest: HashMap<String, PriceTick>,
    last_status: HashMap<Venue, ConnectionStatus>,
    venues: HashMap<Venue, VenueHandle>,
}

fn venue_of(symbol: &str) -> std::result::Result<Venue, InstrumentError> {
    Ok(classify(symbol)?.venue())
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<VenueEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(event) = events.recv() => self.dispatch(event),
            }
        }

        info!("Shutting down price feed");
        let tasks: Vec<JoinHandle<()>> = self
            .venues
            .drain()
            .map(|(_, handle)| {
                // Dropping the control sender stops the connection task
                drop(handle.control);
                handle.task
            })
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        self.subscribers.clear();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                id,
                symbol,
                venue,
                sender,
            } => {
                if let Some(status) = self.last_status.get(&venue) {
                    let _ = sender.try_send(FeedEvent::Status {
                        venue,
                        status: status.clone(),
                    });
                }
                if let Some(tick) = self.latest.get(&symbol) {
                    let _ = sender.try_send(FeedEvent::Tick(tick.clone()));
                }
                self.subscribers.insert(id, Subscriber { symbol, venue, sender });
                self.refresh_interest();
            }
            Command::Unsubscribe { id } => {
                if self.subscribers.remove(&id).is_some() {
                    self.refresh_interest();
                }
            }
            Command::SetViewed(symbol) => {
                self.viewed = symbol.and_then(|s| match venue_of(&s) {
                    Ok(venue) => Some((s, venue)),
                    Err(e) => {
                        warn!("Ignoring viewed instrument {}: {}", s, e);
                        None
                    }
                });
                self.refresh_interest();
            }
            Command::SyncPositions(symbols) => {
                self.positions = symbols
                    .into_iter()
                    .filter_map(|s| match venue_of(&s) {
                        Ok(venue) => Some((s, venue)),
                        Err(e) => {
                            warn!("Ignoring position symbol {}: {}", s, e);
                            None
                        }
                    })
                    .collect();
                self.refresh_interest();
            }
            Command::SetVisible(visible) => {
                self.visible = visible;
                self.refresh_interest();
            }
            Command::LatestTick { symbol, reply } => {
                let _ = reply.send(self.latest.get(&symbol).cloned());
            }
            Command::Interest { reply } => {
                let _ = reply.send(self.interest());
            }
            Command::Shutdown => {}
        }
    }

    fn interest(&self) -> BTreeMap<Venue, BTreeSet<String>> {
        let mut interest: BTreeMap<Venue, BTreeSet<String>> = BTreeMap::new();
        let subscribed = self.subscribers.values().map(|s| (&s.symbol, s.venue));
        let viewed = self.viewed.iter().map(|(s, v)| (s, *v));
        let positions = self.positions.iter().map(|(s, v)| (s, *v));

        for (symbol, venue) in subscribed.chain(viewed).chain(positions) {
            interest.entry(venue).or_default().insert(symbol.clone());
        }
        interest
    }

    /// Push the current interest and visibility to every connection
    fn refresh_interest(&mut self) {
        let mut interest = self.interest();
        let visible = self.visible;

        for (venue, handle) in &self.venues {
            let symbols = interest.remove(venue).unwrap_or_default();
            handle.control.send_if_modified(|control| {
                if control.symbols == symbols && control.visible == visible {
                    return false;
                }
                control.symbols = symbols;
                control.visible = visible;
                true
            });
        }

        for (venue, symbols) in interest {
            warn!("No {} venue configured for {:?}", venue, symbols);
        }

        let wanted = self.interest();
        self.latest
            .retain(|symbol, tick| wanted.get(&tick.venue).map_or(false, |s| s.contains(symbol)));
    }

    fn dispatch(&mut self, event: VenueEvent) {
        let mut closed = Vec::new();

        match event {
            VenueEvent::Ticks(ticks) => {
                for tick in ticks {
                    for (id, subscriber) in &self.subscribers {
                        if subscriber.symbol != tick.symbol {
                            continue;
                        }
                        match subscriber.sender.try_send(FeedEvent::Tick(tick.clone())) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                debug!("Subscriber {} lagging, dropping {} tick", id, tick.symbol);
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                        }
                    }
                    self.latest.insert(tick.symbol.clone(), tick);
                }
            }
            VenueEvent::Status(venue, status) => {
                for (id, subscriber) in &self.subscribers {
                    if subscriber.venue != venue {
                        continue;
                    }
                    let event = FeedEvent::Status {
                        venue,
                        status: status.clone(),
                    };
                    if let Err(mpsc::error::TrySendError::Closed(_)) = subscriber.sender.try_send(event) {
                        closed.push(*id);
                    }
                }
                self.last_status.insert(venue, status);
            }
        }

        if !closed.is_empty() {
            for id in closed {
                self.subscribers.remove(&id);
            }
            self.refresh_interest();
        }
    }
}

/// Handle to the running price feed
///
/// Must be created inside a tokio runtime. Dropping the handle shuts the
/// feed down; [`PriceFeedMultiplexer::shutdown`] additionally waits for
/// every connection to close.
pub struct PriceFeedMultiplexer {
    commands: mpsc::UnboundedSender<Command>,
    states: HashMap<Venue, watch::Receiver<ConnectionState>>,
    next_id: AtomicU64,
    channel_size: usize,
    coordinator: Option<JoinHandle<()>>,
}

impl PriceFeedMultiplexer {
    /// Start the coordinator and one connection task per venue
    pub fn start(
        connector: Arc<dyn Connector>,
        venues: Vec<Arc<dyn VenueProtocol>>,
        settings: &FeedSettings,
    ) -> Self {
        let policy = ReconnectPolicy::from(settings);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut handles = HashMap::new();
        let mut states = HashMap::new();
        for protocol in venues {
            let venue = protocol.venue();
            if handles.contains_key(&venue) {
                warn!("Duplicate {} venue ignored", venue);
                continue;
            }

            let (control_tx, control_rx) = watch::channel(ConnectionControl::default());
            let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
            let connection = VenueConnection::new(
                protocol,
                connector.clone(),
                policy,
                control_rx,
                event_tx.clone(),
                state_tx,
            );
            let task = tokio::spawn(connection.run());

            handles.insert(
                venue,
                VenueHandle {
                    control: control_tx,
                    task,
                },
            );
            states.insert(venue, state_rx);
        }
        drop(event_tx);

        let coordinator = Coordinator {
            subscribers: HashMap::new(),
            viewed: None,
            positions: BTreeMap::new(),
            visible: true,
            latest: HashMap::new(),
            last_status: HashMap::new(),
            venues: handles,
        };
        let task = tokio::spawn(coordinator.run(command_rx, event_rx));

        let channel_size = if settings.channel_size == 0 {
            DEFAULT_CHANNEL_SIZE
        } else {
            settings.channel_size
        };

        Self {
            commands: command_tx,
            states,
            next_id: AtomicU64::new(1),
            channel_size,
            coordinator: Some(task),
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CoreError::FeedShutdown)
    }

    /// Subscribe to live events for `symbol`
    pub fn subscribe(&self, symbol: &str) -> Result<TickSubscription> {
        let venue = venue_of(symbol)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = create_event_channel_with_size(self.channel_size);

        self.send(Command::Subscribe {
            id,
            symbol: symbol.to_string(),
            venue,
            sender,
        })?;

        Ok(TickSubscription {
            id,
            symbol: symbol.to_string(),
            receiver,
            commands: self.commands.clone(),
        })
    }

    /// Instrument currently shown on the trading panel
    pub fn set_viewed_instrument(&self, symbol: Option<&str>) -> Result<()> {
        self.send(Command::SetViewed(symbol.map(str::to_string)))
    }

    /// Track the symbols of all committed (open or pending) positions
    pub fn sync_positions(&self, positions: &[Position]) -> Result<()> {
        let symbols = positions
            .iter()
            .filter(|p| p.is_committed())
            .map(|p| p.symbol.clone())
            .collect();
        self.send(Command::SyncPositions(symbols))
    }

    /// Suspend (hidden) or resume (visible) all upstream activity
    pub fn set_visible(&self, visible: bool) -> Result<()> {
        self.send(Command::SetVisible(visible))
    }

    /// Most recent tick for `symbol`, if any arrived while it was of interest
    pub async fn latest_tick(&self, symbol: &str) -> Result<Option<PriceTick>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::LatestTick {
            symbol: symbol.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| CoreError::FeedShutdown)
    }

    /// Current symbols of interest, per venue
    pub async fn interest(&self) -> Result<BTreeMap<Venue, BTreeSet<String>>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Interest { reply })?;
        rx.await.map_err(|_| CoreError::FeedShutdown)
    }

    pub fn connection_state(&self, venue: Venue) -> Option<ConnectionState> {
        self.states.get(&venue).map(|rx| *rx.borrow())
    }

    /// Watch state changes of one venue's connection
    pub fn watch_state(&self, venue: Venue) -> Option<watch::Receiver<ConnectionState>> {
        self.states.get(&venue).cloned()
    }

    /// Close every connection and wait for all feed tasks to finish
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.coordinator.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PriceFeedMultiplexer {
    fn drop(&mut self) {
        if self.coordinator.is_some() {
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}
