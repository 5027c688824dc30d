//! Integration tests for the live price feed multiplexer
//!
//! The multiplexer runs against an in-process connector that records every
//! connection and outbound frame, so subscription traffic, heartbeats and
//! teardown can be asserted without a network.

mod common;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use leverage_desk::common::traits::Connector;
use leverage_desk::common::types::{ConnectionStatus, FeedEvent, PositionStatus, Side, Venue};
use leverage_desk::config::types::FeedSettings;
use leverage_desk::feed::{
    ConnectionState, CryptoVenue, ForexVenue, PriceFeedMultiplexer, TickSubscription, VenueProtocol,
};

const WAIT: Duration = Duration::from_secs(2);

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn start_feed(connector: &MockConnector, heartbeat: Duration, settings: &FeedSettings) -> PriceFeedMultiplexer {
    let venues: Vec<Arc<dyn VenueProtocol>> = vec![
        Arc::new(CryptoVenue::new(CRYPTO_URL)),
        Arc::new(ForexVenue::new(FOREX_URL, Some("secret".to_string())).with_heartbeat_interval(heartbeat)),
    ];
    let connector: Arc<dyn Connector> = Arc::new(connector.clone());
    PriceFeedMultiplexer::start(connector, venues, settings)
}

fn start(connector: &MockConnector) -> PriceFeedMultiplexer {
    start_feed(connector, Duration::from_secs(30), &FAST_SETTINGS)
}

async fn wait_connection(connector: &MockConnector, url: &str, nth: usize) -> usize {
    assert!(
        eventually(WAIT, || connector.connections_to(url).len() > nth).await,
        "no connection #{} to {}",
        nth,
        url
    );
    connector.connections_to(url)[nth]
}

async fn wait_crypto_streams(connector: &MockConnector, index: usize, expected: &[&str]) {
    let expected = set(expected);
    assert!(
        eventually(WAIT, || crypto_subscriptions(&connector.sent(index)) == expected).await,
        "crypto subscriptions {:?} never became {:?}",
        crypto_subscriptions(&connector.sent(index)),
        expected
    );
}

async fn wait_forex_pairs(connector: &MockConnector, index: usize, expected: &[&str]) {
    let expected = set(expected);
    assert!(
        eventually(WAIT, || forex_subscriptions(&connector.sent(index)) == expected).await,
        "forex subscriptions {:?} never became {:?}",
        forex_subscriptions(&connector.sent(index)),
        expected
    );
}

async fn wait_status(subscription: &mut TickSubscription, wanted: ConnectionStatus) -> Vec<ConnectionStatus> {
    let mut seen = Vec::new();
    within(async {
        loop {
            match subscription.recv().await {
                Some(FeedEvent::Status { status, .. }) => {
                    let done = status == wanted;
                    seen.push(status);
                    if done {
                        return;
                    }
                }
                Some(FeedEvent::Tick(_)) => {}
                None => panic!("feed closed while waiting for {:?}", wanted),
            }
        }
    })
    .await;
    seen
}

// ============================================================================
// Normalization
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_ticks_are_keyed_by_internal_symbol() {
    let connector = MockConnector::new();
    let feed = start(&connector);

    let mut btc = feed.subscribe("BINANCE:BTCUSDT").unwrap();
    let mut eur = feed.subscribe("FX:EUR/USD").unwrap();

    let crypto = wait_connection(&connector, CRYPTO_URL, 0).await;
    let forex = wait_connection(&connector, FOREX_URL, 0).await;
    wait_crypto_streams(&connector, crypto, &["btcusdt@ticker"]).await;
    wait_forex_pairs(&connector, forex, &["EURUSD"]).await;

    connector.push(crypto, crypto_ticker("BTCUSDT", "64999.5", "65000.5", "65000", "2.5"));
    connector.push(forex, forex_quote("EURUSD", 1.1010, 1.1012));

    let tick = within(btc.next_tick()).await.unwrap();
    assert_eq!(tick.symbol, "BINANCE:BTCUSDT");
    assert_eq!(tick.venue, Venue::Crypto);
    assert_eq!(tick.bid, dec!(64999.5));
    assert_eq!(tick.ask, dec!(65000.5));
    assert_eq!(tick.price, dec!(65000));
    assert_eq!(tick.change, dec!(2.5));

    let tick = within(eur.next_tick()).await.unwrap();
    assert_eq!(tick.symbol, "FX:EUR/USD");
    assert_eq!(tick.venue, Venue::Forex);
    assert_eq!(tick.bid, dec!(1.1010));
    assert_eq!(tick.ask, dec!(1.1012));
    assert_eq!(tick.price, dec!(1.1011));

    assert_eq!(
        feed.latest_tick("FX:EUR/USD").await.unwrap().map(|t| t.bid),
        Some(dec!(1.1010))
    );

    feed.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let connector = MockConnector::new();
    let feed = start(&connector);

    let mut btc = feed.subscribe("BTCUSDT").unwrap();
    let crypto = wait_connection(&connector, CRYPTO_URL, 0).await;
    wait_crypto_streams(&connector, crypto, &["btcusdt@ticker"]).await;

    connector.push(crypto, "not json");
    connector.push(crypto, r#"{"result":null,"id":1}"#);
    connector.push(crypto, r#"{"stream":"btcusdt@ticker","data":{"s":"BTCUSDT"}}"#);
    connector.push(crypto, crypto_ticker("BTCUSDT", "1", "2", "1.5", "0"));

    let tick = within(btc.next_tick()).await.unwrap();
    assert_eq!(tick.price, dec!(1.5));
    assert_eq!(connector.connection_count(), 1);
    assert_eq!(feed.connection_state(Venue::Crypto), Some(ConnectionState::Connected));

    feed.shutdown().await;
}

#[tokio::test]
async fn test_new_subscriber_gets_cached_tick() {
    let connector = MockConnector::new();
    let feed = start(&connector);

    let mut first = feed.subscribe("ETHUSDT").unwrap();
    let crypto = wait_connection(&connector, CRYPTO_URL, 0).await;
    wait_crypto_streams(&connector, crypto, &["ethusdt@ticker"]).await;
    connector.push(crypto, crypto_ticker("ETHUSDT", "3000", "3001", "3000.5", "-1.2"));
    within(first.next_tick()).await.unwrap();

    let mut second = feed.subscribe("ETHUSDT").unwrap();
    let cached = within(second.next_tick()).await.unwrap();
    assert_eq!(cached.price, dec!(3000.5));
    assert_eq!(cached.change, dec!(-1.2));

    feed.shutdown().await;
}

// ============================================================================
// Interest management
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_subscription_changes_are_incremental() {
    let connector = MockConnector::new();
    let feed = start(&connector);

    let btc = feed.subscribe("BTCUSDT").unwrap();
    let crypto = wait_connection(&connector, CRYPTO_URL, 0).await;
    wait_crypto_streams(&connector, crypto, &["btcusdt@ticker"]).await;

    let _eth = feed.subscribe("ETHUSDT").unwrap();
    wait_crypto_streams(&connector, crypto, &["btcusdt@ticker", "ethusdt@ticker"]).await;

    drop(btc);
    wait_crypto_streams(&connector, crypto, &["ethusdt@ticker"]).await;

    let methods: Vec<String> = connector
        .sent(crypto)
        .iter()
        .filter_map(|f| serde_json::from_str::<serde_json::Value>(f).ok())
        .map(|v| format!("{} {}", v["method"].as_str().unwrap_or(""), v["params"]))
        .collect();
    assert_eq!(
        methods,
        vec![
            r#"SUBSCRIBE ["btcusdt@ticker"]"#.to_string(),
            r#"SUBSCRIBE ["ethusdt@ticker"]"#.to_string(),
            r#"UNSUBSCRIBE ["btcusdt@ticker"]"#.to_string(),
        ]
    );
    // Interest changes never reconnect
    assert_eq!(connector.connections_to(CRYPTO_URL).len(), 1);
    assert!(connector.connections_to(FOREX_URL).is_empty());

    feed.shutdown().await;
}

#[tokio::test]
async fn test_interest_is_viewed_instrument_plus_positions() {
    let connector = MockConnector::new();
    let feed = start(&connector);

    feed.sync_positions(&[
        position("p1", "XAUUSD", Side::Buy, PositionStatus::Open),
        position("p2", "GBPUSD", Side::Sell, PositionStatus::Pending),
        position("p3", "USDJPY", Side::Buy, PositionStatus::Closed),
    ])
    .unwrap();
    feed.set_viewed_instrument(Some("FX:EUR/USD")).unwrap();

    let forex = wait_connection(&connector, FOREX_URL, 0).await;
    wait_forex_pairs(&connector, forex, &["EURUSD", "GBPUSD", "XAUUSD"]).await;
    assert_eq!(
        feed.interest().await.unwrap()[&Venue::Forex],
        set(&["FX:EUR/USD", "GBPUSD", "XAUUSD"])
    );

    // Switching the viewed instrument to a crypto pair moves interest across venues
    feed.set_viewed_instrument(Some("BTCUSDT")).unwrap();
    wait_forex_pairs(&connector, forex, &["GBPUSD", "XAUUSD"]).await;
    let crypto = wait_connection(&connector, CRYPTO_URL, 0).await;
    wait_crypto_streams(&connector, crypto, &["btcusdt@ticker"]).await;

    // Positions closed: forex interest empties but the connection stays up
    feed.sync_positions(&[]).unwrap();
    wait_forex_pairs(&connector, forex, &[]).await;
    assert!(!connector.is_closed(forex));
    assert_eq!(connector.connections_to(FOREX_URL).len(), 1);

    feed.shutdown().await;
}

#[tokio::test]
async fn test_dropped_subscription_stops_delivery() {
    let connector = MockConnector::new();
    let feed = start(&connector);

    let mut first = feed.subscribe("SOLUSDT").unwrap();
    let mut second = feed.subscribe("SOLUSDT").unwrap();
    let crypto = wait_connection(&connector, CRYPTO_URL, 0).await;
    wait_crypto_streams(&connector, crypto, &["solusdt@ticker"]).await;

    connector.push(crypto, crypto_ticker("SOLUSDT", "150", "150.1", "150.05", "0.4"));
    within(first.next_tick()).await.unwrap();
    within(second.next_tick()).await.unwrap();

    first.close();
    connector.push(crypto, crypto_ticker("SOLUSDT", "151", "151.1", "151.05", "0.9"));
    let tick = within(second.next_tick()).await.unwrap();
    assert_eq!(tick.price, dec!(151.05));
    // Still wanted by the second subscriber
    assert_eq!(crypto_subscriptions(&connector.sent(crypto)), set(&["solusdt@ticker"]));

    drop(second);
    wait_crypto_streams(&connector, crypto, &[]).await;
    assert!(feed.interest().await.unwrap().is_empty());

    feed.shutdown().await;
}

// ============================================================================
// Heartbeat and visibility
// ============================================================================

#[tokio::test]
async fn test_forex_connection_sends_heartbeats_with_credentials() {
    let connector = MockConnector::new();
    let feed = start_feed(&connector, Duration::from_millis(20), &FAST_SETTINGS);

    let _eur = feed.subscribe("EURUSD").unwrap();
    let forex = wait_connection(&connector, FOREX_URL, 0).await;

    assert!(eventually(WAIT, || count_pings(&connector.sent(forex)) >= 2).await);
    assert_eq!(
        connector.headers(forex),
        vec![("token".to_string(), "secret".to_string())]
    );

    feed.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_hidden_page_closes_connection_and_visibility_resubscribes() {
    let connector = MockConnector::new();
    let feed = start(&connector);

    let mut btc = feed.subscribe("BTCUSDT").unwrap();
    let first = wait_connection(&connector, CRYPTO_URL, 0).await;
    wait_crypto_streams(&connector, first, &["btcusdt@ticker"]).await;

    feed.set_visible(false).unwrap();
    assert!(eventually(WAIT, || connector.is_closed(first)).await);
    let mut state = feed.watch_state(Venue::Crypto).unwrap();
    within(state.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .unwrap();
    wait_status(&mut btc, ConnectionStatus::Disconnected(Some("suspended".to_string()))).await;

    // Nothing reconnects while hidden
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(connector.connections_to(CRYPTO_URL).len(), 1);

    feed.set_visible(true).unwrap();
    let second = wait_connection(&connector, CRYPTO_URL, 1).await;
    wait_crypto_streams(&connector, second, &["btcusdt@ticker"]).await;

    connector.push(second, crypto_ticker("BTCUSDT", "1", "2", "1.5", "0"));
    assert_eq!(within(btc.next_tick()).await.unwrap().price, dec!(1.5));

    feed.shutdown().await;
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test]
async fn test_peer_close_reconnects_and_restores_subscriptions() {
    let connector = MockConnector::new();
    let feed = start(&connector);

    let mut btc = feed.subscribe("BTCUSDT").unwrap();
    let _eth = feed.subscribe("ETHUSDT").unwrap();
    let first = wait_connection(&connector, CRYPTO_URL, 0).await;
    wait_crypto_streams(&connector, first, &["btcusdt@ticker", "ethusdt@ticker"]).await;

    connector.drop_connection(first);
    let statuses = wait_status(&mut btc, ConnectionStatus::Reconnecting { attempt: 1 }).await;
    assert!(statuses.contains(&ConnectionStatus::Disconnected(None)));

    let second = wait_connection(&connector, CRYPTO_URL, 1).await;
    wait_crypto_streams(&connector, second, &["btcusdt@ticker", "ethusdt@ticker"]).await;
    wait_status(&mut btc, ConnectionStatus::Connected).await;

    feed.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_exhausted_retries_surface_degraded() {
    let connector = MockConnector::new();
    connector.set_refuse(true);
    let feed = start(&connector);

    let mut btc = feed.subscribe("BTCUSDT").unwrap();
    let statuses = wait_status(&mut btc, ConnectionStatus::Degraded { attempts: 2 }).await;

    assert!(statuses.contains(&ConnectionStatus::Reconnecting { attempt: 1 }));
    assert!(statuses.contains(&ConnectionStatus::Reconnecting { attempt: 2 }));
    assert_eq!(connector.attempts(), 3);

    // No further attempts once degraded
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.attempts(), 3);

    // A change of interest starts a fresh retry budget
    connector.set_refuse(false);
    let _eth = feed.subscribe("ETHUSDT").unwrap();
    wait_status(&mut btc, ConnectionStatus::Connected).await;
    let crypto = wait_connection(&connector, CRYPTO_URL, 0).await;
    wait_crypto_streams(&connector, crypto, &["btcusdt@ticker", "ethusdt@ticker"]).await;

    feed.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_sessions_dropped_after_handshake_exhaust_the_budget() {
    let connector = MockConnector::new();
    connector.set_hang_up(true);
    let feed = start(&connector);

    let mut btc = feed.subscribe("BTCUSDT").unwrap();
    let statuses = wait_status(&mut btc, ConnectionStatus::Degraded { attempts: 2 }).await;

    assert!(statuses.contains(&ConnectionStatus::Connected));
    assert!(statuses.contains(&ConnectionStatus::Reconnecting { attempt: 2 }));
    assert_eq!(connector.connections_to(CRYPTO_URL).len(), 3);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.attempts(), 3);

    feed.shutdown().await;
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let connector = MockConnector::new();
    let feed = start_feed(&connector, Duration::from_millis(20), &FAST_SETTINGS);

    let mut btc = feed.subscribe("BTCUSDT").unwrap();
    let _gold = feed.subscribe("XAUUSD").unwrap();
    let crypto = wait_connection(&connector, CRYPTO_URL, 0).await;
    let forex = wait_connection(&connector, FOREX_URL, 0).await;
    wait_forex_pairs(&connector, forex, &["XAUUSD"]).await;

    let mut crypto_state = feed.watch_state(Venue::Crypto).unwrap();
    feed.shutdown().await;

    assert!(connector.is_closed(crypto));
    assert!(connector.is_closed(forex));
    assert_eq!(*crypto_state.borrow_and_update(), ConnectionState::Disconnected);

    // Subscribers see the end of the stream rather than hanging
    within(async { while btc.recv().await.is_some() {} }).await;

    // Heartbeat timers stop with the connection
    let pings = count_pings(&connector.sent(forex));
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(count_pings(&connector.sent(forex)), pings);
    assert_eq!(connector.connection_count(), 2);
}

#[tokio::test]
async fn test_dropping_the_feed_tears_down_connections() {
    let connector = MockConnector::new();
    let feed = start(&connector);

    let _btc = feed.subscribe("BTCUSDT").unwrap();
    let crypto = wait_connection(&connector, CRYPTO_URL, 0).await;
    wait_crypto_streams(&connector, crypto, &["btcusdt@ticker"]).await;

    drop(feed);
    assert!(eventually(WAIT, || connector.is_closed(crypto)).await);
}
