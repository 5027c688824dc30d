//! PostgREST-style HTTP store for balances, trades and trading pairs

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::common::errors::{CoreError, Result};
use crate::common::traits::{InstrumentStore, PositionStore};
use crate::common::types::{OrderType, Position, PositionStatus, TradeRequest};
use crate::config::types::StoreConfig;
use crate::instrument::Instrument;

const REST_PREFIX: &str = "/rest/v1";

/// Balance row of the `profiles` table
#[derive(Debug, Deserialize)]
struct ProfileRow {
    balance: Decimal,
}

/// Insert body for the `trades` table
#[derive(Debug, Serialize)]
struct NewTradeRow<'a> {
    #[serde(flatten)]
    request: &'a TradeRequest,
    status: PositionStatus,
}

/// Row of the `trading_pairs` table
///
/// Only `symbol` is mandatory; missing columns fall back to the
/// classifier's defaults.
#[derive(Debug, Deserialize)]
struct TradingPairRow {
    symbol: String,
    #[serde(default)]
    min_lot: Option<Decimal>,
    #[serde(default)]
    max_lot: Option<Decimal>,
    #[serde(default)]
    contract_size: Option<Decimal>,
    #[serde(default)]
    decimals: Option<u32>,
    #[serde(default)]
    leverage_options: Option<Vec<u32>>,
}

impl TradingPairRow {
    fn into_instrument(self) -> Result<Instrument> {
        let mut instrument = Instrument::from_symbol(&self.symbol)?;
        if let Some(contract_size) = self.contract_size {
            instrument.contract_size = contract_size;
        }
        if let Some(decimals) = self.decimals {
            instrument.decimals = decimals;
        }
        let min_lot = self.min_lot.unwrap_or(instrument.min_lot);
        let max_lot = self.max_lot.unwrap_or(instrument.max_lot);
        instrument = instrument.with_lot_bounds(min_lot, max_lot);
        if let Some(options) = self.leverage_options.filter(|o| !o.is_empty()) {
            instrument = instrument.with_leverage_options(options);
        }
        Ok(instrument)
    }
}

#[derive(Debug, Serialize)]
struct CloseTradeArgs<'a> {
    p_trade_id: &'a str,
    p_close_price: Decimal,
    p_pnl: Decimal,
}

#[derive(Debug, Serialize)]
struct CancelTradeArgs<'a> {
    p_trade_id: &'a str,
}

/// `close_trade` returns either the bare new balance or a row holding it
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CloseTradeResponse {
    Balance(Decimal),
    Row { new_balance: Decimal },
}

impl CloseTradeResponse {
    fn balance(self) -> Decimal {
        match self {
            CloseTradeResponse::Balance(balance) => balance,
            CloseTradeResponse::Row { new_balance } => new_balance,
        }
    }
}

/// Error body returned by PostgREST
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// HTTP implementation of [`PositionStore`] and [`InstrumentStore`]
#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    access_token: Option<String>,
}

impl RestStore {
    /// Create a new store client (unauthenticated)
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create a new store client with custom timeout
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            access_token: None,
        })
    }

    pub fn from_config(config: &StoreConfig, timeout: Duration) -> Result<Self> {
        let mut store = Self::with_timeout(&config.url, timeout)?;
        store.api_key = config.api_key.clone();
        store.access_token = config.access_token.clone();
        Ok(store)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}/{}", self.base_url, REST_PREFIX, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut builder = builder;
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key);
        }
        if let Some(token) = self.access_token.as_ref().or(self.api_key.as_ref()) {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Map non-success statuses onto the error taxonomy
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or_else(|| body.clone());
        warn!("Store returned status {}: {}", status, message);

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CoreError::Authentication(message),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                CoreError::Rejected(message)
            }
            _ => CoreError::InvalidResponse(format!("Server returned status {}: {}", status, message)),
        })
    }
}

#[async_trait]
impl PositionStore for RestStore {
    #[instrument(skip(self))]
    async fn get_balance(&self, user_id: &str) -> Result<Decimal> {
        let url = self.url("profiles");
        debug!("Fetching balance from: {}", url);

        let response = self
            .authed(self.client.get(&url))
            .query(&[("id", format!("eq.{}", user_id)), ("select", "balance".to_string())])
            .send()
            .await?;
        let rows: Vec<ProfileRow> = Self::check(response).await?.json().await?;

        rows.into_iter()
            .next()
            .map(|row| row.balance)
            .ok_or_else(|| CoreError::InvalidSession(format!("no profile for user {}", user_id)))
    }

    #[instrument(skip(self))]
    async fn list_positions(
        &self,
        user_id: &str,
        statuses: &[PositionStatus],
    ) -> Result<Vec<Position>> {
        let url = self.url("trades");
        let mut query = vec![
            ("user_id", format!("eq.{}", user_id)),
            ("order", "opened_at.asc".to_string()),
        ];
        if !statuses.is_empty() {
            let list: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
            query.push(("status", format!("in.({})", list.join(","))));
        }

        let response = self.authed(self.client.get(&url)).query(&query).send().await?;
        let positions: Vec<Position> = Self::check(response).await?.json().await?;
        debug!("Loaded {} positions", positions.len());
        Ok(positions)
    }

    #[instrument(skip(self), fields(symbol = %request.symbol))]
    async fn submit_trade(&self, request: &TradeRequest) -> Result<Position> {
        let status = match request.order_type {
            OrderType::Market => PositionStatus::Open,
            OrderType::Limit => PositionStatus::Pending,
        };
        let body = NewTradeRow { request, status };

        let response = self
            .authed(self.client.post(self.url("trades")))
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;
        let rows: Vec<Position> = Self::check(response).await?.json().await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| CoreError::InvalidResponse("insert returned no rows".to_string()))
    }

    #[instrument(skip(self))]
    async fn close_position(&self, id: &str, close_price: Decimal, pnl: Decimal) -> Result<Decimal> {
        let args = CloseTradeArgs {
            p_trade_id: id,
            p_close_price: close_price,
            p_pnl: pnl,
        };
        let response = self
            .authed(self.client.post(self.url("rpc/close_trade")))
            .json(&args)
            .send()
            .await?;
        let result: CloseTradeResponse = Self::check(response).await?.json().await?;
        Ok(result.balance())
    }

    #[instrument(skip(self))]
    async fn cancel_pending_position(&self, id: &str) -> Result<()> {
        let response = self
            .authed(self.client.post(self.url("rpc/cancel_pending_trade")))
            .json(&CancelTradeArgs { p_trade_id: id })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl InstrumentStore for RestStore {
    #[instrument(skip(self))]
    async fn get_instrument(&self, symbol: &str) -> Result<Instrument> {
        let response = self
            .authed(self.client.get(self.url("trading_pairs")))
            .query(&[("symbol", format!("eq.{}", symbol)), ("select", "*".to_string())])
            .send()
            .await?;
        let rows: Vec<TradingPairRow> = Self::check(response).await?.json().await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| CoreError::InstrumentNotFound(symbol.to_string()))?
            .into_instrument()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trading_pair_row_overrides_defaults() {
        let row: TradingPairRow = serde_json::from_str(
            r#"{"symbol":"XAUUSD","min_lot":0.1,"max_lot":"20","leverage_options":[100,50]}"#,
        )
        .unwrap();
        let inst = row.into_instrument().unwrap();
        assert_eq!(inst.min_lot, dec!(0.1));
        assert_eq!(inst.max_lot, dec!(20));
        assert_eq!(inst.contract_size, dec!(100));
        assert_eq!(inst.leverage_options, vec![50, 100]);
    }

    #[test]
    fn test_close_trade_response_shapes() {
        let bare: CloseTradeResponse = serde_json::from_str("1250.5").unwrap();
        assert_eq!(bare.balance(), dec!(1250.5));
        let row: CloseTradeResponse = serde_json::from_str(r#"{"new_balance":"99.9"}"#).unwrap();
        assert_eq!(row.balance(), dec!(99.9));
    }

    #[test]
    fn test_new_trade_row_flattens_request() {
        let request = TradeRequest {
            user_id: "u1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: crate::common::types::Side::Buy,
            order_type: OrderType::Limit,
            lots: dec!(0.5),
            leverage: 10,
            open_price: dec!(60000),
            margin_amount: dec!(3000),
        };
        let value = serde_json::to_value(NewTradeRow {
            request: &request,
            status: PositionStatus::Pending,
        })
        .unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["symbol"], "BTCUSDT");
        assert_eq!(value["side"], "buy");
    }
}
