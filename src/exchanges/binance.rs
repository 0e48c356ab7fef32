//! Binance USDⓈ-M futures gateway

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt, stream};
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::str::FromStr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::info;
use uuid::Uuid;

use crate::core::{
    AccountUpdate, Error, EventStream, ExchangeGateway, MarketTick, Order, OrderRequest,
    OrderStatus, OrderType, OrderUpdate, Position, PositionPair, PrivateEvent, Result, Side,
    Symbol,
};

const MAINNET_REST: &str = "https://fapi.binance.com";
const MAINNET_WS: &str = "wss://fstream.binance.com";
const TESTNET_REST: &str = "https://testnet.binancefuture.com";
const TESTNET_WS: &str = "wss://stream.binancefuture.com";

const QUOTE_ASSET: &str = "USDT";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Binance futures adapter: signed REST plus user/market WebSocket streams.
pub struct Binance {
    symbol: Symbol,
    api_key: String,
    api_secret: String,
    testnet: bool,
    client: reqwest::Client,
}

impl Binance {
    pub fn new(
        symbol: Symbol,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        testnet: bool,
    ) -> Self {
        Self {
            symbol,
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            testnet,
            client: reqwest::Client::new(),
        }
    }

    fn base_url(&self) -> &str {
        if self.testnet { TESTNET_REST } else { MAINNET_REST }
    }

    fn ws_url(&self) -> &str {
        if self.testnet { TESTNET_WS } else { MAINNET_WS }
    }

    /// HMAC-SHA256 over the query string, hex encoded.
    fn sign(&self, query: &str) -> String {
        sign_query(&self.api_secret, query)
    }

    /// Signed request: appends timestamp, recvWindow and signature.
    async fn signed(&self, method: Method, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        query.push("recvWindow=5000".to_string());
        let query = query.join("&");
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.base_url(), path, query, signature);
        self.request(method, &url, path).await
    }

    /// API-key-only request (listen-key management needs no signature).
    async fn keyed(&self, method: Method, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url(), path);
        self.request(method, &url, path).await
    }

    async fn request(&self, method: Method, url: &str, path: &str) -> Result<Value> {
        let response = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("{path} returned {status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| Error::Decode(format!("{path} response: {e}")))
    }

    async fn create_listen_key(&self) -> Result<String> {
        let value = self.keyed(Method::POST, "/fapi/v1/listenKey").await?;
        value
            .get("listenKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Decode("listenKey missing from response".into()))
    }
}

#[async_trait]
impl ExchangeGateway for Binance {
    async fn fetch_orders(&self) -> Result<Vec<Order>> {
        let value = self
            .signed(
                Method::GET,
                "/fapi/v1/openOrders",
                &[("symbol", self.symbol.to_string())],
            )
            .await?;
        value
            .as_array()
            .ok_or_else(|| Error::Decode("openOrders: expected array".into()))?
            .iter()
            .map(parse_rest_order)
            .collect()
    }

    async fn fetch_position(&self) -> Result<PositionPair> {
        let value = self
            .signed(
                Method::GET,
                "/fapi/v2/positionRisk",
                &[("symbol", self.symbol.to_string())],
            )
            .await?;
        let entries = value
            .as_array()
            .ok_or_else(|| Error::Decode("positionRisk: expected array".into()))?;

        let mut pair = PositionPair::flat(self.symbol.clone());
        for entry in entries {
            let amount = dec_field(entry, "positionAmt")?;
            let position = Position {
                symbol: self.symbol.clone(),
                size: amount.abs(),
                entry_price: dec_field(entry, "entryPrice")?,
                unrealized_pnl: dec_field(entry, "unRealizedProfit")?,
            };
            match entry.get("positionSide").and_then(Value::as_str) {
                Some("LONG") => pair.long = position,
                Some("SHORT") => pair.short = position,
                // one-way mode: the sign decides the side
                _ if amount >= Decimal::ZERO => pair.long = position,
                _ => pair.short = position,
            }
        }
        Ok(pair)
    }

    async fn fetch_balance(&self) -> Result<Decimal> {
        let value = self.signed(Method::GET, "/fapi/v2/balance", &[]).await?;
        let entries = value
            .as_array()
            .ok_or_else(|| Error::Decode("balance: expected array".into()))?;
        for entry in entries {
            if entry.get("asset").and_then(Value::as_str) == Some(QUOTE_ASSET) {
                return dec_field(entry, "availableBalance");
            }
        }
        Err(Error::Exchange(format!("no {QUOTE_ASSET} balance entry")))
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        let mut params = vec![
            ("symbol", request.symbol.to_string()),
            ("side", request.side.to_string()),
            ("quantity", request.quantity.to_string()),
            ("newClientOrderId", Uuid::new_v4().to_string()),
        ];
        match request.order_type {
            OrderType::Market => params.push(("type", "MARKET".to_string())),
            OrderType::Limit => {
                let price = request
                    .price
                    .ok_or_else(|| Error::Config("limit order without price".into()))?;
                params.push(("type", "LIMIT".to_string()));
                params.push(("price", price.to_string()));
                let tif = if request.post_only { "GTX" } else { "GTC" };
                params.push(("timeInForce", tif.to_string()));
            }
        }
        if request.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        let value = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
        parse_rest_order(&value)
    }

    async fn cancel_order(&self, order: &Order) -> Result<()> {
        self.signed(
            Method::DELETE,
            "/fapi/v1/order",
            &[
                ("symbol", order.symbol.to_string()),
                ("orderId", order.id.clone()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_leverage(&self, leverage: u32) -> Result<()> {
        self.signed(
            Method::POST,
            "/fapi/v1/leverage",
            &[
                ("symbol", self.symbol.to_string()),
                ("leverage", leverage.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn renew_session(&self) -> Result<()> {
        self.keyed(Method::PUT, "/fapi/v1/listenKey").await?;
        Ok(())
    }

    async fn private_events(&self) -> Result<EventStream<PrivateEvent>> {
        let listen_key = self.create_listen_key().await?;
        let url = format!("{}/ws/{}", self.ws_url(), listen_key);
        let (ws, _) = connect_async(&url)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        info!(exchange = self.name(), "private stream connected");

        let symbol = self.symbol.clone();
        Ok(pump(ws, move |text| parse_private_event(text, &symbol)))
    }

    async fn market_events(&self, symbol: &Symbol) -> Result<EventStream<MarketTick>> {
        let url = format!(
            "{}/ws/{}@aggTrade",
            self.ws_url(),
            symbol.as_str().to_lowercase()
        );
        let (ws, _) = connect_async(&url)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        info!(exchange = self.name(), %symbol, "market stream connected");

        Ok(pump(ws, parse_market_tick))
    }

    fn name(&self) -> &str {
        "binance"
    }
}

/// Drive a socket in a background task and expose it as an `EventStream`.
///
/// Pings are answered in-line; a decode failure is surfaced as a stream item
/// (the consumer decides to skip it) while close/transport failures end the
/// stream after one final error item.
fn pump<T, F>(ws: WsStream, parse: F) -> EventStream<T>
where
    T: Send + 'static,
    F: Fn(&str) -> Result<Option<T>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<T>>(256);
    tokio::spawn(async move {
        let (mut write, mut read) = ws.split();
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let item = match parse(&text) {
                        Ok(Some(item)) => Ok(item),
                        Ok(None) => continue,
                        Err(e) => Err(e),
                    };
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
                Ok(Message::Ping(payload)) => {
                    if write.send(Message::Pong(payload)).await.is_err() {
                        let _ = tx
                            .send(Err(Error::Transport("failed to answer ping".into())))
                            .await;
                        return;
                    }
                }
                Ok(Message::Close(frame)) => {
                    let _ = tx
                        .send(Err(Error::Transport(format!(
                            "closed by server: {frame:?}"
                        ))))
                        .await;
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx.send(Err(Error::Transport(e.to_string()))).await;
                    return;
                }
            }
        }
        let _ = tx
            .send(Err(Error::Transport("stream ended".into())))
            .await;
    });

    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

fn sign_query(secret: &str, query: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Classify one private stream payload.
///
/// Unknown-but-valid messages become `Ack` (ignored upstream); an expired
/// listen key is a transport error so the supervisor resyncs.
fn parse_private_event(text: &str, symbol: &Symbol) -> Result<Option<PrivateEvent>> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::Decode(format!("private event: {e}")))?;
    match value.get("e").and_then(Value::as_str) {
        Some("ORDER_TRADE_UPDATE") => {
            let payload = value
                .get("o")
                .ok_or_else(|| Error::Decode("ORDER_TRADE_UPDATE without payload".into()))?;
            let order = parse_stream_order(payload)?;
            Ok(Some(PrivateEvent::Order(OrderUpdate {
                order,
                fill_quantity: dec_field(payload, "l")?,
                sequence: u64_field(&value, "E")?,
            })))
        }
        Some("ACCOUNT_UPDATE") => {
            let payload = value
                .get("a")
                .ok_or_else(|| Error::Decode("ACCOUNT_UPDATE without payload".into()))?;
            Ok(Some(PrivateEvent::Account(parse_account_payload(
                payload,
                symbol,
                u64_field(&value, "E")?,
            )?)))
        }
        Some("listenKeyExpired") => Err(Error::Transport("listen key expired".into())),
        // margin calls, config changes, subscription acks
        _ => Ok(Some(PrivateEvent::Ack)),
    }
}

fn parse_account_payload(payload: &Value, symbol: &Symbol, sequence: u64) -> Result<AccountUpdate> {
    let mut update = AccountUpdate {
        symbol: symbol.clone(),
        balance: None,
        long: None,
        short: None,
        sequence,
    };

    if let Some(balances) = payload.get("B").and_then(Value::as_array) {
        for entry in balances {
            if entry.get("a").and_then(Value::as_str) == Some(QUOTE_ASSET) {
                update.balance = Some(dec_field(entry, "cw")?);
            }
        }
    }

    if let Some(positions) = payload.get("P").and_then(Value::as_array) {
        for entry in positions {
            if entry.get("s").and_then(Value::as_str) != Some(symbol.as_str()) {
                continue;
            }
            let amount = dec_field(entry, "pa")?;
            let position = Position {
                symbol: symbol.clone(),
                size: amount.abs(),
                entry_price: dec_field(entry, "ep")?,
                unrealized_pnl: dec_field(entry, "up")?,
            };
            match entry.get("ps").and_then(Value::as_str) {
                Some("LONG") => update.long = Some(position),
                Some("SHORT") => update.short = Some(position),
                _ if amount >= Decimal::ZERO => update.long = Some(position),
                _ => update.short = Some(position),
            }
        }
    }

    Ok(update)
}

/// One aggTrade message; subscription acks yield `None`.
fn parse_market_tick(text: &str) -> Result<Option<MarketTick>> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::Decode(format!("market event: {e}")))?;
    match value.get("e").and_then(Value::as_str) {
        Some("aggTrade") => {
            let millis = u64_field(&value, "T")? as i64;
            let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)
                .ok_or_else(|| Error::Decode(format!("bad trade time {millis}")))?;
            Ok(Some(MarketTick {
                symbol: Symbol::new(str_field(&value, "s")?),
                price: dec_field(&value, "p")?,
                quantity: dec_field(&value, "q")?,
                timestamp,
            }))
        }
        _ => Ok(None),
    }
}

/// Order from a user-stream ORDER_TRADE_UPDATE payload (short field names).
fn parse_stream_order(payload: &Value) -> Result<Order> {
    let price = dec_field(payload, "p")?;
    Ok(Order {
        id: u64_field(payload, "i")?.to_string(),
        symbol: Symbol::new(str_field(payload, "s")?),
        side: parse_side(str_field(payload, "S")?)?,
        order_type: parse_order_type(str_field(payload, "o")?)?,
        quantity: dec_field(payload, "q")?,
        price: (price != Decimal::ZERO).then_some(price),
        status: parse_status(str_field(payload, "X")?)?,
        filled_quantity: dec_field(payload, "z")?,
        updated_at_ms: u64_field(payload, "T")?,
    })
}

/// Order from a REST response (long field names).
fn parse_rest_order(value: &Value) -> Result<Order> {
    let price = dec_field(value, "price")?;
    Ok(Order {
        id: u64_field(value, "orderId")?.to_string(),
        symbol: Symbol::new(str_field(value, "symbol")?),
        side: parse_side(str_field(value, "side")?)?,
        order_type: parse_order_type(str_field(value, "type")?)?,
        quantity: dec_field(value, "origQty")?,
        price: (price != Decimal::ZERO).then_some(price),
        status: parse_status(str_field(value, "status")?)?,
        filled_quantity: dec_field(value, "executedQty")?,
        updated_at_ms: u64_field(value, "updateTime")?,
    })
}

fn parse_side(s: &str) -> Result<Side> {
    match s {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(Error::Decode(format!("unknown side {other}"))),
    }
}

fn parse_order_type(s: &str) -> Result<OrderType> {
    match s {
        "LIMIT" => Ok(OrderType::Limit),
        "MARKET" => Ok(OrderType::Market),
        other => Err(Error::Decode(format!("unsupported order type {other}"))),
    }
}

fn parse_status(s: &str) -> Result<OrderStatus> {
    match s {
        "NEW" => Ok(OrderStatus::Open),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" => Ok(OrderStatus::Cancelled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Expired),
        other => Err(Error::Decode(format!("unknown order status {other}"))),
    }
}

fn dec_field(value: &Value, key: &str) -> Result<Decimal> {
    let raw = value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Decode(format!("missing field {key}")))?;
    Decimal::from_str(raw).map_err(|e| Error::Decode(format!("bad decimal {key}: {e}")))
}

fn str_field<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Decode(format!("missing field {key}")))
}

fn u64_field(value: &Value, key: &str) -> Result<u64> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Decode(format!("missing field {key}")))
}
