//! Shared mocks for feed, reactor and state tests.

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::core::{
    AccountUpdate, Candle, Error, EventStream, ExchangeGateway, MarketTick, Order, OrderRequest,
    OrderStatus, OrderType, OrderUpdate, Position, PositionPair, PrivateEvent, Result, Side,
    Strategy, Symbol,
};

/// One scripted private-feed connection attempt: `Err` fails the connect,
/// `Ok(items)` yields the items and then leaves the stream open.
pub type PrivateScript = std::result::Result<Vec<Result<PrivateEvent>>, String>;

pub struct MockGateway {
    pub symbol: Symbol,
    pub orders: Mutex<Vec<Order>>,
    pub position: Mutex<PositionPair>,
    pub balance: Mutex<Decimal>,
    pub created: Mutex<Vec<OrderRequest>>,
    pub cancel_attempts: Mutex<Vec<String>>,
    pub failing_cancels: Mutex<HashSet<String>>,
    pub private_scripts: Mutex<VecDeque<PrivateScript>>,
    pub private_attempts: AtomicUsize,
    pub market_attempts: AtomicUsize,
    /// Number of upcoming market connects to refuse before one succeeds.
    pub failing_market_connects: AtomicUsize,
    pub renewals: AtomicUsize,
    pub renew_fails: AtomicBool,
    pub leverage: Mutex<Option<u32>>,
    market_tx: Mutex<Option<mpsc::Sender<Result<MarketTick>>>>,
}

impl MockGateway {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            position: Mutex::new(PositionPair::flat(symbol.clone())),
            symbol,
            orders: Mutex::new(Vec::new()),
            balance: Mutex::new(dec!(1000)),
            created: Mutex::new(Vec::new()),
            cancel_attempts: Mutex::new(Vec::new()),
            failing_cancels: Mutex::new(HashSet::new()),
            private_scripts: Mutex::new(VecDeque::new()),
            private_attempts: AtomicUsize::new(0),
            market_attempts: AtomicUsize::new(0),
            failing_market_connects: AtomicUsize::new(0),
            renewals: AtomicUsize::new(0),
            renew_fails: AtomicBool::new(false),
            leverage: Mutex::new(None),
            market_tx: Mutex::new(None),
        }
    }

    pub fn push_private_script(&self, script: PrivateScript) {
        self.private_scripts.lock().push_back(script);
    }

    /// Wait until the market feed has connected and grab its tick sender.
    pub async fn market_sender(&self) -> mpsc::Sender<Result<MarketTick>> {
        loop {
            if let Some(tx) = self.market_tx.lock().clone() {
                return tx;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn fetch_orders(&self) -> Result<Vec<Order>> {
        Ok(self.orders.lock().clone())
    }

    async fn fetch_position(&self) -> Result<PositionPair> {
        Ok(self.position.lock().clone())
    }

    async fn fetch_balance(&self) -> Result<Decimal> {
        Ok(*self.balance.lock())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        self.created.lock().push(request.clone());
        Ok(Order {
            id: format!("mock-{}", self.created.lock().len()),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            status: OrderStatus::Open,
            filled_quantity: Decimal::ZERO,
            updated_at_ms: 0,
        })
    }

    async fn cancel_order(&self, order: &Order) -> Result<()> {
        self.cancel_attempts.lock().push(order.id.clone());
        if self.failing_cancels.lock().contains(&order.id) {
            return Err(Error::Exchange(format!("order {} not found", order.id)));
        }
        Ok(())
    }

    async fn set_leverage(&self, leverage: u32) -> Result<()> {
        *self.leverage.lock() = Some(leverage);
        Ok(())
    }

    async fn renew_session(&self) -> Result<()> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        if self.renew_fails.load(Ordering::SeqCst) {
            return Err(Error::Exchange("keep-alive rejected".into()));
        }
        Ok(())
    }

    async fn private_events(&self) -> Result<EventStream<PrivateEvent>> {
        self.private_attempts.fetch_add(1, Ordering::SeqCst);
        match self.private_scripts.lock().pop_front() {
            Some(Err(reason)) => Err(Error::Transport(reason)),
            Some(Ok(items)) => Ok(stream::iter(items).chain(stream::pending()).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }

    async fn market_events(&self, _symbol: &Symbol) -> Result<EventStream<MarketTick>> {
        self.market_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_market_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_market_connects
                .store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Transport("connect refused".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.market_tx.lock() = Some(tx);
        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub struct MockStrategy {
    pub interval: Duration,
    pub decide_calls: AtomicUsize,
    pub snapshots: Mutex<Vec<(Decimal, PositionPair, Vec<Order>)>>,
    pub decisions: Mutex<Vec<(Decimal, PositionPair, Vec<Order>, usize)>>,
    pub to_create: Mutex<Vec<OrderRequest>>,
    pub to_cancel: Mutex<Vec<Order>>,
}

impl MockStrategy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            decide_calls: AtomicUsize::new(0),
            snapshots: Mutex::new(Vec::new()),
            decisions: Mutex::new(Vec::new()),
            to_create: Mutex::new(Vec::new()),
            to_cancel: Mutex::new(Vec::new()),
        }
    }
}

impl Strategy for MockStrategy {
    fn name(&self) -> &str {
        "mock"
    }

    fn call_interval(&self) -> Duration {
        self.interval
    }

    fn on_snapshot(&self, balance: Decimal, position: &PositionPair, orders: &[Order]) {
        self.snapshots
            .lock()
            .push((balance, position.clone(), orders.to_vec()));
    }

    fn decide(
        &self,
        balance: Decimal,
        position: &PositionPair,
        orders: &[Order],
        prices: &[Candle],
    ) -> Result<(Vec<OrderRequest>, Vec<Order>)> {
        self.decide_calls.fetch_add(1, Ordering::SeqCst);
        self.decisions
            .lock()
            .push((balance, position.clone(), orders.to_vec(), prices.len()));
        Ok((self.to_create.lock().clone(), self.to_cancel.lock().clone()))
    }
}

pub fn order(id: &str, symbol: &Symbol, price: Decimal, status: OrderStatus) -> Order {
    Order {
        id: id.to_string(),
        symbol: symbol.clone(),
        side: Side::Buy,
        order_type: OrderType::Limit,
        quantity: dec!(1),
        price: Some(price),
        status,
        filled_quantity: Decimal::ZERO,
        updated_at_ms: 0,
    }
}

pub fn order_update(order: Order, fill_quantity: Decimal, sequence: u64) -> OrderUpdate {
    OrderUpdate {
        order,
        fill_quantity,
        sequence,
    }
}

pub fn position(symbol: &Symbol, size: Decimal) -> Position {
    Position {
        symbol: symbol.clone(),
        size,
        entry_price: dec!(100),
        unrealized_pnl: Decimal::ZERO,
    }
}

pub fn account_update(symbol: &Symbol, long_size: Decimal, sequence: u64) -> AccountUpdate {
    AccountUpdate {
        symbol: symbol.clone(),
        balance: None,
        long: Some(position(symbol, long_size)),
        short: None,
        sequence,
    }
}

pub fn tick(symbol: &Symbol, price: Decimal, at: chrono::DateTime<chrono::Utc>) -> MarketTick {
    MarketTick {
        symbol: symbol.clone(),
        price,
        quantity: dec!(1),
        timestamp: at,
    }
}
