//! Local mirror of exchange-side state.
//!
//! The store is the sole writer of balance, position, orders and the two
//! change flags. It is wrapped in a mutex and mutated only between await
//! points; `resync` performs its fetches first and swaps the result in
//! under one lock acquisition.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::{
    AccountUpdate, ExchangeGateway, Order, OrderUpdate, PositionPair, Result, Strategy, Symbol,
};

pub type SharedState = Arc<Mutex<StateStore>>;

/// Bound on retained duplicate-suppression entries. Entries for orders no
/// longer in the open set are evicted oldest-sequence-first past this, so a
/// long-running re-quoting process cannot grow the map without limit.
const ORDER_SEQ_CAP: usize = 4096;

/// In-memory balance, position and open-order mirror for one symbol.
pub struct StateStore {
    symbol: Symbol,
    balance: Decimal,
    position: PositionPair,
    orders: HashMap<String, Order>,
    /// Last applied event sequence per order id, for duplicate suppression.
    order_seq: HashMap<String, u64>,
    /// Last applied account-update sequence.
    account_seq: u64,
    position_change: bool,
    order_fill_change: bool,
}

impl StateStore {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            position: PositionPair::flat(symbol.clone()),
            symbol,
            balance: Decimal::ZERO,
            orders: HashMap::new(),
            order_seq: HashMap::new(),
            account_seq: 0,
            position_change: false,
            order_fill_change: false,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn position(&self) -> &PositionPair {
        &self.position
    }

    /// Open orders sorted by id, cloned for the caller.
    pub fn open_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.values().cloned().collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        orders
    }

    /// Cloned snapshot for strategy evaluation.
    pub fn snapshot(&self) -> (Decimal, PositionPair, Vec<Order>) {
        (self.balance, self.position.clone(), self.open_orders())
    }

    pub fn flags(&self) -> (bool, bool) {
        (self.position_change, self.order_fill_change)
    }

    pub fn clear_flags(&mut self) {
        self.position_change = false;
        self.order_fill_change = false;
    }

    /// Replace orders, position and balance wholesale. Flags are cleared:
    /// the snapshot supersedes any incremental state accumulated so far.
    pub fn install_snapshot(
        &mut self,
        balance: Decimal,
        position: PositionPair,
        orders: Vec<Order>,
    ) {
        self.clear_flags();
        self.balance = balance;
        self.position = position;
        self.orders = orders.into_iter().map(|o| (o.id.clone(), o)).collect();
    }

    /// Apply one order/fill delta from the private feed.
    ///
    /// Idempotent under at-least-once delivery: an update whose sequence is
    /// not newer than the last applied one for that order id is a no-op.
    /// Returns whether the store changed.
    pub fn apply_order_update(&mut self, update: OrderUpdate) -> bool {
        if update.order.symbol != self.symbol {
            return false;
        }
        let last = self.order_seq.get(&update.order.id).copied().unwrap_or(0);
        if update.sequence <= last {
            debug!(order_id = %update.order.id, sequence = update.sequence, "duplicate order event");
            return false;
        }
        self.order_seq.insert(update.order.id.clone(), update.sequence);

        let mut changed = update.fill_quantity > Decimal::ZERO;
        if update.order.status.is_open() {
            match self.orders.get(&update.order.id) {
                Some(existing) if *existing == update.order => {}
                _ => {
                    self.orders.insert(update.order.id.clone(), update.order);
                    changed = true;
                }
            }
        } else {
            changed |= self.orders.remove(&update.order.id).is_some();
        }

        if changed {
            self.order_fill_change = true;
        }
        self.prune_order_seq();
        changed
    }

    /// Evict dedupe entries for closed orders once the map exceeds the cap.
    /// Oldest sequences go first; open orders always keep their entry.
    fn prune_order_seq(&mut self) {
        if self.order_seq.len() <= ORDER_SEQ_CAP {
            return;
        }
        let mut closed: Vec<(String, u64)> = self
            .order_seq
            .iter()
            .filter(|(id, _)| !self.orders.contains_key(*id))
            .map(|(id, seq)| (id.clone(), *seq))
            .collect();
        closed.sort_by_key(|(_, seq)| *seq);
        for (id, _) in closed {
            if self.order_seq.len() <= ORDER_SEQ_CAP {
                break;
            }
            self.order_seq.remove(&id);
        }
    }

    /// Apply one position/balance delta from the private feed.
    ///
    /// Last-write-wins per category; deltas for other symbols are ignored.
    /// Returns whether position size or balance changed.
    pub fn apply_account_update(&mut self, update: AccountUpdate) -> bool {
        if update.symbol != self.symbol {
            return false;
        }
        if update.sequence <= self.account_seq {
            debug!(sequence = update.sequence, "duplicate account event");
            return false;
        }
        self.account_seq = update.sequence;

        let mut changed = false;
        if let Some(balance) = update.balance {
            if balance != self.balance {
                self.balance = balance;
                changed = true;
            }
        }
        if let Some(long) = update.long {
            changed |= long.size != self.position.long.size;
            self.position.long = long;
        }
        if let Some(short) = update.short {
            changed |= short.size != self.position.short.size;
            self.position.short = short;
        }

        if changed {
            self.position_change = true;
        }
        changed
    }

    /// True iff both change flags are set; clears both when it fires.
    ///
    /// Clearing here means each reaction requires a fresh position change
    /// AND a fresh order/fill change, so a burst of one-sided updates after
    /// a reaction cannot re-trigger on its own.
    pub fn take_reaction_trigger(&mut self) -> bool {
        if self.position_change && self.order_fill_change {
            self.position_change = false;
            self.order_fill_change = false;
            true
        } else {
            false
        }
    }
}

/// Full-state refresh from the exchange, superseding incremental feed state.
///
/// Fetches run concurrently; any failure propagates so the caller re-enters
/// its reconnect backoff. On success the store is replaced wholesale and the
/// strategy is handed the fresh snapshot.
pub async fn resync(
    state: &SharedState,
    gateway: &Arc<dyn ExchangeGateway>,
    strategy: &Arc<dyn Strategy>,
) -> Result<()> {
    let (orders, position, balance) = tokio::try_join!(
        gateway.fetch_orders(),
        gateway.fetch_position(),
        gateway.fetch_balance(),
    )?;

    info!(
        balance = %balance,
        open_orders = orders.len(),
        long = %position.long.size,
        short = %position.short.size,
        "state resynced"
    );

    state
        .lock()
        .install_snapshot(balance, position.clone(), orders.clone());
    strategy.on_snapshot(balance, &position, &orders);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderStatus, Strategy};
    use crate::testkit::{MockGateway, MockStrategy, account_update, order, order_update};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn store() -> (Symbol, StateStore) {
        let symbol = Symbol::new("BTCUSDT");
        (symbol.clone(), StateStore::new(symbol))
    }

    #[test]
    fn duplicate_order_events_apply_once() {
        let (symbol, mut store) = store();
        let update = order_update(
            order("o1", &symbol, dec!(100), OrderStatus::Open),
            Decimal::ZERO,
            7,
        );

        assert!(store.apply_order_update(update.clone()));
        let after_one = store.open_orders();

        for _ in 0..5 {
            assert!(!store.apply_order_update(update.clone()));
        }
        assert_eq!(store.open_orders(), after_one);
    }

    #[test]
    fn stale_sequence_is_ignored() {
        let (symbol, mut store) = store();
        store.apply_order_update(order_update(
            order("o1", &symbol, dec!(100), OrderStatus::Filled),
            dec!(1),
            9,
        ));
        // a late replay of the earlier open state must not resurrect the order
        assert!(!store.apply_order_update(order_update(
            order("o1", &symbol, dec!(100), OrderStatus::Open),
            Decimal::ZERO,
            5,
        )));
        assert!(store.open_orders().is_empty());
    }

    #[test]
    fn fill_removes_from_open_set_and_flags() {
        let (symbol, mut store) = store();
        store.apply_order_update(order_update(
            order("o1", &symbol, dec!(100), OrderStatus::Open),
            Decimal::ZERO,
            1,
        ));
        store.clear_flags();

        assert!(store.apply_order_update(order_update(
            order("o1", &symbol, dec!(100), OrderStatus::Filled),
            dec!(1),
            2,
        )));
        assert!(store.open_orders().is_empty());
        assert_eq!(store.flags(), (false, true));
    }

    #[test]
    fn closed_order_dedupe_entries_are_bounded() {
        let (symbol, mut store) = store();
        let churn = ORDER_SEQ_CAP + 1000;
        for i in 0..churn {
            let id = format!("o{i}");
            let mut filled = order(&id, &symbol, dec!(100), OrderStatus::Filled);
            filled.filled_quantity = dec!(1);
            store.apply_order_update(order_update(filled, dec!(1), i as u64 + 1));
        }

        assert!(store.open_orders().is_empty());
        assert!(store.order_seq.len() <= ORDER_SEQ_CAP);
        // the newest entries survived eviction: a stale replay still drops
        let last = format!("o{}", churn - 1);
        assert!(!store.apply_order_update(order_update(
            order(&last, &symbol, dec!(100), OrderStatus::Open),
            Decimal::ZERO,
            1,
        )));
        assert!(store.open_orders().is_empty());
    }

    #[test]
    fn open_orders_keep_their_dedupe_entry_under_pressure() {
        let (symbol, mut store) = store();
        store.apply_order_update(order_update(
            order("live", &symbol, dec!(100), OrderStatus::Open),
            Decimal::ZERO,
            1,
        ));
        for i in 0..ORDER_SEQ_CAP + 10 {
            let mut filled = order(&format!("c{i}"), &symbol, dec!(100), OrderStatus::Filled);
            filled.filled_quantity = dec!(1);
            store.apply_order_update(order_update(filled, dec!(1), i as u64 + 2));
        }

        // eviction only touched closed orders
        assert!(store.order_seq.contains_key("live"));
        assert!(!store.apply_order_update(order_update(
            order("live", &symbol, dec!(100), OrderStatus::Open),
            Decimal::ZERO,
            1,
        )));
    }

    #[test]
    fn other_symbols_are_ignored() {
        let (_, mut store) = store();
        let other = Symbol::new("ETHUSDT");
        assert!(!store.apply_order_update(order_update(
            order("o1", &other, dec!(100), OrderStatus::Open),
            Decimal::ZERO,
            1,
        )));
        assert!(!store.apply_account_update(account_update(&other, dec!(1), 1)));
        assert_eq!(store.flags(), (false, false));
    }

    #[test]
    fn account_update_flags_only_real_changes() {
        let (symbol, mut store) = store();

        assert!(store.apply_account_update(account_update(&symbol, dec!(2), 1)));
        assert_eq!(store.flags(), (true, false));
        store.clear_flags();

        // same size again: position replaced (last write wins) but no flag
        assert!(!store.apply_account_update(account_update(&symbol, dec!(2), 2)));
        assert_eq!(store.flags(), (false, false));

        // balance delta flags it
        let mut update = account_update(&symbol, dec!(2), 3);
        update.balance = Some(dec!(500));
        assert!(store.apply_account_update(update));
        assert_eq!(store.balance(), dec!(500));
        assert_eq!(store.flags(), (true, false));
    }

    #[test]
    fn trigger_requires_both_flags_and_consumes_them() {
        let (symbol, mut store) = store();

        store.apply_account_update(account_update(&symbol, dec!(1), 1));
        assert!(!store.take_reaction_trigger());
        assert_eq!(store.flags(), (true, false));

        store.apply_order_update(order_update(
            order("o1", &symbol, dec!(100), OrderStatus::Filled),
            dec!(1),
            2,
        ));
        assert!(store.take_reaction_trigger());
        assert_eq!(store.flags(), (false, false));
        assert!(!store.take_reaction_trigger());
    }

    #[tokio::test]
    async fn resync_replaces_state_wholesale_and_clears_flags() {
        let symbol = Symbol::new("BTCUSDT");
        let gateway = std::sync::Arc::new(MockGateway::new(symbol.clone()));
        let strategy = std::sync::Arc::new(MockStrategy::new(Duration::from_secs(1)));
        let state: SharedState =
            std::sync::Arc::new(Mutex::new(StateStore::new(symbol.clone())));

        // stale incremental state that the snapshot must supersede
        {
            let mut s = state.lock();
            s.apply_account_update(account_update(&symbol, dec!(9), 1));
            s.apply_order_update(order_update(
                order("stale", &symbol, dec!(1), OrderStatus::Open),
                Decimal::ZERO,
                1,
            ));
        }

        *gateway.balance.lock() = dec!(321);
        gateway
            .orders
            .lock()
            .push(order("fresh", &symbol, dec!(100), OrderStatus::Open));

        resync(
            &state,
            &(gateway.clone() as std::sync::Arc<dyn ExchangeGateway>),
            &(strategy.clone() as std::sync::Arc<dyn Strategy>),
        )
        .await
        .unwrap();

        let s = state.lock();
        assert_eq!(s.balance(), dec!(321));
        assert_eq!(
            s.open_orders().iter().map(|o| o.id.as_str()).collect::<Vec<_>>(),
            vec!["fresh"]
        );
        assert_eq!(s.position().long.size, Decimal::ZERO);
        assert_eq!(s.flags(), (false, false));
        assert_eq!(strategy.snapshots.lock().len(), 1);
    }
}
