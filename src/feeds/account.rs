//! Private account/order feed supervisor.
//!
//! State machine: Disconnected -> Resyncing -> Connected -> (error)
//! Disconnected. The loop never terminates on transient errors; only a
//! process-level shutdown stops it.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::core::{Error, ExchangeGateway, PrivateEvent, Result, Strategy};
use crate::engine::Reactor;
use crate::state::{self, SharedState};

/// Fixed wait before re-entering Resyncing after a transport error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Bound on queued-but-unapplied updates; the receive loop backpressures
/// instead of spawning one task per message under a burst.
const UPDATE_QUEUE_DEPTH: usize = 256;

pub struct AccountFeed {
    state: SharedState,
    gateway: Arc<dyn ExchangeGateway>,
    strategy: Arc<dyn Strategy>,
    reactor: Reactor,
}

impl AccountFeed {
    pub fn new(
        state: SharedState,
        gateway: Arc<dyn ExchangeGateway>,
        strategy: Arc<dyn Strategy>,
        reactor: Reactor,
    ) -> Self {
        Self {
            state,
            gateway,
            strategy,
            reactor,
        }
    }

    /// Reconnect loop. Unbounded: every failed cycle logs and backs off.
    pub async fn run(self) {
        loop {
            if let Err(e) = self.cycle().await {
                warn!(error = %e, "account feed disconnected");
            }
            info!(backoff = ?RECONNECT_BACKOFF, "account feed reconnecting");
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
    }

    /// One connection cycle: resync, prime the heartbeat, then stream.
    async fn cycle(&self) -> Result<()> {
        self.state.lock().clear_flags();
        state::resync(&self.state, &self.gateway, &self.strategy).await?;
        if let Err(e) = self.gateway.renew_session().await {
            warn!(error = %e, "priming session keep-alive failed");
        }

        let mut events = self.gateway.private_events().await?;
        info!(exchange = self.gateway.name(), "account feed connected");

        let (tx, rx) = mpsc::channel(UPDATE_QUEUE_DEPTH);
        let worker = tokio::spawn(apply_worker(
            Arc::clone(&self.state),
            self.reactor.clone(),
            rx,
        ));

        // Receive loop: classify and hand off without waiting for the
        // update to be applied.
        let outcome = loop {
            match events.next().await {
                Some(Ok(PrivateEvent::Ack)) => {}
                Some(Ok(event)) => {
                    if tx.send(event).await.is_err() {
                        break Err(Error::Transport("update worker stopped".into()));
                    }
                }
                Some(Err(e)) if e.is_decode() => {
                    warn!(error = %e, "dropping malformed account event");
                }
                Some(Err(e)) => break Err(e),
                None => break Err(Error::Transport("account stream ended".into())),
            }
        };

        drop(tx);
        let _ = worker.await;
        outcome
    }
}

/// Single-writer worker: applies updates in arrival order and schedules one
/// reaction whenever an applied update leaves both change flags set.
async fn apply_worker(
    state: SharedState,
    reactor: Reactor,
    mut rx: mpsc::Receiver<PrivateEvent>,
) {
    while let Some(event) = rx.recv().await {
        let trigger = {
            let mut store = state.lock();
            let applied = match event {
                PrivateEvent::Order(update) => store.apply_order_update(update),
                PrivateEvent::Account(update) => store.apply_account_update(update),
                PrivateEvent::Ack => false,
            };
            applied && store.take_reaction_trigger()
        };
        if trigger {
            let reactor = reactor.clone();
            tokio::spawn(async move {
                if let Err(e) = reactor.react().await {
                    error!(error = %e, "reaction failed");
                }
            });
        }
    }
}
