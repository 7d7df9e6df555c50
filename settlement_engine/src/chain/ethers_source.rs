use chrono::Utc;
use ethers::{
    providers::{Http, Middleware, Provider, Ws},
    types::{Address, BlockNumber, Filter, ValueOrArray, H256, U64},
};
use futures_util::StreamExt;
use log::*;
use tokio::sync::{mpsc, oneshot};

use crate::{
    chain::{ChainError, ChainEventEnvelope, ChainEventKind, ChainEventSource, EventSubscription},
    db_types::ChainBookingId,
};

const SUBSCRIPTION_BUFFER: usize = 256;

/// A [`ChainEventSource`] backed by a JSON-RPC node: WebSocket for the live subscription, HTTP for queries.
///
/// Every call to [`subscribe`](ChainEventSource::subscribe) opens a fresh WebSocket connection, so a dead transport
/// is replaced by simply subscribing again.
#[derive(Clone)]
pub struct EthersChainSource {
    ws_url: String,
    http: Provider<Http>,
    contract: Address,
}

impl std::fmt::Debug for EthersChainSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EthersChainSource({}, contract {:#x})", self.ws_url, self.contract)
    }
}

impl EthersChainSource {
    pub fn new(ws_url: &str, http_url: &str, contract: Address) -> Result<Self, ChainError> {
        let http = Provider::<Http>::try_from(http_url)
            .map_err(|e| ChainError::Configuration(format!("Invalid HTTP RPC url {http_url}: {e}")))?;
        Ok(Self { ws_url: ws_url.to_string(), http, contract })
    }

    fn event_filter(&self) -> Filter {
        let topics = ChainEventKind::ALL.iter().map(|k| Some(k.topic())).collect::<Vec<Option<H256>>>();
        Filter::new().address(self.contract).topic0(ValueOrArray::Array(topics))
    }
}

impl ChainEventSource for EthersChainSource {
    async fn subscribe(&self) -> Result<EventSubscription, ChainError> {
        debug!("🔗️ Connecting to {}", self.ws_url);
        let provider =
            Provider::<Ws>::connect(self.ws_url.as_str()).await.map_err(|e| ChainError::Connection(e.to_string()))?;
        let filter = self.event_filter();
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();
        // The log stream borrows the provider, so both live in the forwarding task.
        tokio::spawn(async move {
            let mut stream = match provider.subscribe_logs(&filter).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                },
                Err(e) => {
                    let _ = ready_tx.send(Err(ChainError::Subscription(e.to_string())));
                    return;
                },
            };
            while let Some(log) = stream.next().await {
                if log.removed.unwrap_or(false) {
                    warn!("🔗️ Ignoring log removed by a chain reorganisation: {:?}", log.transaction_hash);
                    continue;
                }
                match ChainEventEnvelope::from_log(&log, Utc::now()) {
                    Ok(envelope) => {
                        trace!("🔗️ {} received for booking {}", envelope.kind(), envelope.booking_id());
                        if sender.send(Ok(envelope)).await.is_err() {
                            debug!("🔗️ Subscriber has gone away. Closing log stream.");
                            return;
                        }
                    },
                    Err(e) => warn!("🔗️ Skipping undecodable log in tx {:?}: {e}", log.transaction_hash),
                }
            }
            info!("🔗️ Log stream ended");
        });
        match ready_rx.await {
            Ok(Ok(())) => {
                info!("🔗️ Subscribed to escrow events on {:#x}", self.contract);
                Ok(EventSubscription::new(receiver))
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ChainError::Subscription("Subscription task ended before it was ready".into())),
        }
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let n = self.http.get_block_number().await.map_err(|e| ChainError::Query(e.to_string()))?;
        Ok(n.as_u64())
    }

    async fn completion_events(
        &self,
        booking_id: ChainBookingId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChainEventEnvelope>, ChainError> {
        let filter = Filter::new()
            .address(self.contract)
            .topic0(ValueOrArray::Value(Some(ChainEventKind::ServiceCompleted.topic())))
            .topic1(ValueOrArray::Value(Some(booking_id.as_h256())))
            .from_block(BlockNumber::Number(U64::from(from_block)))
            .to_block(BlockNumber::Number(U64::from(to_block)));
        let logs = self.http.get_logs(&filter).await.map_err(|e| ChainError::Query(e.to_string()))?;
        trace!("🔗️ {} completion logs found for {booking_id} in blocks {from_block}..={to_block}", logs.len());
        let now = Utc::now();
        logs.iter()
            .filter(|log| !log.removed.unwrap_or(false))
            .map(|log| ChainEventEnvelope::from_log(log, now))
            .collect()
    }
}
