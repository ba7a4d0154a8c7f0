/*
[INPUT]:  A `NodeManager`-selected node URL plus a request body.
[OUTPUT]: A `ChainConnector` implementation that dials JSON-RPC nodes over
          HTTP, recording latency/failures back into the node pool.
[POS]:    Transport layer - reference ChainConnector implementation. The
          engine never depends on this type directly, only on the trait;
          it exists so the crate ships a working default.
[UPDATE]: When adding a new chain RPC call the engine needs.
*/

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::connector::{AccountBalance, AccountSnapshot, ChainConnector, FillEvent};
use crate::error::{ChainTransportError, Result};
use crate::node_manager::NodeManager;
use crate::types::{Asset, BroadcastResult, ChainId, ChainOp, OperationResult, RawChainOrder};
use crate::ws::SubscriptionFacade;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Reference `ChainConnector`: dials the node picked by `NodeManager`,
/// feeding latency and failures back into the pool so the next call can
/// route around a misbehaving node.
pub struct RpcChainClient {
    http: Client,
    nodes: Mutex<NodeManager>,
    ws: SubscriptionFacade,
}

impl RpcChainClient {
    pub fn new(node_urls: Vec<String>, ws_url: impl Into<String>) -> Result<Self> {
        Self::with_config(node_urls, ws_url, RpcClientConfig::default())
    }

    pub fn with_config(
        node_urls: Vec<String>,
        ws_url: impl Into<String>,
        config: RpcClientConfig,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(ChainTransportError::Http)?;

        Ok(Self {
            http,
            nodes: Mutex::new(NodeManager::new(node_urls)),
            ws: SubscriptionFacade::new(ws_url),
        })
    }

    fn pick_node(&self) -> Result<String> {
        let mut nodes = self.nodes.lock().expect("node manager mutex poisoned");
        nodes
            .best_node(Instant::now())
            .map(str::to_string)
            .ok_or(ChainTransportError::NoReachableNode)
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let node = self.pick_node()?;
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let started = Instant::now();
        let response = self.http.post(&node).json(&request).send().await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                self.record_failure(&node);
                return Err(ChainTransportError::Http(err));
            }
        };

        let parsed: JsonRpcResponse<T> = match response.json().await {
            Ok(p) => p,
            Err(err) => {
                self.record_failure(&node);
                return Err(ChainTransportError::Http(err));
            }
        };

        self.record_latency(&node, started.elapsed());

        if let Some(error) = parsed.error {
            warn!(node = %node, method, code = error.code, "rpc call rejected");
            return Err(ChainTransportError::Rpc {
                code: error.code.to_string(),
                message: error.message,
            });
        }

        parsed.result.ok_or_else(|| ChainTransportError::Rpc {
            code: "EMPTY_RESULT".to_string(),
            message: format!("{method} returned neither result nor error"),
        })
    }

    fn record_latency(&self, node: &str, latency: Duration) {
        self.nodes
            .lock()
            .expect("node manager mutex poisoned")
            .record_latency(node, latency);
        debug!(node, latency_ms = latency.as_millis(), "rpc call succeeded");
    }

    fn record_failure(&self, node: &str) {
        self.nodes
            .lock()
            .expect("node manager mutex poisoned")
            .record_failure(node, Instant::now());
    }
}

#[async_trait]
impl ChainConnector for RpcChainClient {
    async fn get_full_accounts(&self, account_ids: &[ChainId]) -> Result<Vec<AccountSnapshot>> {
        let ids: Vec<&str> = account_ids.iter().map(|id| id.0.as_str()).collect();
        let raw: Vec<RawAccountSnapshot> = self
            .call("get_full_accounts", json!([ids]))
            .await?;
        Ok(raw.into_iter().map(RawAccountSnapshot::into_snapshot).collect())
    }

    async fn get_limit_orders(
        &self,
        base_asset_id: &str,
        quote_asset_id: &str,
        depth: u32,
    ) -> Result<Vec<RawChainOrder>> {
        self.call(
            "get_limit_orders",
            json!([base_asset_id, quote_asset_id, depth]),
        )
        .await
    }

    async fn get_assets(&self, asset_ids: &[String]) -> Result<Vec<Asset>> {
        self.call("get_assets", json!([asset_ids])).await
    }

    async fn lookup_asset_symbols(&self, symbols: &[String]) -> Result<Vec<Asset>> {
        self.call("lookup_asset_symbols", json!([symbols])).await
    }

    async fn broadcast(
        &self,
        signer_account: &ChainId,
        ops: Vec<ChainOp>,
    ) -> Result<BroadcastResult> {
        let response: RawBroadcastResponse = self
            .call(
                "broadcast_transaction",
                json!({ "account": signer_account.0, "operations": ops }),
            )
            .await?;

        Ok(BroadcastResult {
            success: response
                .results
                .iter()
                .all(|r| !matches!(r, OperationResult::Failed { .. })),
            operation_results: response.results,
            transaction_id: response.transaction_id,
        })
    }

    async fn subscribe_account(
        &self,
        account_id: &ChainId,
    ) -> Result<tokio::sync::mpsc::UnboundedReceiver<FillEvent>> {
        Ok(self.ws.subscribe(&account_id.0).await)
    }
}

#[derive(Deserialize)]
struct RawAccountSnapshot {
    account_id: ChainId,
    balances: Vec<AccountBalance>,
    limit_orders: Vec<RawChainOrder>,
}

impl RawAccountSnapshot {
    fn into_snapshot(self) -> AccountSnapshot {
        AccountSnapshot {
            account_id: self.account_id,
            balances: self.balances,
            limit_orders: self.limit_orders,
        }
    }
}

#[derive(Deserialize)]
struct RawBroadcastResponse {
    results: Vec<OperationResult>,
    transaction_id: Option<String>,
}
