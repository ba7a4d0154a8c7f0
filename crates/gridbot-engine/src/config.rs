/*
[INPUT]:  YAML configuration file named by the CLI's `--pool`-adjacent
          bot setup (grid sizing, node list, fee/reserve parameters).
[OUTPUT]: `BotConfig`, the parsed, validated shape `main.rs` hands to
          every component at startup.
[POS]:    Configuration layer - loaded once in `main`, then read-only.
[UPDATE]: When a new tunable is added to the grid or node pool.
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level bot configuration: the runtime tunables that aren't part
/// of the CLI args, loaded alongside the persisted snapshot layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotConfig {
    /// Base/quote asset symbols for `lookup_asset_symbols` at startup.
    pub base_symbol: String,
    pub quote_symbol: String,
    /// Symbol whose chain fees are paid in the network-fee asset
    /// (usually the protocol token, e.g. "BTS").
    pub network_fee_symbol: String,
    pub grid: GridConfig,
    pub nodes: NodeConfig,
    pub fees: FeesConfig,
    /// Fraction of the network-fee asset reserved against chain fees,
    /// read by `Accountant::new`'s `bts_reservation` parameter.
    pub bts_reservation: Decimal,
    /// `allow_smaller_chain_size`: whether a filled size strictly
    /// smaller than the grid slot still counts as a match.
    #[serde(default)]
    pub allow_smaller_chain_size: bool,
    /// Path to this bot's persisted snapshot file.
    pub persistence_path: String,
}

/// Grid sizing and allocation parameters driving `strategy::PlanInputs`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GridConfig {
    pub buy_count: usize,
    pub sell_count: usize,
    /// Exponent applied per-tier distance from the boundary when
    /// weighting fund allocation, per `allocate_funds_by_weights`.
    pub weight_exponent: Decimal,
    /// Geometric spacing between adjacent slot prices.
    pub increment_percent: Decimal,
    /// Minimum order size below which an allocated unit rolls into
    /// cache-funds residue instead of a slot.
    pub min_order_size: Decimal,
    /// Lifetime given to every `limit_order_create`/`limit_order_update`
    /// op's `expiration` field, in seconds from broadcast time.
    #[serde(default = "default_order_expiration_secs")]
    pub order_expiration_secs: i64,
}

fn default_order_expiration_secs() -> i64 {
    60 * 60 * 24 * 365
}

/// Node pool endpoints handed to `gridbot_chain::NodeManager`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    pub urls: Vec<String>,
}

/// Seeds `FeeCache::initialize`'s one-probe-per-asset-plus-op-fees
/// startup call. The chain transport has no fee-discovery
/// method in scope, so these come from config rather than a probe
/// round-trip.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeesConfig {
    pub maker_fee_percent: Decimal,
    pub taker_fee_percent: Decimal,
    /// An extension-carried override, when present,
    /// wins over the direct `taker_fee_percent` above.
    #[serde(default)]
    pub taker_fee_percent_extension: Option<Decimal>,
    pub op_fee_create: i64,
    pub op_fee_cancel: i64,
    pub op_fee_update: i64,
}

impl BotConfig {
    /// Load configuration from a YAML file (teacher's
    /// `StrategyConfig::from_file` pattern).
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
base_symbol: BTC
quote_symbol: USD
network_fee_symbol: BTS
bts_reservation: "0.01"
persistence_path: "/tmp/bot.json"
grid:
  buy_count: 3
  sell_count: 3
  weight_exponent: "1.0"
  increment_percent: "0.01"
  min_order_size: "1"
nodes:
  urls:
    - "wss://node-a.example.com"
    - "wss://node-b.example.com"
fees:
  maker_fee_percent: "0.001"
  taker_fee_percent: "0.002"
  op_fee_create: 1000000
  op_fee_cancel: 0
  op_fee_update: 1000000
"#;
        let config: BotConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.grid.buy_count, 3);
        assert_eq!(config.nodes.urls.len(), 2);
        assert!(!config.allow_smaller_chain_size);
    }
}
