/*
[INPUT]:  CLI arguments (--bot, --pool, --precA, --precB, --interval,
          --lookback, --apiKey), the bot's YAML config file, OS shutdown
          signals, the chain fill stream.
[OUTPUT]: A running grid bot process: periodic maintenance ticks, fill
          consumption, graceful shutdown, distinct exit codes per failure mode.
[POS]:    Binary entry point - the one `gridbot` process per bot.
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling.
*/

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gridbot_chain::signer::SigningKey;
use gridbot_chain::types::{Asset, ChainId};
use gridbot_chain::{ChainConnector, NodeManager, RpcChainClient};
use gridbot_engine::chain_adapter::ChainAdapter;
use gridbot_engine::config::{BotConfig, FeesConfig};
use gridbot_engine::fees::{FeeCache, FeeProbe, OpFees};
use gridbot_engine::fill_processor::{FillProcessor, ProcessedFills};
use gridbot_engine::grid::{MasterGrid, Slot};
use gridbot_engine::store::{BotSnapshot, Store, StoredSlot};
use gridbot_engine::strategy::{PlanInputs, SideTargets, GRID_REGENERATION_PERCENTAGE};
use gridbot_engine::{Accountant, Bot, Side};

/// CLI surface, matching the flag names verbatim.
#[derive(Parser, Debug)]
#[command(name = "gridbot", version, about = "Per-bot grid market-making engine")]
struct Cli {
    #[arg(long = "bot", value_name = "NAME")]
    bot: String,
    #[arg(long = "pool", value_name = "ID")]
    pool: String,
    #[arg(long = "precA", value_name = "N")]
    prec_a: u8,
    #[arg(long = "precB", value_name = "N")]
    prec_b: u8,
    #[arg(long = "interval", value_name = "SECONDS")]
    interval: u64,
    #[arg(long = "lookback", value_name = "HOURS")]
    lookback: u64,
    #[arg(long = "apiKey", value_name = "BASE64")]
    api_key: String,
}

const EXIT_SUCCESS: i32 = 0;
const EXIT_FATAL_INIT: i32 = 1;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    if let Err(err) = init_tracing() {
        eprintln!("failed to initialize logging: {err:#}");
        std::process::exit(EXIT_FATAL_INIT);
    }

    match run(args).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(err) => {
            error!(error = %err, "fatal initialization failure");
            std::process::exit(EXIT_FATAL_INIT);
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

async fn run(args: Cli) -> anyhow::Result<()> {
    info!(bot = %args.bot, pool = %args.pool, "starting gridbot");

    // Key custody is explicitly out of scope; the engine only ever
    // holds this as an opaque handle to pass to a future Signer.
    let _signing_key = SigningKey(args.api_key.clone());

    let config_path = config_path_for(&args.bot)?;
    let config = BotConfig::from_file(
        config_path
            .to_str()
            .context("config path must be valid utf-8")?,
    )
    .with_context(|| format!("load config for bot '{}' from {}", args.bot, config_path.display()))?;

    let ws_url = config
        .nodes
        .urls
        .first()
        .cloned()
        .context("no node endpoints configured")?;
    // NodeManager's latency ranking feeds ChainAdapter's rotation-fallback
    // recheck in steady state; at startup we only need one endpoint.
    let _node_manager = NodeManager::new(config.nodes.urls.clone());
    let connector: Arc<dyn ChainConnector> =
        Arc::new(RpcChainClient::new(config.nodes.urls.clone(), ws_url).context("build chain client")?);

    let assets = connector
        .lookup_asset_symbols(&[config.base_symbol.clone(), config.quote_symbol.clone()])
        .await
        .context("resolve asset precision")?;
    let base_asset = find_asset(&assets, &config.base_symbol)
        .with_context(|| format!("base asset '{}' not returned by lookup_asset_symbols", config.base_symbol))?
        .clone();
    let quote_asset = find_asset(&assets, &config.quote_symbol)
        .with_context(|| format!("quote asset '{}' not returned by lookup_asset_symbols", config.quote_symbol))?
        .clone();

    if base_asset.precision != args.prec_a || quote_asset.precision != args.prec_b {
        return Err(anyhow!(
            "unresolved asset precision: expected ({}, {}), chain reports ({}, {})",
            args.prec_a,
            args.prec_b,
            base_asset.precision,
            quote_asset.precision,
        ));
    }

    let fee_cache = build_fee_cache(&config);
    let is_bts_buy = config.base_symbol == config.network_fee_symbol;
    let is_bts_sell = config.quote_symbol == config.network_fee_symbol;
    let mut accountant = Accountant::new(config.bts_reservation, is_bts_buy, is_bts_sell);

    let store = Store::new(config.persistence_path.clone());
    let prior = store.load_bot(&args.bot).await?;
    let master = build_master_grid(prior.as_ref());
    if let Some(snapshot) = &prior {
        accountant.modify_cache_funds(Side::Buy, snapshot.cache_funds.buy, "restored from snapshot");
        accountant.modify_cache_funds(Side::Sell, snapshot.cache_funds.sell, "restored from snapshot");
        accountant.set_bts_fees_owed(snapshot.bts_fees_owed);
    }

    let account_id = ChainId::new(args.pool.clone());
    let accounts = connector
        .get_full_accounts(std::slice::from_ref(&account_id))
        .await
        .context("fetch initial account balances")?;
    if let Some(account) = accounts.into_iter().next() {
        // BUY orders spend the quote asset; SELL orders spend the base
        // asset (`Side`'s home asset is what a fill on that side's
        // orders consumes, not what it receives - see FillProcessor::apply_fill).
        let buy_free = balance_of(&account.balances, &quote_asset.id, quote_asset.precision);
        let sell_free = balance_of(&account.balances, &base_asset.id, base_asset.precision);
        accountant.set_account_totals(buy_free, sell_free);
    } else {
        warn!(account = %account_id, "chain returned no balances for this account");
    }

    let pair = gridbot_chain::types::AssetPair::new(base_asset.clone(), quote_asset.clone());
    let mut bot = Bot::new(
        account_id.clone(),
        master,
        accountant,
        connector.clone(),
        pair,
        config.grid.order_expiration_secs,
    );

    let shutdown = CancellationToken::new();
    install_signal_handlers(shutdown.clone());

    let mut fill_rx = connector
        .subscribe_account(&account_id)
        .await
        .context("subscribe to account fill stream")?;

    let fill_processor = FillProcessor::new(config.allow_smaller_chain_size);
    let mut processed = ProcessedFills::new();

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    info!(lookback_hours = args.lookback, "entering maintenance loop");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                check_fund_drift(connector.as_ref(), &account_id, &base_asset, &quote_asset, &mut bot).await;
                match fetch_market_price(connector.as_ref(), &base_asset, &quote_asset).await {
                    Ok(market_price) => {
                        let inputs = build_plan_inputs(&config, &bot, market_price, base_asset.precision);
                        if let Err(err) = bot.maintenance_tick(Some(inputs)).await {
                            warn!(error = %err, "maintenance tick failed");
                        }
                    }
                    Err(err) => warn!(error = %err, "market price unavailable this tick"),
                }
                persist_snapshot(&store, &args.bot, &bot).await;
            }
            event = fill_rx.recv() => {
                match event {
                    Some(event) => {
                        handle_fill(&mut bot, &fill_processor, &mut processed, event, &fee_cache, &base_asset, &quote_asset).await;
                        persist_snapshot(&store, &args.bot, &bot).await;
                    }
                    None => {
                        warn!("fill stream closed; resubscribing");
                        match connector.subscribe_account(&account_id).await {
                            Ok(rx) => fill_rx = rx,
                            Err(err) => {
                                error!(error = %err, "failed to resubscribe to fill stream");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    persist_snapshot(&store, &args.bot, &bot).await;
    info!("gridbot shutdown complete");
    Ok(())
}

fn config_path_for(bot: &str) -> anyhow::Result<PathBuf> {
    let dir = dirs::config_dir()
        .map(|d| d.join("gridbot"))
        .context("resolve platform config directory")?;
    Ok(dir.join(format!("{bot}.yaml")))
}

fn find_asset<'a>(assets: &'a [Asset], symbol: &str) -> Option<&'a Asset> {
    assets.iter().find(|a| a.symbol == symbol)
}

fn balance_of(balances: &[gridbot_chain::AccountBalance], asset_id: &str, precision: u8) -> Decimal {
    balances
        .iter()
        .find(|b| b.asset_id == asset_id)
        .map(|b| gridbot_engine::precision::to_float(b.amount, precision))
        .unwrap_or(Decimal::ZERO)
}

fn build_fee_cache(config: &BotConfig) -> FeeCache {
    let fees: &FeesConfig = &config.fees;
    let probe = FeeProbe {
        maker_fee_percent: fees.maker_fee_percent,
        taker_fee_percent_direct: Some(fees.taker_fee_percent),
        taker_fee_percent_extension: fees.taker_fee_percent_extension,
    };
    let mut cache = FeeCache::new();
    cache.initialize(
        [
            (config.base_symbol.clone(), probe),
            (config.quote_symbol.clone(), probe),
        ],
        config.network_fee_symbol.clone(),
        OpFees {
            create: fees.op_fee_create,
            cancel: fees.op_fee_cancel,
            update: fees.op_fee_update,
        },
    );
    cache
}

fn build_master_grid(prior: Option<&BotSnapshot>) -> MasterGrid {
    match prior {
        Some(snapshot) => {
            let slots: Vec<Slot> = snapshot.grid.iter().map(Slot::from).collect();
            MasterGrid::new(snapshot.boundary_idx, slots)
        }
        None => MasterGrid::new(0, Vec::new()),
    }
}

fn build_plan_inputs(config: &BotConfig, bot: &Bot, market_price: Decimal, precision: u8) -> PlanInputs {
    PlanInputs {
        market_price,
        increment_percent: config.grid.increment_percent,
        buy: SideTargets {
            count: config.grid.buy_count,
            weight: config.grid.weight_exponent,
            budget: bot.accountant().available(Side::Buy),
        },
        sell: SideTargets {
            count: config.grid.sell_count,
            weight: config.grid.weight_exponent,
            budget: bot.accountant().available(Side::Sell),
        },
        min_order_size: config.grid.min_order_size,
        precision,
        regeneration_threshold: GRID_REGENERATION_PERCENTAGE,
    }
}

/// Market price from the best-of-book on each side of the pair, since
/// `ChainConnector` exposes `get_limit_orders` but not a dedicated
/// ticker/pool price method (those stay behind the out-of-scope
/// `PriceOracle` collaborator).
async fn fetch_market_price(
    connector: &dyn ChainConnector,
    base: &Asset,
    quote: &Asset,
) -> anyhow::Result<Decimal> {
    let sells = connector.get_limit_orders(&base.id, &quote.id, 1).await?;
    let buys = connector.get_limit_orders(&quote.id, &base.id, 1).await?;

    let mut prices = Vec::new();
    if let Some(raw) = sells.first() {
        if let Some((price, _, _)) = ChainAdapter::parse_chain_order(raw, base, quote) {
            prices.push(price);
        }
    }
    if let Some(raw) = buys.first() {
        if let Some((price, _, _)) = ChainAdapter::parse_chain_order(raw, base, quote) {
            prices.push(price);
        }
    }

    if prices.is_empty() {
        return Err(anyhow!("no open orders on either side of the book"));
    }
    Ok(prices.iter().copied().sum::<Decimal>() / Decimal::from(prices.len()))
}

/// Re-fetches chain balances and checks them against the grid's expected
/// committed totals on both sides, as a post-fill drift check. A drift
/// beyond tolerance is latched on the accountant and forces a recovery
/// sync on the next `maintenance_tick`.
async fn check_fund_drift(
    connector: &dyn ChainConnector,
    account_id: &ChainId,
    base: &Asset,
    quote: &Asset,
    bot: &mut Bot,
) {
    let accounts = match connector.get_full_accounts(std::slice::from_ref(account_id)).await {
        Ok(accounts) => accounts,
        Err(err) => {
            warn!(error = %err, "skipping fund drift check; balance fetch failed");
            return;
        }
    };
    let Some(account) = accounts.into_iter().next() else {
        return;
    };

    let buy_actual = balance_of(&account.balances, &quote.id, quote.precision);
    let sell_actual = balance_of(&account.balances, &base.id, base.precision);
    bot.check_fund_drift(Side::Buy, buy_actual, quote.precision);
    bot.check_fund_drift(Side::Sell, sell_actual, base.precision);
}

async fn handle_fill(
    bot: &mut Bot,
    processor: &FillProcessor,
    processed: &mut ProcessedFills,
    event: gridbot_chain::FillEvent,
    fees: &FeeCache,
    base: &Asset,
    quote: &Asset,
) {
    let now = std::time::Instant::now();
    let batch = processor.dedup_batch(vec![event], &*processed);
    let Some(event) = batch.into_iter().next() else {
        return;
    };

    let Some((slot_id, slot_type)) = processor.match_fill(&event, bot.master(), base, quote) else {
        warn!(order_id = %event.order_id, "fill matched no known slot");
        return;
    };

    // A filled BUY order receives base; a filled SELL receives quote.
    let received_symbol = match slot_type {
        gridbot_engine::grid::SlotType::Buy => &base.symbol,
        _ => &quote.symbol,
    };
    let receive_precision = match slot_type {
        gridbot_engine::grid::SlotType::Buy => base.precision,
        _ => quote.precision,
    };

    let fill_match = processor.apply_fill(
        &event,
        &slot_id,
        slot_type,
        bot.accountant_mut(),
        fees,
        received_symbol,
        receive_precision,
    );

    let new_boundary_idx = bot.master().price_order_index(&fill_match.slot_id);
    if new_boundary_idx.is_none() {
        warn!(slot_id = %fill_match.slot_id, "filled slot missing from master grid; boundary left unchanged");
    }
    if let Err(err) = bot
        .apply_fill_matches(&[fill_match.slot_id.clone()], new_boundary_idx)
        .await
    {
        warn!(error = %err, slot_id = %fill_match.slot_id, "failed to commit fill boundary update");
    }

    processor.mark_processed(std::slice::from_ref(&event), processed, now);
}

async fn persist_snapshot(store: &Store, bot_key: &str, bot: &Bot) {
    let master = bot.master().clone();
    let accountant_buy_cache = bot.accountant().cache_funds(Side::Buy);
    let accountant_sell_cache = bot.accountant().cache_funds(Side::Sell);
    let bot_key_owned = bot_key.to_string();

    let result = store
        .update_bot(&bot_key_owned, move |snapshot| {
            snapshot.grid = master.iter().map(StoredSlot::from).collect();
            snapshot.boundary_idx = master.boundary_idx;
            snapshot.cache_funds.buy = accountant_buy_cache;
            snapshot.cache_funds.sell = accountant_sell_cache;
        })
        .await;

    if let Err(err) = result {
        error!(error = %err, "failed to persist bot snapshot");
    }
}

fn install_signal_handlers(shutdown: CancellationToken) {
    let sigint = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        sigint.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    sigterm.cancel();
                }
                Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
            }
        });
    }
}
