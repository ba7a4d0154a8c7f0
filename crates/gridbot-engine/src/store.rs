/*
[INPUT]:  Grid/fund state to persist after a commit; bot key to reload.
[OUTPUT]: `Store`, a per-bot JSON snapshot file serialized through an
          `AsyncLock`, atomic tmp-then-rename writes.
[POS]:    Persistence layer - the only component that touches disk.
[UPDATE]: When the snapshot schema gains a field.
*/

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::async_lock::{AcquireOptions, AsyncLock};
use crate::error::{GridError, Result};
use crate::fill_processor::DEFAULT_PROCESSED_FILL_TTL;
use crate::grid::{Slot, SlotId, SlotState, SlotType};

/// Wire-shape counterpart of `Slot`: VIRTUAL/SPREAD slots always
/// serialize `order_id` as `""` rather than omitting it, so the slot id
/// is never mistaken for an order id downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSlot {
    pub id: SlotId,
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    pub state: SlotState,
    pub price: Decimal,
    pub size: Decimal,
    pub order_id: String,
}

impl From<&Slot> for StoredSlot {
    fn from(slot: &Slot) -> Self {
        let order_id = match slot.state {
            SlotState::Active | SlotState::Partial => {
                slot.order_id.as_ref().map(|id| id.0.clone()).unwrap_or_default()
            }
            SlotState::Virtual => String::new(),
        };
        Self {
            id: slot.id.clone(),
            slot_type: slot.slot_type,
            state: slot.state,
            price: slot.price,
            size: slot.size,
            order_id,
        }
    }
}

impl From<&StoredSlot> for Slot {
    fn from(stored: &StoredSlot) -> Self {
        let order_id = if stored.order_id.is_empty() {
            None
        } else {
            Some(gridbot_chain::types::ChainId::new(stored.order_id.clone()))
        };
        Slot {
            id: stored.id.clone(),
            slot_type: stored.slot_type,
            state: stored.state,
            price: stored.price,
            size: stored.size,
            order_id,
            raw_on_chain: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheFunds {
    pub buy: Decimal,
    pub sell: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSnapshot {
    pub meta: serde_json::Value,
    pub grid: Vec<StoredSlot>,
    #[serde(default)]
    pub cache_funds: CacheFunds,
    #[serde(default)]
    pub bts_fees_owed: Decimal,
    pub boundary_idx: usize,
    pub assets: serde_json::Value,
    #[serde(default)]
    pub double_side_flags: HashMap<String, bool>,
    #[serde(default)]
    pub processed_fills: HashMap<String, u64>,
    pub last_updated: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FileShape {
    #[serde(flatten)]
    bots: HashMap<String, BotSnapshot>,
}

/// Per-bot persistent snapshot store: one JSON file on disk, all writes
/// reload-then-mutate under an `AsyncLock` so two distinct bot keys
/// never race and a bot writing its own file is linearized.
pub struct Store {
    path: PathBuf,
    lock: AsyncLock<()>,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: AsyncLock::new(()),
        }
    }

    fn read_file(&self) -> Result<FileShape> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(FileShape::default()),
            Err(err) => Err(GridError::Io(err)),
        }
    }

    fn write_file(path: &Path, shape: &FileShape) -> Result<()> {
        let mut serialized = serde_json::to_string_pretty(shape)?;
        serialized.push('\n');
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Reload the file, apply `mutate` to the bot's entry (inserting a
    /// default-shaped entry if absent), and write back atomically - all
    /// inside one lock acquisition.
    pub async fn update_bot(
        &self,
        bot_key: &str,
        mutate: impl FnOnce(&mut BotSnapshot) + Send + 'static,
    ) -> Result<()> {
        let path = self.path.clone();
        let bot_key = bot_key.to_string();
        self.lock
            .acquire(AcquireOptions::default(), move |_| async move {
                let mut shape = match std::fs::read_to_string(&path) {
                    Ok(contents) => serde_json::from_str::<FileShape>(&contents)?,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => FileShape::default(),
                    Err(err) => return Err(GridError::Io(err)),
                };

                let entry = shape.bots.entry(bot_key).or_insert_with(|| BotSnapshot {
                    meta: serde_json::Value::Null,
                    grid: Vec::new(),
                    cache_funds: CacheFunds::default(),
                    bts_fees_owed: Decimal::ZERO,
                    boundary_idx: 0,
                    assets: serde_json::Value::Null,
                    double_side_flags: HashMap::new(),
                    processed_fills: HashMap::new(),
                    last_updated: 0,
                });
                mutate(entry);
                entry.last_updated = now_epoch_secs();

                Self::write_file(&path, &shape)
            })
            .await
            .map_err(|_| GridError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "store lock acquisition failed",
            )))?
    }

    pub async fn load_bot(&self, bot_key: &str) -> Result<Option<BotSnapshot>> {
        let shape = self.read_file()?;
        Ok(shape.bots.get(bot_key).cloned())
    }

    /// `clean_old_processed_fills(age)`: prune entries older than `age`
    /// (default 1 hour) across every bot in the file.
    pub async fn clean_old_processed_fills(&self, age: Duration) -> Result<()> {
        let path = self.path.clone();
        let cutoff = now_epoch_secs().saturating_sub(age.as_secs());
        self.lock
            .acquire(AcquireOptions::default(), move |_| async move {
                let mut shape = match std::fs::read_to_string(&path) {
                    Ok(contents) => serde_json::from_str::<FileShape>(&contents)?,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                    Err(err) => return Err(GridError::Io(err)),
                };
                for bot in shape.bots.values_mut() {
                    bot.processed_fills.retain(|_, ts| *ts >= cutoff);
                }
                Self::write_file(&path, &shape)
            })
            .await
            .map_err(|_| GridError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "store lock acquisition failed",
            )))?
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn default_processed_fill_age() -> Duration {
    DEFAULT_PROCESSED_FILL_TTL
}
