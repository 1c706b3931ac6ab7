//! Windowed statistics over block and reward lists.
//!
//! Pure functions: raw node records go in, [`WindowedStat`]s come out. Lists
//! arrive newest-first from the node and are never re-sorted here.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use tracing::warn;

/// Transaction service tag for block rewards
pub const BLOCK_REWARD_SERVICE: &str = "block_reward";
/// Sub-entry type for incoming coins
pub const RECEIVE_ENTRY: &str = "recv";
/// Only accepted transactions count
pub const ACCEPTED_STATUS: &str = "ACCEPTED";

// =============================================================================
// Records
// =============================================================================

/// A record's creation time, normalized when possible.
///
/// Unparseable source text is kept verbatim: the record still counts, it just
/// can't be placed in a date window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Normalized(DateTime<Utc>),
    Raw(String),
}

impl Timestamp {
    /// Parse the node's RFC 2822 text (RFC 3339 is accepted too).
    pub fn normalize(raw: &str) -> Self {
        let parsed = DateTime::parse_from_rfc2822(raw).or_else(|_| DateTime::parse_from_rfc3339(raw));
        match parsed {
            Ok(ts) => Timestamp::Normalized(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!(timestamp = raw, error = %e, "could not normalize timestamp, keeping raw value");
                Timestamp::Raw(raw.to_string())
            }
        }
    }

    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Normalized(ts) => Some(*ts),
            Timestamp::Raw(_) => None,
        }
    }
}

fn timestamp_field(fields: &Map<String, Value>, key: &str) -> Option<Timestamp> {
    match fields.get(key)? {
        Value::String(s) if !s.is_empty() => Some(Timestamp::normalize(s)),
        _ => None,
    }
}

/// A block from a signed/first-signed list. Everything except the creation
/// time is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    #[serde(default)]
    pub ts_create: Option<Timestamp>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Normalize a raw block list; entries that aren't objects are dropped.
pub fn normalize_blocks(raw: &[Value]) -> Vec<BlockRecord> {
    raw.iter()
        .filter_map(Value::as_object)
        .map(|obj| {
            let mut fields = obj.clone();
            let ts_create = timestamp_field(&fields, "ts_create");
            if ts_create.is_some() {
                fields.remove("ts_create");
            }
            BlockRecord { ts_create, fields }
        })
        .collect()
}

/// One received block reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRecord {
    pub tx_hash: Option<String>,
    pub tx_created: Option<Timestamp>,
    pub recv_coins: Option<f64>,
    pub token: Option<String>,
    pub source_address: Option<String>,
}

fn coins(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Promote accepted block-reward receive entries to [`RewardRecord`]s.
///
/// Anything else in the history (transfers, fees, pending transactions) is
/// discarded here, before any statistic sees it.
pub fn extract_rewards(history: &[Value]) -> Vec<RewardRecord> {
    let mut rewards = Vec::new();
    for tx in history.iter().filter_map(Value::as_object) {
        if tx.get("status").and_then(Value::as_str) != Some(ACCEPTED_STATUS)
            || tx.get("service").and_then(Value::as_str) != Some(BLOCK_REWARD_SERVICE)
        {
            continue;
        }
        let tx_created = timestamp_field(tx, "tx_created");
        let entries = tx.get("data").and_then(Value::as_array).into_iter().flatten();
        for entry in entries.filter(|e| e.get("tx_type").and_then(Value::as_str) == Some(RECEIVE_ENTRY)) {
            rewards.push(RewardRecord {
                tx_hash: text(tx.get("hash")),
                tx_created: tx_created.clone(),
                recv_coins: coins(entry.get("recv_coins")),
                token: text(entry.get("token")),
                source_address: text(entry.get("source_address")),
            });
        }
    }
    rewards
}

// =============================================================================
// Windowing
// =============================================================================

/// What the windowing functions need from a record.
pub trait Windowed: Clone {
    /// Per-day aggregate type
    type Sum: Copy + Default + AddAssign;

    fn instant(&self) -> Option<DateTime<Utc>>;

    /// Contribution to the record's day bucket
    fn weight(&self) -> Self::Sum;
}

impl Windowed for BlockRecord {
    type Sum = u64;

    fn instant(&self) -> Option<DateTime<Utc>> {
        self.ts_create.as_ref().and_then(Timestamp::instant)
    }

    fn weight(&self) -> u64 {
        1
    }
}

impl Windowed for RewardRecord {
    type Sum = f64;

    fn instant(&self) -> Option<DateTime<Utc>> {
        self.tx_created.as_ref().and_then(Timestamp::instant)
    }

    fn weight(&self) -> f64 {
        self.recv_coins.unwrap_or(0.0)
    }
}

/// A filtered slice of records and its size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window<T> {
    pub items: Vec<T>,
    pub count: usize,
}

impl<T> Window<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }

    fn empty() -> Self {
        Self::new(Vec::new())
    }
}

/// Aggregate for one calendar day (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBucket<S> {
    pub date: NaiveDate,
    pub sum: S,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowedStat<T, S> {
    pub count: usize,
    pub latest: Option<T>,
    pub earliest: Option<T>,
    pub today: Window<T>,
    pub yesterday: Window<T>,
    pub rolling_window: Window<T>,
    /// Ascending by date, over the whole list
    pub daily_buckets: Vec<DailyBucket<S>>,
}

pub type BlockStats = WindowedStat<BlockRecord, u64>;

impl<T, S> WindowedStat<T, S> {
    pub fn empty() -> Self {
        Self {
            count: 0,
            latest: None,
            earliest: None,
            today: Window::empty(),
            yesterday: Window::empty(),
            rolling_window: Window::empty(),
            daily_buckets: Vec::new(),
        }
    }
}

/// First instant of the rolling window: midnight `days_cutoff` days before
/// today, so the window always covers whole calendar days.
pub fn rolling_cutoff(now: DateTime<Utc>, days_cutoff: u32) -> DateTime<Utc> {
    now.date_naive()
        .checked_sub_days(Days::new(u64::from(days_cutoff)))
        .unwrap_or(NaiveDate::MIN)
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
}

/// Compute every window for `items` (newest first) as of `now`.
pub fn windowed<T: Windowed>(items: &[T], now: DateTime<Utc>, days_cutoff: u32) -> WindowedStat<T, T::Sum> {
    if items.is_empty() {
        return WindowedStat::empty();
    }

    let today = now.date_naive();
    let yesterday = today.pred_opt();
    let cutoff = rolling_cutoff(now, days_cutoff);

    let on_day = |day: Option<NaiveDate>| -> Vec<T> {
        items
            .iter()
            .filter(|item| item.instant().is_some_and(|ts| Some(ts.date_naive()) == day))
            .cloned()
            .collect()
    };

    let rolling: Vec<T> = items
        .iter()
        .filter(|item| item.instant().is_some_and(|ts| ts >= cutoff))
        .cloned()
        .collect();

    let mut buckets: BTreeMap<NaiveDate, T::Sum> = BTreeMap::new();
    for item in items {
        if let Some(ts) = item.instant() {
            *buckets.entry(ts.date_naive()).or_default() += item.weight();
        }
    }

    WindowedStat {
        count: items.len(),
        latest: items.first().cloned(),
        earliest: items.last().cloned(),
        today: Window::new(on_day(Some(today))),
        yesterday: Window::new(on_day(yesterday)),
        rolling_window: Window::new(rolling),
        daily_buckets: buckets.into_iter().map(|(date, sum)| DailyBucket { date, sum }).collect(),
    }
}

// =============================================================================
// Rewards
// =============================================================================

/// Windowed rewards plus the amount-based aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardStats {
    pub window: WindowedStat<RewardRecord, f64>,
    pub total_rewards: f64,
    pub biggest: Option<RewardRecord>,
    pub smallest: Option<RewardRecord>,
}

impl RewardStats {
    pub fn empty() -> Self {
        Self {
            window: WindowedStat::empty(),
            total_rewards: 0.0,
            biggest: None,
            smallest: None,
        }
    }
}

/// Reward statistics; amount aggregates only consider records with an amount.
pub fn reward_stats(rewards: &[RewardRecord], now: DateTime<Utc>, days_cutoff: u32) -> RewardStats {
    if rewards.is_empty() {
        return RewardStats::empty();
    }

    let mut total_rewards = 0.0;
    let mut biggest: Option<(&RewardRecord, f64)> = None;
    let mut smallest: Option<(&RewardRecord, f64)> = None;

    for (record, amount) in rewards.iter().filter_map(|r| r.recv_coins.map(|c| (r, c))) {
        total_rewards += amount;
        // Ties keep the first (newest) record
        if biggest.is_none_or(|(_, max)| amount > max) {
            biggest = Some((record, amount));
        }
        if smallest.is_none_or(|(_, min)| amount < min) {
            smallest = Some((record, amount));
        }
    }

    RewardStats {
        window: windowed(rewards, now, days_cutoff),
        total_rewards,
        biggest: biggest.map(|(r, _)| r.clone()),
        smallest: smallest.map(|(r, _)| r.clone()),
    }
}

/// Normalize and aggregate a raw block list.
pub fn block_stats(raw: &[Value], now: DateTime<Utc>, days_cutoff: u32) -> BlockStats {
    windowed(&normalize_blocks(raw), now, days_cutoff)
}

/// Filter, normalize and aggregate a raw transaction history.
pub fn history_stats(raw: &[Value], now: DateTime<Utc>, days_cutoff: u32) -> RewardStats {
    reward_stats(&extract_rewards(raw), now, days_cutoff)
}
