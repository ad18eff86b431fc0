//! Feedback learner: per-(query, chunk) interaction history turned into a
//! bounded ranking boost.
//!
//! Events are durable before `record` returns. The in-memory view is only
//! touched after the backend write succeeded, inside one short write lock, so
//! concurrent readers never see a half-applied event or a partially rolled-up
//! aggregate.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info};

use crate::capability::{RetryPolicy, with_retry};
use crate::config::FeedbackConfig;
use crate::error::{Error, Result};
use crate::store::backend::FeedbackBackend;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Kind of interaction a caller reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Click,
    Useful,
    NotUseful,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Click => "click",
            EventType::Useful => "useful",
            EventType::NotUseful => "not_useful",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "click" => Ok(EventType::Click),
            "useful" => Ok(EventType::Useful),
            "not_useful" => Ok(EventType::NotUseful),
            other => Err(Error::malformed(format!("unknown feedback event type '{other}'"))),
        }
    }
}

/// One recorded interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// Normalized form of `query_text`; events are grouped by it.
    pub query_key: String,
    pub query_text: String,
    pub chunk_id: String,
    pub event_type: EventType,
    pub observed_rank: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackEvent {
    /// Event stamped with the current time.
    pub fn new(
        query_text: &str,
        chunk_id: &str,
        event_type: EventType,
        observed_rank: Option<usize>,
    ) -> Self {
        Self::at(query_text, chunk_id, event_type, observed_rank, Utc::now())
    }

    pub fn at(
        query_text: &str,
        chunk_id: &str,
        event_type: EventType,
        observed_rank: Option<usize>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            query_key: normalize_query(query_text),
            query_text: query_text.to_string(),
            chunk_id: chunk_id.to_string(),
            event_type,
            observed_rank,
            timestamp,
        }
    }
}

/// Expired events of one (query, chunk) pair folded into a single weight.
///
/// `weight` is the summed contribution as of `anchored_at`; it keeps decaying
/// from there exactly like the events it replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAggregate {
    pub query_key: String,
    pub chunk_id: String,
    pub weight: f64,
    pub event_count: u32,
    pub anchored_at: DateTime<Utc>,
}

/// Outcome of a retention pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupSummary {
    pub events_rolled_up: usize,
    pub aggregates_written: usize,
}

/// Lowercase and collapse whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Default, Clone)]
struct PairHistory {
    events: Vec<(EventType, DateTime<Utc>)>,
    aggregate: Option<FeedbackAggregate>,
}

impl PairHistory {
    fn event_count(&self) -> u64 {
        self.events.len() as u64 + self.aggregate.as_ref().map_or(0, |a| u64::from(a.event_count))
    }
}

type PairKey = (String, String);

/// Per-collection learning store.
pub struct FeedbackLearner {
    config: FeedbackConfig,
    backend: Arc<dyn FeedbackBackend>,
    history: RwLock<HashMap<PairKey, PairHistory>>,
    write_gate: TokioMutex<()>,
    retry: RetryPolicy,
}

impl FeedbackLearner {
    /// Load persisted events and aggregates.
    pub fn open(
        backend: Arc<dyn FeedbackBackend>,
        config: FeedbackConfig,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let mut history: HashMap<PairKey, PairHistory> = HashMap::new();
        let events = backend.load_all_feedback()?;
        let event_total = events.len();
        for event in events {
            history
                .entry((event.query_key, event.chunk_id))
                .or_default()
                .events
                .push((event.event_type, event.timestamp));
        }
        for aggregate in backend.load_aggregates()? {
            let key = (aggregate.query_key.clone(), aggregate.chunk_id.clone());
            history.entry(key).or_default().aggregate = Some(aggregate);
        }
        debug!("Loaded {event_total} feedback events for {} pairs", history.len());

        Ok(Self {
            config,
            backend,
            history: RwLock::new(history),
            write_gate: TokioMutex::new(()),
            retry,
        })
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// Persist `event`, then make it visible to `boost`.
    pub async fn record(&self, event: FeedbackEvent) -> Result<()> {
        if event.query_key.is_empty() {
            return Err(Error::malformed("feedback query must not be empty"));
        }
        if event.chunk_id.trim().is_empty() {
            return Err(Error::malformed("feedback chunk_id must not be empty"));
        }

        let _gate = self.write_gate.lock().await;
        let backend = &self.backend;
        let ev = &event;
        with_retry(&self.retry, "persist feedback", move || async move {
            backend.persist_feedback(ev)
        })
        .await?;

        debug!(
            "Recorded {} for '{}' on {}",
            event.event_type, event.query_key, event.chunk_id
        );
        self.history
            .write()
            .entry((event.query_key, event.chunk_id))
            .or_default()
            .events
            .push((event.event_type, event.timestamp));
        Ok(())
    }

    /// Boost for `query` and `chunk_id` as of now.
    pub fn boost(&self, query: &str, chunk_id: &str) -> f64 {
        self.boost_at(query, chunk_id, Utc::now())
    }

    pub fn boost_at(&self, query: &str, chunk_id: &str, now: DateTime<Utc>) -> f64 {
        let key = (normalize_query(query), chunk_id.to_string());
        let history = self.history.read();
        history
            .get(&key)
            .map_or(0.0, |pair| self.pair_boost(pair, now))
    }

    /// Boosts for many chunks of one query under a single read lock. Chunks
    /// without history are absent from the map.
    pub fn boosts<'a>(
        &self,
        query: &str,
        chunk_ids: impl IntoIterator<Item = &'a str>,
    ) -> HashMap<String, f64> {
        let query_key = normalize_query(query);
        let now = Utc::now();
        let history = self.history.read();
        let mut boosts = HashMap::new();
        for chunk_id in chunk_ids {
            let key = (query_key.clone(), chunk_id.to_string());
            if let Some(pair) = history.get(&key) {
                let boost = self.pair_boost(pair, now);
                if boost != 0.0 {
                    boosts.insert(chunk_id.to_string(), boost);
                }
            }
        }
        boosts
    }

    /// Persisted events of one pair, oldest first. Events already folded
    /// into an aggregate are not returned.
    pub async fn events(&self, query: &str, chunk_id: &str) -> Result<Vec<FeedbackEvent>> {
        let query_key = normalize_query(query);
        if query_key.is_empty() {
            return Err(Error::malformed("feedback query must not be empty"));
        }
        let backend = &self.backend;
        let key = query_key.as_str();
        with_retry(&self.retry, "load feedback", move || async move {
            backend.load_feedback(key, chunk_id)
        })
        .await
    }

    /// Whether any feedback exists at all.
    pub fn has_history(&self) -> bool {
        !self.history.read().is_empty()
    }

    /// Individual events currently retained (rolled-up ones excluded).
    pub fn event_count(&self) -> usize {
        self.history.read().values().map(|p| p.events.len()).sum()
    }

    /// Fold events older than the retention horizon into aggregates.
    pub async fn cleanup(&self) -> Result<CleanupSummary> {
        self.cleanup_at(Utc::now()).await
    }

    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> Result<CleanupSummary> {
        let _gate = self.write_gate.lock().await;
        // the backend stores milliseconds; compare at that precision
        let cutoff = now - Duration::days(i64::from(self.config.retention_days));
        let cutoff = DateTime::from_timestamp_millis(cutoff.timestamp_millis()).unwrap_or(cutoff);

        let mut aggregates = Vec::new();
        let mut events_rolled_up = 0;
        {
            let history = self.history.read();
            for ((query_key, chunk_id), pair) in history.iter() {
                let expired: Vec<_> = pair.events.iter().filter(|(_, ts)| *ts < cutoff).collect();
                if expired.is_empty() {
                    continue;
                }
                events_rolled_up += expired.len();
                let mut weight = pair
                    .aggregate
                    .as_ref()
                    .map_or(0.0, |a| a.weight * self.decay(a.anchored_at, now));
                let mut event_count = pair.aggregate.as_ref().map_or(0, |a| a.event_count);
                for (event_type, ts) in expired {
                    weight += self.config.weight(*event_type) * self.decay(*ts, now);
                    event_count += 1;
                }
                aggregates.push(FeedbackAggregate {
                    query_key: query_key.clone(),
                    chunk_id: chunk_id.clone(),
                    weight,
                    event_count,
                    anchored_at: now,
                });
            }
        }

        if aggregates.is_empty() {
            return Ok(CleanupSummary::default());
        }

        let backend = &self.backend;
        let aggs = aggregates.as_slice();
        with_retry(&self.retry, "roll up feedback", move || async move {
            backend.roll_up(aggs, cutoff)
        })
        .await?;

        let aggregates_written = aggregates.len();
        {
            let mut history = self.history.write();
            for aggregate in aggregates {
                let key = (aggregate.query_key.clone(), aggregate.chunk_id.clone());
                if let Some(pair) = history.get_mut(&key) {
                    pair.events.retain(|(_, ts)| *ts >= cutoff);
                    pair.aggregate = Some(aggregate);
                }
            }
        }
        info!("Rolled {events_rolled_up} feedback events into {aggregates_written} aggregates");

        Ok(CleanupSummary {
            events_rolled_up,
            aggregates_written,
        })
    }

    fn pair_boost(&self, pair: &PairHistory, now: DateTime<Utc>) -> f64 {
        if pair.event_count() < u64::from(self.config.min_events) {
            return 0.0;
        }
        let mut boost: f64 = pair
            .events
            .iter()
            .map(|(event_type, ts)| self.config.weight(*event_type) * self.decay(*ts, now))
            .sum();
        if let Some(aggregate) = &pair.aggregate {
            boost += aggregate.weight * self.decay(aggregate.anchored_at, now);
        }
        if !boost.is_finite() {
            return 0.0;
        }
        boost.clamp(-self.config.max_boost, self.config.max_boost)
    }

    fn decay(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_days = ((now - at).num_milliseconds() as f64 / MS_PER_DAY).max(0.0);
        0.5f64.powf(age_days / self.config.half_life_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;

    fn learner_with(config: FeedbackConfig) -> (FeedbackLearner, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let learner = FeedbackLearner::open(store.clone(), config, RetryPolicy::immediate()).unwrap();
        (learner, store)
    }

    fn learner() -> FeedbackLearner {
        learner_with(FeedbackConfig::default()).0
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  JWT   Auth\tflow "), "jwt auth flow");
        assert_eq!(normalize_query("   "), "");
    }

    #[test]
    fn test_event_type_from_str() {
        assert_eq!("not-useful".parse::<EventType>().unwrap(), EventType::NotUseful);
        assert_eq!("Click".parse::<EventType>().unwrap(), EventType::Click);
        assert!("love".parse::<EventType>().is_err());
    }

    #[tokio::test]
    async fn test_boost_requires_min_events() {
        let learner = learner();
        learner.record(FeedbackEvent::new("auth", "c1", EventType::Useful, Some(1))).await.unwrap();
        learner.record(FeedbackEvent::new("auth", "c1", EventType::Useful, Some(1))).await.unwrap();
        assert_eq!(learner.boost("auth", "c1"), 0.0);

        learner.record(FeedbackEvent::new("AUTH ", "c1", EventType::Click, None)).await.unwrap();
        let boost = learner.boost("auth", "c1");
        assert!((boost - 0.5).abs() < 1e-6, "0.3+0.3+0.1 clamps to 0.5, got {boost}");
    }

    #[tokio::test]
    async fn test_not_useful_is_negative_and_clamped() {
        let learner = learner();
        for _ in 0..3 {
            learner.record(FeedbackEvent::new("auth", "x", EventType::NotUseful, Some(1))).await.unwrap();
        }
        let boost = learner.boost("auth", "x");
        assert!((boost + 0.5).abs() < 1e-6);
        assert_eq!(learner.boost("other", "x"), 0.0);
    }

    #[tokio::test]
    async fn test_old_events_decay() {
        let learner = learner();
        let now = Utc::now();
        for _ in 0..3 {
            let event = FeedbackEvent::at("q", "c", EventType::Click, None, now - Duration::days(30));
            learner.record(event).await.unwrap();
        }
        // one half-life: 3 * 0.1 * 0.5
        let boost = learner.boost_at("q", "c", now);
        assert!((boost - 0.15).abs() < 1e-3, "got {boost}");
    }

    #[tokio::test]
    async fn test_record_rejects_empty_input() {
        let learner = learner();
        let err = learner
            .record(FeedbackEvent::new("  ", "c", EventType::Click, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
        assert!(learner
            .record(FeedbackEvent::new("q", "", EventType::Click, None))
            .await
            .is_err());
        assert!(!learner.has_history());
    }

    #[tokio::test]
    async fn test_boosts_batch_skips_unknown() {
        let learner = learner();
        for _ in 0..3 {
            learner.record(FeedbackEvent::new("q", "a", EventType::Useful, None)).await.unwrap();
        }
        let boosts = learner.boosts("q", ["a", "b"]);
        assert_eq!(boosts.len(), 1);
        assert!(boosts["a"] > 0.0);
    }

    #[tokio::test]
    async fn test_cleanup_preserves_boost() {
        let (learner, store) = learner_with(FeedbackConfig::default());
        let now = Utc::now();
        for days in [90, 80, 10] {
            let event = FeedbackEvent::at("q", "c", EventType::Useful, None, now - Duration::days(days));
            learner.record(event).await.unwrap();
        }
        let before = learner.boost_at("q", "c", now);

        let summary = learner.cleanup_at(now).await.unwrap();
        assert_eq!(summary.events_rolled_up, 2);
        assert_eq!(summary.aggregates_written, 1);
        assert_eq!(learner.event_count(), 1);

        let after = learner.boost_at("q", "c", now);
        assert!((before - after).abs() < 1e-9, "{before} vs {after}");

        // a fresh learner over the same store sees the same boost
        let reopened =
            FeedbackLearner::open(store, FeedbackConfig::default(), RetryPolicy::immediate()).unwrap();
        let reloaded = reopened.boost_at("q", "c", now);
        assert!((before - reloaded).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cleanup_agrees_with_store_within_a_millisecond() {
        let (learner, store) = learner_with(FeedbackConfig::default());
        let now = DateTime::from_timestamp(1_760_000_000, 500_900_000).unwrap();
        // same millisecond as the cutoff, but earlier than the exact cutoff
        let boundary = now - Duration::days(60) - Duration::microseconds(400);
        for ts in [now - Duration::days(90), now - Duration::days(90), boundary] {
            learner.record(FeedbackEvent::at("q", "c", EventType::Useful, None, ts)).await.unwrap();
        }

        let summary = learner.cleanup_at(now).await.unwrap();
        assert_eq!(summary.events_rolled_up, 2);
        assert_eq!(learner.event_count(), 1);

        let reopened =
            FeedbackLearner::open(store, FeedbackConfig::default(), RetryPolicy::immediate()).unwrap();
        assert_eq!(reopened.event_count(), 1);
        let (live, reloaded) = (learner.boost_at("q", "c", now), reopened.boost_at("q", "c", now));
        assert!((live - reloaded).abs() < 1e-9, "{live} vs {reloaded}");
    }

    #[tokio::test]
    async fn test_boost_stays_bounded_over_mixed_histories() {
        let config = FeedbackConfig {
            min_events: 1,
            max_boost: 0.25,
            ..FeedbackConfig::default()
        };
        let max_boost = config.max_boost;
        let (learner, _store) = learner_with(config);
        let now = Utc::now();
        let kinds = [EventType::Click, EventType::Useful, EventType::NotUseful];

        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move |bound: u64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed % bound
        };
        for pair in 0..120 {
            let chunk_id = format!("c{pair}");
            for _ in 0..=next(12) {
                let kind = kinds[next(3) as usize];
                let age = Duration::hours(next(24 * 120) as i64);
                learner.record(FeedbackEvent::at("q", &chunk_id, kind, None, now - age)).await.unwrap();
            }
        }

        let check = |learner: &FeedbackLearner| {
            for pair in 0..120 {
                let boost = learner.boost_at("q", &format!("c{pair}"), now);
                assert!(boost.is_finite() && boost.abs() <= max_boost, "c{pair}: {boost}");
            }
        };
        check(&learner);
        learner.cleanup_at(now).await.unwrap();
        check(&learner);
    }

    #[tokio::test]
    async fn test_events_reads_persisted_history() {
        let learner = learner();
        learner.record(FeedbackEvent::new("Auth  flow", "c1", EventType::Click, Some(2))).await.unwrap();
        learner.record(FeedbackEvent::new("auth flow", "c1", EventType::Useful, Some(1))).await.unwrap();
        learner.record(FeedbackEvent::new("auth flow", "c2", EventType::Useful, None)).await.unwrap();

        let events = learner.events("AUTH FLOW", "c1").await.unwrap();
        let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![EventType::Click, EventType::Useful]);
        assert_eq!(events[0].query_text, "Auth  flow");
        assert!(learner.events("auth flow", "c9").await.unwrap().is_empty());
        assert!(learner.events(" ", "c1").await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_without_expired_events_is_noop() {
        let learner = learner();
        learner.record(FeedbackEvent::new("q", "c", EventType::Click, None)).await.unwrap();
        assert_eq!(learner.cleanup().await.unwrap(), CleanupSummary::default());
        assert_eq!(learner.event_count(), 1);
    }
}
