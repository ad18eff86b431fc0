use chrono::{DateTime, Utc};
use rusqlite::{Result, Row, params};

use super::{Db, from_millis, to_millis};
use crate::feedback::{EventType, FeedbackAggregate, FeedbackEvent};

const EVENT_COLUMNS: &str =
    "query_key, query_text, chunk_id, event_type, observed_rank, timestamp";

fn event_from_row(row: &Row<'_>) -> Result<FeedbackEvent> {
    let event_type: String = row.get(3)?;
    let event_type = event_type.parse::<EventType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let observed_rank: Option<i64> = row.get(4)?;
    Ok(FeedbackEvent {
        query_key: row.get(0)?,
        query_text: row.get(1)?,
        chunk_id: row.get(2)?,
        event_type,
        observed_rank: observed_rank.map(|r| r.max(0) as usize),
        timestamp: from_millis(row.get(5)?),
    })
}

impl Db {
    pub fn insert_feedback(&self, event: &FeedbackEvent) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO feedback_events ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"),
            params![
                event.query_key,
                event.query_text,
                event.chunk_id,
                event.event_type.as_str(),
                event.observed_rank.map(|r| r as i64),
                to_millis(event.timestamp),
            ],
        )?;
        Ok(())
    }

    /// Events of one (normalized query, chunk) pair, oldest first.
    pub fn feedback_for(&self, query_key: &str, chunk_id: &str) -> Result<Vec<FeedbackEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM feedback_events WHERE query_key = ? AND chunk_id = ? ORDER BY timestamp, id"
        ))?;
        let rows = stmt.query_map(params![query_key, chunk_id], event_from_row)?;
        rows.collect()
    }

    pub fn all_feedback(&self) -> Result<Vec<FeedbackEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM feedback_events ORDER BY timestamp, id"
        ))?;
        let rows = stmt.query_map([], event_from_row)?;
        rows.collect()
    }

    pub fn list_aggregates(&self) -> Result<Vec<FeedbackAggregate>> {
        let mut stmt = self.conn.prepare(
            "SELECT query_key, chunk_id, weight, event_count, anchored_at FROM feedback_aggregates",
        )?;
        let rows = stmt.query_map([], |row| {
            let event_count: i64 = row.get(3)?;
            Ok(FeedbackAggregate {
                query_key: row.get(0)?,
                chunk_id: row.get(1)?,
                weight: row.get(2)?,
                event_count: event_count.clamp(0, i64::from(u32::MAX)) as u32,
                anchored_at: from_millis(row.get(4)?),
            })
        })?;
        rows.collect()
    }

    /// Upsert `aggregates` and delete events older than `cutoff` in one
    /// transaction.
    pub fn roll_up(&mut self, aggregates: &[FeedbackAggregate], cutoff: DateTime<Utc>) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO feedback_aggregates (query_key, chunk_id, weight, event_count, anchored_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(query_key, chunk_id) DO UPDATE SET
                    weight = excluded.weight,
                    event_count = excluded.event_count,
                    anchored_at = excluded.anchored_at
                "#,
            )?;
            for agg in aggregates {
                stmt.execute(params![
                    agg.query_key,
                    agg.chunk_id,
                    agg.weight,
                    i64::from(agg.event_count),
                    to_millis(agg.anchored_at),
                ])?;
            }
        }
        let deleted = tx.execute(
            "DELETE FROM feedback_events WHERE timestamp < ?",
            params![to_millis(cutoff)],
        )?;
        tx.commit()?;
        Ok(deleted)
    }
}
