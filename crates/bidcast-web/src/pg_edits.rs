//! Postgres-backed [`EditStore`], used when `DATABASE_URL` is set.

use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use bidcast_core::BidEdit;
use bidcast_storage::EditStore;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgEditStore {
    pool: PgPool,
}

impl PgEditStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("connecting to DATABASE_URL")?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bid_edits (
                record_key UUID PRIMARY KEY,
                volume_avg DOUBLE PRECISION,
                duration_months INTEGER,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating bid_edits table")?;
        Ok(())
    }
}

/// Negative durations can only come from manual table edits; they are dropped.
fn edit_from_columns(volume_avg: Option<f64>, duration_months: Option<i32>) -> BidEdit {
    BidEdit {
        volume_avg,
        duration_months: duration_months.and_then(|m| u32::try_from(m).ok()),
    }
}

#[async_trait]
impl EditStore for PgEditStore {
    async fn load(&self) -> anyhow::Result<BTreeMap<Uuid, BidEdit>> {
        let rows = sqlx::query("SELECT record_key, volume_avg, duration_months FROM bid_edits")
            .fetch_all(&self.pool)
            .await
            .context("loading bid edits")?;
        let mut out = BTreeMap::new();
        for row in rows {
            let key: Uuid = row.try_get("record_key")?;
            let edit = edit_from_columns(row.try_get("volume_avg")?, row.try_get("duration_months")?);
            if !edit.is_empty() {
                out.insert(key, edit);
            }
        }
        Ok(out)
    }

    async fn save(&self, key: Uuid, edit: BidEdit) -> anyhow::Result<()> {
        if edit.is_empty() {
            sqlx::query("DELETE FROM bid_edits WHERE record_key = $1")
                .bind(key)
                .execute(&self.pool)
                .await
                .context("clearing bid edit")?;
            return Ok(());
        }
        let duration = edit
            .duration_months
            .map(i32::try_from)
            .transpose()
            .context("duration_months out of range")?;
        sqlx::query(
            r#"
            INSERT INTO bid_edits (record_key, volume_avg, duration_months, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (record_key) DO UPDATE
               SET volume_avg = EXCLUDED.volume_avg,
                   duration_months = EXCLUDED.duration_months,
                   updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(edit.volume_avg)
        .bind(duration)
        .execute(&self.pool)
        .await
        .context("saving bid edit")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_stored_durations_are_ignored() {
        let edit = edit_from_columns(Some(10.0), Some(-3));
        assert_eq!(edit.volume_avg, Some(10.0));
        assert_eq!(edit.duration_months, None);
        assert!(edit_from_columns(None, None).is_empty());
    }
}
