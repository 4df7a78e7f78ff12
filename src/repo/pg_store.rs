use super::{
    NewShardBlock, ShardBlock, StoreResult, TrackedAddress, WatchStore,
};
use crate::{db::Db, error::StoreError, utils::Fingerprint};
use async_trait::async_trait;
use sqlx::{Row, postgres::PgRow};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn tracked_from_row(row: &PgRow) -> Result<TrackedAddress, sqlx::Error> {
    Ok(TrackedAddress {
        id: row.try_get("id")?,
        workchain: row.try_get("workchain")?,
        fingerprint: row.try_get("account")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn block_from_row(row: &PgRow) -> Result<ShardBlock, sqlx::Error> {
    let seqno: i64 = row.try_get("seqno")?;
    Ok(ShardBlock {
        id: row.try_get("id")?,
        workchain: row.try_get("workchain")?,
        shard: row.try_get("shard")?,
        seqno: u32::try_from(seqno).map_err(|e| sqlx::Error::ColumnDecode {
            index: "seqno".into(),
            source: Box::new(e),
        })?,
        processed: row.try_get("processed")?,
        processed_at: row.try_get("processed_at")?,
    })
}

const TRACKED_COLUMNS: &str =
    "id, workchain, account, active, created_at, updated_at";

#[async_trait]
impl WatchStore for PgStore {
    async fn get_watermark(
        &self,
        workchain: i32,
        shard: i64,
    ) -> StoreResult<Option<u32>> {
        let max: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(seqno) FROM shard_blocks
            WHERE workchain = $1 AND shard = $2
        "#,
        )
        .bind(workchain)
        .bind(shard)
        .fetch_one(self.db.pool())
        .await?;
        Ok(max.map(|s| s as u32))
    }

    async fn insert_block_if_absent(
        &self,
        block: &NewShardBlock,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO shard_blocks (workchain, shard, seqno)
            VALUES ($1, $2, $3)
            ON CONFLICT (workchain, shard, seqno) DO NOTHING
        "#,
        )
        .bind(block.workchain)
        .bind(block.shard)
        .bind(block.seqno as i64)
        .execute(self.db.pool())
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn list_unprocessed(
        &self,
        limit: usize,
    ) -> StoreResult<Vec<ShardBlock>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workchain, shard, seqno, processed, processed_at
            FROM (
                SELECT id, workchain, shard, seqno, processed, processed_at,
                    ROW_NUMBER() OVER (
                        PARTITION BY workchain, shard ORDER BY seqno
                    ) AS turn
                FROM shard_blocks
                WHERE processed = FALSE
            ) pending
            ORDER BY turn, workchain, shard
            LIMIT $1
        "#,
        )
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows
            .iter()
            .map(block_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn mark_processed(&self, id: i64) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE shard_blocks
            SET processed = TRUE, processed_at = now()
            WHERE id = $1 AND processed = FALSE
        "#,
        )
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn count_unprocessed(&self) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM shard_blocks WHERE processed = FALSE",
        )
        .fetch_one(self.db.pool())
        .await?;
        Ok(n.max(0) as u64)
    }

    async fn find_tracked_address(
        &self,
        workchain: i32,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<TrackedAddress>> {
        let sql = format!(
            "SELECT {TRACKED_COLUMNS} FROM tracked_addresses \
             WHERE workchain = $1 AND account = $2"
        );
        let row = sqlx::query(&sql)
            .bind(workchain)
            .bind(fingerprint)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.as_ref().map(tracked_from_row).transpose()?)
    }

    async fn list_active_tracked_addresses(
        &self,
    ) -> StoreResult<Vec<TrackedAddress>> {
        let sql = format!(
            "SELECT {TRACKED_COLUMNS} FROM tracked_addresses \
             WHERE active = TRUE ORDER BY created_at"
        );
        let rows = sqlx::query(&sql).fetch_all(self.db.pool()).await?;
        Ok(rows
            .iter()
            .map(tracked_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn insert_tracked_address(
        &self,
        workchain: i32,
        fingerprint: &Fingerprint,
    ) -> StoreResult<TrackedAddress> {
        let sql = format!(
            "INSERT INTO tracked_addresses (id, workchain, account, active) \
             VALUES ($1, $2, $3, TRUE) RETURNING {TRACKED_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(workchain)
            .bind(fingerprint)
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::Conflict(format!(
                        "{workchain}:{fingerprint} is already registered"
                    ))
                }
                other => StoreError::Database(other),
            })?;
        Ok(tracked_from_row(&row)?)
    }

    async fn deactivate_tracked_address(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE tracked_addresses
            SET active = FALSE, updated_at = now()
            WHERE id = $1 AND active = TRUE
        "#,
        )
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn reactivate_tracked_address(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE tracked_addresses
            SET active = TRUE, updated_at = now()
            WHERE id = $1 AND active = FALSE
        "#,
        )
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(res.rows_affected() == 1)
    }
}
