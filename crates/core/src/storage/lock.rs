use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

const LOCK_NAMESPACE: i64 = 0x4154_4845_4E41; // "ATHENA"

fn lock_key_for_date(run_date: NaiveDate) -> i64 {
    LOCK_NAMESPACE ^ (run_date.num_days_from_ce() as i64)
}

/// Advisory locks are session-scoped, so the guard keeps the connection the lock was taken on.
/// Call [`RunLock::release`]; dropping the guard returns the connection with the lock still held
/// until that session ends.
pub struct RunLock {
    conn: PoolConnection<Postgres>,
    key: i64,
}

/// `None` when another session already holds the lock for `run_date`.
pub async fn try_acquire_run_lock(
    pool: &sqlx::PgPool,
    run_date: NaiveDate,
) -> anyhow::Result<Option<RunLock>> {
    let key = lock_key_for_date(run_date);
    let mut conn = pool
        .acquire()
        .await
        .context("acquire connection for run lock failed")?;

    let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;

    Ok(acquired.then_some(RunLock { conn, key }))
}

impl RunLock {
    pub async fn release(mut self) -> anyhow::Result<()> {
        let key = self.key;
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(key)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={key})"))?;
        Ok(())
    }
}
