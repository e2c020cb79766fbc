use super::{error::Result, error::StorageError, CreditLedger, Debit, JobStore};
use crate::core::{
    DrivingSource, FailureCategory, GenerationJob, JobId, JobStatus, Mode, OwnerId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Default pool size for SQLite connection pool.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

const JOB_COLUMNS: &str = "id, owner_id, photo_key, script, audio_key, voice_key, mode, \
     enhancement, derived_audio_key, external_handle, output_key, status, failure, \
     created_at, updated_at";

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_size: u32,
    /// Minimum number of idle connections to maintain.
    pub min_idle: Option<u32>,
    /// Maximum time to wait for a connection from the pool.
    pub connection_timeout: Duration,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
    /// Idle timeout for connections.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            min_idle: Some(2),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            max_lifetime: None,
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
        }
    }
}

/// SQLite-backed job store and credit ledger with connection pooling.
///
/// Conditional updates are single `UPDATE ... WHERE status = ?` statements;
/// the debit and its job-keyed charge record are written in one transaction
/// that starts with a write, so SQLite serializes concurrent debits.
pub struct SqliteJobStore {
    pool: SqlitePool,
    db_path: String,
}

impl SqliteJobStore {
    /// Opens (creating if missing) a database file with the default pool configuration.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(db_path, PoolConfig::default()).await
    }

    /// Opens a database file with a custom pool configuration.
    pub async fn with_config(db_path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path_str))
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = Self::build_pool(connect_options, &config).await?;

        let store = Self {
            pool,
            db_path: db_path_str,
        };

        store.initialize().await?;
        info!(path = %store.db_path, "Opened SQLite job store");

        Ok(store)
    }

    /// Creates an in-memory store.
    ///
    /// Uses a single, never-recycled connection: an in-memory SQLite database
    /// lives exactly as long as its connection.
    pub async fn in_memory() -> Result<Self> {
        let config = PoolConfig {
            max_size: 1,
            min_idle: Some(1),
            max_lifetime: None,
            idle_timeout: None,
            ..PoolConfig::default()
        };

        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Memory)
            .synchronous(SqliteSynchronous::Normal);

        let pool = Self::build_pool(connect_options, &config).await?;

        let store = Self {
            pool,
            db_path: ":memory:".to_string(),
        };

        store.initialize().await?;

        Ok(store)
    }

    /// Opens `:memory:` or a file path, whichever `url` names.
    pub async fn open(url: &str) -> Result<Self> {
        if url == ":memory:" {
            Self::in_memory().await
        } else {
            Self::new(url).await
        }
    }

    /// Builds the connection pool with the given configuration.
    async fn build_pool(
        connect_options: SqliteConnectOptions,
        config: &PoolConfig,
    ) -> Result<Pool<Sqlite>> {
        let mut builder = SqlitePoolOptions::new()
            .max_connections(config.max_size)
            .acquire_timeout(config.connection_timeout)
            .max_lifetime(config.max_lifetime)
            .idle_timeout(config.idle_timeout);

        if let Some(min_idle) = config.min_idle {
            builder = builder.min_connections(min_idle);
        }

        let pool = builder
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(pool)
    }

    /// Initialize the database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS generation_jobs (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                photo_key TEXT NOT NULL,
                script TEXT,
                audio_key TEXT,
                voice_key TEXT,
                mode TEXT CHECK( mode IN ('standard','experimental') ) NOT NULL,
                enhancement INTEGER NOT NULL,
                derived_audio_key TEXT,
                external_handle TEXT UNIQUE,
                output_key TEXT,
                status TEXT CHECK( status IN ('queued','processing','completed','failed','no_credits') ) NOT NULL,
                failure TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                CHECK( (script IS NULL) <> (audio_key IS NULL) ),
                CHECK( (output_key IS NULL) = (status <> 'completed') )
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_generation_jobs_owner ON generation_jobs(owner_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_generation_jobs_status ON generation_jobs(status, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS accounts (
                owner_id TEXT PRIMARY KEY,
                credits INTEGER NOT NULL DEFAULT 0 CHECK( credits >= 0 )
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS credit_charges (
                job_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                charged_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Closes the pool. Pending operations finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn job_exists(&self, id: JobId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM generation_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Turns "no row updated" into either `Ok(false)` or `JobNotFound`.
    async fn not_applied(&self, id: JobId) -> Result<bool> {
        if self.job_exists(id).await? {
            Ok(false)
        } else {
            Err(StorageError::JobNotFound(id))
        }
    }

    async fn handle_holder(&self, handle: &str) -> Result<Option<JobId>> {
        let holder: Option<String> =
            sqlx::query_scalar("SELECT id FROM generation_jobs WHERE external_handle = ?")
                .bind(handle)
                .fetch_optional(&self.pool)
                .await?;
        holder.map(|id| parse_uuid(&id)).transpose()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Corrupt(format!("job id {raw}: {e}")))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn row_to_job(row: &SqliteRow) -> Result<GenerationJob> {
    let id: String = row.try_get("id")?;
    let script: Option<String> = row.try_get("script")?;
    let audio_key: Option<String> = row.try_get("audio_key")?;
    let mode: String = row.try_get("mode")?;
    let status: String = row.try_get("status")?;
    let failure: Option<String> = row.try_get("failure")?;
    let enhancement: i64 = row.try_get("enhancement")?;

    let source = match (script, audio_key) {
        (Some(text), None) => DrivingSource::Script { text },
        (None, Some(key)) => DrivingSource::Audio { key },
        _ => {
            return Err(StorageError::Corrupt(format!(
                "job {id} must have exactly one of script/audio"
            )))
        }
    };

    Ok(GenerationJob {
        id: parse_uuid(&id)?,
        owner_id: OwnerId::new(row.try_get::<String, _>("owner_id")?),
        photo_key: row.try_get("photo_key")?,
        source,
        voice_key: row.try_get("voice_key")?,
        mode: Mode::from_str(&mode)?,
        enhancement: enhancement != 0,
        derived_audio_key: row.try_get("derived_audio_key")?,
        external_handle: row.try_get("external_handle")?,
        output_key: row.try_get("output_key")?,
        status: JobStatus::from_str(&status)?,
        failure: failure
            .as_deref()
            .map(FailureCategory::from_str)
            .transpose()?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert_job(&self, job: &GenerationJob) -> Result<()> {
        let (script, audio_key) = match job.source() {
            DrivingSource::Script { text } => (Some(text.as_str()), None),
            DrivingSource::Audio { key } => (None, Some(key.as_str())),
        };

        let result = sqlx::query(
            "INSERT INTO generation_jobs (
                id, owner_id, photo_key, script, audio_key, voice_key, mode, enhancement,
                derived_audio_key, external_handle, output_key, status, failure,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id().to_string())
        .bind(job.owner_id().as_str())
        .bind(job.photo_key())
        .bind(script)
        .bind(audio_key)
        .bind(job.voice_key())
        .bind(job.mode().as_str())
        .bind(job.enhancement() as i64)
        .bind(job.derived_audio_key())
        .bind(job.external_handle())
        .bind(job.output_key())
        .bind(job.status().as_str())
        .bind(job.failure().map(|f| f.as_str()))
        .bind(job.created_at().timestamp_millis())
        .bind(job.updated_at().timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::DuplicateJob(job.id())),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_job(&self, id: JobId) -> Result<Option<GenerationJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn find_by_external_handle(&self, handle: &str) -> Result<Option<GenerationJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE external_handle = ?"
        ))
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_jobs_for_owner(&self, owner: &OwnerId) -> Result<Vec<GenerationJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE owner_id = ? ORDER BY created_at DESC"
        ))
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    async fn get_incomplete_jobs(&self) -> Result<Vec<GenerationJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs
             WHERE status IN ('queued', 'processing')
             ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        failure: Option<FailureCategory>,
    ) -> Result<bool> {
        from.check_transition(to)?;
        let failure = if to == JobStatus::Failed { failure } else { None };

        let result = sqlx::query(
            "UPDATE generation_jobs
             SET status = ?, failure = COALESCE(?, failure), updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(failure.map(|f| f.as_str()))
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.not_applied(id).await;
        }

        debug!(%id, from = %from, to = %to, "Job status updated");
        Ok(true)
    }

    async fn record_derived_audio(&self, id: JobId, audio_key: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE generation_jobs
             SET derived_audio_key = ?, updated_at = ?
             WHERE id = ? AND status = 'processing' AND derived_audio_key IS NULL",
        )
        .bind(audio_key)
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.not_applied(id).await;
        }
        Ok(true)
    }

    async fn record_external_handle(&self, id: JobId, handle: &str) -> Result<bool> {
        let conflict = |holder: JobId| StorageError::HandleConflict {
            handle: handle.to_string(),
            holder,
        };

        match self.handle_holder(handle).await? {
            Some(holder) if holder == id => return Ok(false),
            Some(holder) => return Err(conflict(holder)),
            None => {}
        }

        let result = sqlx::query(
            "UPDATE generation_jobs
             SET external_handle = ?, updated_at = ?
             WHERE id = ? AND status = 'processing' AND external_handle IS NULL",
        )
        .bind(handle)
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => Ok(true),
            Ok(_) => self.not_applied(id).await,
            Err(e) if is_unique_violation(&e) => match self.handle_holder(handle).await? {
                Some(holder) if holder != id => Err(conflict(holder)),
                _ => Ok(false),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn complete_job(&self, id: JobId, output_key: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE generation_jobs
             SET status = 'completed', output_key = ?, updated_at = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(output_key)
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.not_applied(id).await;
        }
        Ok(true)
    }
}

#[async_trait]
impl CreditLedger for SqliteJobStore {
    async fn check_balance(&self, owner: &OwnerId) -> Result<i64> {
        let credits: Option<i64> =
            sqlx::query_scalar("SELECT credits FROM accounts WHERE owner_id = ?")
                .bind(owner.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(credits.unwrap_or(0))
    }

    async fn debit_one(&self, owner: &OwnerId, job: JobId) -> Result<Debit> {
        let mut tx = self.pool.begin().await?;

        // Claim the job-keyed charge first: being a write, it takes SQLite's
        // write lock up front so concurrent debits serialize here.
        let claimed = sqlx::query(
            "INSERT INTO credit_charges (job_id, owner_id, charged_at) VALUES (?, ?, ?)
             ON CONFLICT(job_id) DO NOTHING",
        )
        .bind(job.to_string())
        .bind(owner.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(Debit::AlreadyCharged);
        }

        let remaining: Option<i64> = sqlx::query_scalar(
            "UPDATE accounts SET credits = credits - 1
             WHERE owner_id = ? AND credits > 0
             RETURNING credits",
        )
        .bind(owner.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(remaining) = remaining else {
            tx.rollback().await?;
            return Ok(Debit::InsufficientBalance);
        };

        tx.commit().await?;
        Ok(Debit::Charged { remaining })
    }

    async fn refund(&self, owner: &OwnerId, job: JobId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM credit_charges WHERE job_id = ? AND owner_id = ?")
            .bind(job.to_string())
            .bind(owner.as_str())
            .execute(&mut *tx)
            .await?;

        if removed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO accounts (owner_id, credits) VALUES (?, 1)
             ON CONFLICT(owner_id) DO UPDATE SET credits = credits + 1",
        )
        .bind(owner.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn is_charged(&self, job: JobId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM credit_charges WHERE job_id = ?")
            .bind(job.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn grant(&self, owner: &OwnerId, amount: i64) -> Result<i64> {
        let balance: i64 = sqlx::query_scalar(
            "INSERT INTO accounts (owner_id, credits) VALUES (?, ?)
             ON CONFLICT(owner_id) DO UPDATE SET credits = credits + excluded.credits
             RETURNING credits",
        )
        .bind(owner.as_str())
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;
        Ok(balance)
    }
}
