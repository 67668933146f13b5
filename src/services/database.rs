use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement,
    Value as DbValue,
};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::services::sink::{HeartbeatSink, ShareEvent, ShareOutcome, ShareSink};
use crate::services::stats::{NodeIdentity, StatsSnapshot};

/// A worker row for the dashboard: share count and summed session
/// difficulty over the recent window.
#[derive(Debug, Clone)]
pub struct WorkerRow {
    pub name: String,
    pub shares: i64,
    pub difficulty: f64,
}

/// Cluster-wide totals summed over nodes that heartbeat recently.
#[derive(Debug, Clone, Default)]
pub struct ClusterTotals {
    pub miners: i64,
    pub submitted: i64,
    pub accepted: i64,
    pub rejected: i64,
    pub nodes: i64,
}

/// Postgres persistence. Two optional connections: `shares` feeds the
/// mining pool backend's `shares` table, `stats` holds the relay's own
/// `proxy_stats` / `worker_stats` tables used by the dashboard.
#[derive(Clone)]
pub struct DatabaseService {
    shares: Option<DatabaseConnection>,
    stats: Option<DatabaseConnection>,
    node_id: String,
}

impl DatabaseService {
    pub async fn connect(config: &DatabaseConfig, node: &NodeIdentity) -> Result<Self> {
        let shares = match &config.shares_url {
            Some(url) => Some(open(url).await?),
            None => None,
        };
        let stats = match &config.stats_url {
            Some(url) => Some(open(url).await?),
            None => None,
        };

        let service = Self {
            shares,
            stats,
            node_id: node.id.clone(),
        };
        service.ensure_schema().await?;
        Ok(service)
    }

    /// Idempotent bootstrap of the relay-owned tables on the stats
    /// connection. The shares table belongs to the pool backend and is
    /// never created here.
    async fn ensure_schema(&self) -> Result<()> {
        let Some(db) = &self.stats else {
            return Ok(());
        };

        for ddl in [
            r#"CREATE TABLE IF NOT EXISTS proxy_stats (
                id VARCHAR(255) PRIMARY KEY,
                hostname VARCHAR(255),
                miners_connected INT DEFAULT 0,
                shares_submitted BIGINT DEFAULT 0,
                shares_accepted BIGINT DEFAULT 0,
                shares_rejected BIGINT DEFAULT 0,
                uptime_seconds BIGINT DEFAULT 0,
                last_beat TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )"#,
            r#"CREATE TABLE IF NOT EXISTS worker_stats (
                worker_name VARCHAR(255),
                proxy_id VARCHAR(255),
                pool_id VARCHAR(50),
                shares BIGINT DEFAULT 0,
                difficulty DOUBLE PRECISION DEFAULT 0,
                last_seen TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                PRIMARY KEY (worker_name, proxy_id)
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_proxy_stats_beat ON proxy_stats(last_beat)",
            "CREATE INDEX IF NOT EXISTS idx_worker_last_seen ON worker_stats(last_seen)",
        ] {
            db.execute(Statement::from_string(DbBackend::Postgres, ddl))
                .await?;
        }

        info!("stats schema verified");
        Ok(())
    }

    pub fn has_stats(&self) -> bool {
        self.stats.is_some()
    }

    /// Workers that submitted within the last 10 minutes, busiest first.
    pub async fn recent_workers(&self) -> Result<Vec<WorkerRow>> {
        let Some(db) = &self.stats else {
            return Ok(Vec::new());
        };

        let rows = db
            .query_all(Statement::from_string(
                DbBackend::Postgres,
                r#"SELECT worker_name AS name,
                          SUM(shares)::BIGINT AS s,
                          SUM(difficulty)::DOUBLE PRECISION AS d
                   FROM worker_stats
                   WHERE last_seen > NOW() - INTERVAL '10 minutes'
                   GROUP BY worker_name
                   ORDER BY s DESC"#,
            ))
            .await?;

        let mut workers = Vec::with_capacity(rows.len());
        for row in rows {
            workers.push(WorkerRow {
                name: row.try_get::<String>("", "name")?,
                shares: row.try_get::<Option<i64>>("", "s")?.unwrap_or(0),
                difficulty: row.try_get::<Option<f64>>("", "d")?.unwrap_or(0.0),
            });
        }
        Ok(workers)
    }

    /// Totals over every node that heartbeat within the last 30 seconds.
    pub async fn cluster_totals(&self) -> Result<Option<ClusterTotals>> {
        let Some(db) = &self.stats else {
            return Ok(None);
        };

        let row = db
            .query_one(Statement::from_string(
                DbBackend::Postgres,
                r#"SELECT SUM(miners_connected)::BIGINT AS m,
                          SUM(shares_submitted)::BIGINT AS sub,
                          SUM(shares_accepted)::BIGINT AS a,
                          SUM(shares_rejected)::BIGINT AS r,
                          COUNT(*)::BIGINT AS nodes
                   FROM proxy_stats
                   WHERE last_beat > NOW() - INTERVAL '30 seconds'"#,
            ))
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ClusterTotals {
            miners: row.try_get::<Option<i64>>("", "m")?.unwrap_or(0),
            submitted: row.try_get::<Option<i64>>("", "sub")?.unwrap_or(0),
            accepted: row.try_get::<Option<i64>>("", "a")?.unwrap_or(0),
            rejected: row.try_get::<Option<i64>>("", "r")?.unwrap_or(0),
            nodes: row.try_get::<Option<i64>>("", "nodes")?.unwrap_or(0),
        }))
    }
}

async fn open(url: &str) -> Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new(url.to_owned());
    opt.max_connections(20)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let connection = Database::connect(opt).await?;
    Ok(connection)
}

#[async_trait]
impl ShareSink for DatabaseService {
    /// Double-write: one row per submission into the pool backend's
    /// `shares` table, plus the per-worker live aggregate.
    async fn submit_share(&self, event: &ShareEvent) -> Result<()> {
        if let Some(db) = &self.shares {
            db.execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"INSERT INTO shares
                   (poolid, blockheight, difficulty, networkdifficulty,
                    miner, worker, useragent, ipaddress, source, created)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())"#,
                [
                    DbValue::from(event.pool.as_str()),
                    DbValue::from(event.block_height as i64),
                    DbValue::from(event.difficulty),
                    DbValue::from(event.network_difficulty),
                    DbValue::from(event.miner.as_str()),
                    DbValue::from(event.worker.as_str()),
                    DbValue::from("proxy"),
                    DbValue::from(event.source_ip.as_str()),
                    DbValue::from(format!("port-{}", event.listen_port)),
                ],
            ))
            .await?;
        }

        if let Some(db) = &self.stats {
            db.execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"INSERT INTO worker_stats
                   (worker_name, proxy_id, pool_id, shares, difficulty, last_seen)
                   VALUES ($1, $2, $3, 1, $4, NOW())
                   ON CONFLICT (worker_name, proxy_id) DO UPDATE SET
                       shares = worker_stats.shares + 1,
                       difficulty = worker_stats.difficulty + EXCLUDED.difficulty,
                       last_seen = EXCLUDED.last_seen"#,
                [
                    DbValue::from(event.label.as_str()),
                    DbValue::from(self.node_id.as_str()),
                    DbValue::from(event.pool.as_str()),
                    DbValue::from(event.upstream_difficulty),
                ],
            ))
            .await?;
        }

        Ok(())
    }

    /// Accept/reject totals flow through the heartbeat; nothing to
    /// persist per resolution.
    async fn resolve_share(&self, outcome: &ShareOutcome) -> Result<()> {
        debug!(
            "share {} for {} ({})",
            if outcome.accepted { "accepted" } else { "rejected" },
            outcome.label,
            outcome.pool,
        );
        Ok(())
    }
}

#[async_trait]
impl HeartbeatSink for DatabaseService {
    async fn report_health(&self, node: &NodeIdentity, snapshot: &StatsSnapshot) -> Result<()> {
        let Some(db) = &self.stats else {
            return Ok(());
        };

        db.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"INSERT INTO proxy_stats
               (id, hostname, miners_connected, shares_submitted,
                shares_accepted, shares_rejected, uptime_seconds, last_beat)
               VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
               ON CONFLICT (id) DO UPDATE SET
                   miners_connected = EXCLUDED.miners_connected,
                   shares_submitted = EXCLUDED.shares_submitted,
                   shares_accepted = EXCLUDED.shares_accepted,
                   shares_rejected = EXCLUDED.shares_rejected,
                   uptime_seconds = EXCLUDED.uptime_seconds,
                   last_beat = NOW()"#,
            [
                DbValue::from(node.id.as_str()),
                DbValue::from(node.hostname.as_str()),
                DbValue::from(snapshot.connected_miners as i32),
                DbValue::from(snapshot.shares_submitted as i64),
                DbValue::from(snapshot.shares_accepted as i64),
                DbValue::from(snapshot.shares_rejected as i64),
                DbValue::from(snapshot.uptime_seconds as i64),
            ],
        ))
        .await?;

        Ok(())
    }
}
