use super::store::{EventQuery, Store};
use crate::domain::{ErrorEvent, ErrorType};
use crate::error::{Result, VigilError};
use crate::healing::HealingStrategy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info, instrument};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_event(row: &PgRow) -> Result<ErrorEvent> {
        let error_type: String = row.get("error_type");
        let error_type = ErrorType::try_from(error_type.as_str()).map_err(VigilError::Store)?;
        let http_status: Option<i32> = row.get("http_status");
        let response_time_ms: i64 = row.get("response_time_ms");
        let timestamp: DateTime<Utc> = row.get("timestamp");

        Ok(ErrorEvent {
            timestamp,
            source_id: row.get("source_id"),
            endpoint_path: row.get("endpoint_path"),
            error_type,
            http_status: http_status.and_then(|s| u16::try_from(s).ok()),
            response_time_ms: response_time_ms.max(0) as u64,
            resolved: row.get("resolved"),
            fix_method: row.get("fix_method"),
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self, event), fields(source = %event.source_id, endpoint = %event.endpoint_path))]
    async fn save_event(&self, event: &ErrorEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO error_events (
                timestamp, source_id, endpoint_path, error_type,
                http_status, response_time_ms, resolved, fix_method
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (timestamp, source_id, endpoint_path) DO UPDATE SET
                error_type = EXCLUDED.error_type,
                http_status = EXCLUDED.http_status,
                response_time_ms = EXCLUDED.response_time_ms,
                resolved = EXCLUDED.resolved,
                fix_method = EXCLUDED.fix_method
            "#,
        )
        .bind(event.timestamp)
        .bind(&event.source_id)
        .bind(&event.endpoint_path)
        .bind(event.error_type.as_str())
        .bind(event.http_status.map(i32::from))
        .bind(event.response_time_ms as i64)
        .bind(event.resolved)
        .bind(&event.fix_method)
        .execute(&self.pool)
        .await?;

        debug!("Saved event {} resolved={}", event.fingerprint(), event.resolved);
        Ok(())
    }

    #[instrument(skip(self, strategy), fields(strategy = %strategy.name))]
    async fn save_strategy(&self, strategy: &HealingStrategy) -> Result<()> {
        let error_types: Vec<String> = strategy
            .applicable_error_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO healing_strategies (
                name, scope, applicable_error_types, priority,
                success_count, fail_count, success_rate, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (name) DO UPDATE SET
                scope = EXCLUDED.scope,
                applicable_error_types = EXCLUDED.applicable_error_types,
                priority = EXCLUDED.priority,
                success_count = EXCLUDED.success_count,
                fail_count = EXCLUDED.fail_count,
                success_rate = EXCLUDED.success_rate,
                updated_at = NOW()
            "#,
        )
        .bind(&strategy.name)
        .bind(strategy.scope.to_string())
        .bind(&error_types)
        .bind(strategy.priority as i32)
        .bind(strategy.success_count as i64)
        .bind(strategy.fail_count as i64)
        .bind(strategy.success_rate())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<ErrorEvent>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT timestamp, source_id, endpoint_path, error_type,
                   http_status, response_time_ms, resolved, fix_method
            FROM error_events
            WHERE TRUE
            "#,
        );

        if let Some(source_id) = &query.source_id {
            qb.push(" AND source_id = ").push_bind(source_id.clone());
        }
        if let Some(endpoint_path) = &query.endpoint_path {
            qb.push(" AND endpoint_path = ").push_bind(endpoint_path.clone());
        }
        if let Some(error_type) = query.error_type {
            qb.push(" AND error_type = ").push_bind(error_type.as_str());
        }
        if let Some(resolved) = query.resolved {
            qb.push(" AND resolved = ").push_bind(resolved);
        }
        if let Some(since) = query.since {
            qb.push(" AND timestamp >= ").push_bind(since);
        }
        qb.push(" ORDER BY timestamp DESC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut events = rows
            .iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>>>()?;
        events.reverse();
        Ok(events)
    }

    async fn flush(&self) -> Result<()> {
        // Writes are not buffered; closing the pool waits for in-flight queries
        self.pool.close().await;
        Ok(())
    }
}
