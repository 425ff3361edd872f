use anyhow::Context;
use async_trait::async_trait;
use common::models::Observation;
use engine::HistoryLookup;
use sqlx::SqlitePool;

use crate::repositories::ObservationRepository;

/// Observation history backed by the database.
#[derive(Clone)]
pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryLookup for SqliteHistory {
    async fn recent(&self, target_id: i64, limit: usize) -> anyhow::Result<Vec<Observation>> {
        ObservationRepository::recent(&self.pool, target_id, limit)
            .await
            .with_context(|| format!("loading history of target {target_id}"))
    }
}
