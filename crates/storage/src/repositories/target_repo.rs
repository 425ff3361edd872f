use chrono::{DateTime, Utc};
use common::models::{CurrencyCode, SelectorKind, Target, TargetSelector};
use sqlx::{FromRow, SqlitePool};

use crate::error::StorageError;

/// A target as stored, with the bookkeeping the engine never sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    pub target: Target,
    pub last_currency: Option<CurrencyCode>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct TargetRow {
    id: i64,
    name: Option<String>,
    url: String,
    selector: Option<String>,
    selector_kind: Option<String>,
    last_currency: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TargetRow> for TargetRecord {
    type Error = StorageError;

    fn try_from(row: TargetRow) -> Result<Self, Self::Error> {
        let selector = match (row.selector_kind, row.selector) {
            (Some(kind), Some(expression)) => {
                Some(TargetSelector::new(kind.parse::<SelectorKind>()?, expression)?)
            }
            _ => None,
        };

        let mut target = Target::new(row.id, row.url);
        target.selector = selector;
        target.name = row.name;

        Ok(Self {
            target,
            last_currency: row.last_currency.as_deref().map(CurrencyCode::parse).transpose()?,
            created_at: row.created_at,
        })
    }
}

const SELECT_TARGET: &str = r#"
    SELECT id, name, url, selector, selector_kind, last_currency, created_at
    FROM targets
"#;

pub struct TargetRepository;

impl TargetRepository {
    pub async fn insert(
        pool: &SqlitePool,
        url: &str,
        name: Option<&str>,
        selector: Option<&TargetSelector>,
    ) -> Result<TargetRecord, StorageError> {
        let created_at = Utc::now();
        let id = sqlx::query_scalar::<_, i64>(
            r#"
                INSERT INTO targets (name, url, selector, selector_kind, created_at)
                VALUES (?, ?, ?, ?, ?)
                RETURNING id
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(selector.map(TargetSelector::expression))
        .bind(selector.map(|s| s.kind().as_str()))
        .bind(created_at)
        .fetch_one(pool)
        .await?;

        let mut target = Target::new(id, url);
        target.selector = selector.cloned();
        target.name = name.map(str::to_string);

        Ok(TargetRecord {
            target,
            last_currency: None,
            created_at,
        })
    }

    pub async fn list(pool: &SqlitePool) -> Result<Vec<TargetRecord>, StorageError> {
        let rows = sqlx::query_as::<_, TargetRow>(&format!("{SELECT_TARGET} ORDER BY id"))
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(TargetRecord::try_from).collect()
    }

    pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<TargetRecord>, StorageError> {
        let row = sqlx::query_as::<_, TargetRow>(&format!("{SELECT_TARGET} WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        row.map(TargetRecord::try_from).transpose()
    }

    /// Returns false when no such target exists.
    pub async fn update_selector(
        pool: &SqlitePool,
        id: i64,
        selector: Option<&TargetSelector>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE targets SET selector = ?, selector_kind = ? WHERE id = ?")
            .bind(selector.map(TargetSelector::expression))
            .bind(selector.map(|s| s.kind().as_str()))
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_name(pool: &SqlitePool, id: i64, name: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE targets SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_last_currency(
        pool: &SqlitePool,
        id: i64,
        currency: &CurrencyCode,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE targets SET last_currency = ? WHERE id = ?")
            .bind(currency.as_str())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Removes the target together with its observation history.
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM targets WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
