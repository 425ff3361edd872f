use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::models::{CurrencyCode, FailureKind, Observation, ObservationStatus, Outcome, Price};
use rust_decimal::Decimal;
use sqlx::{FromRow, SqlitePool};

use crate::error::StorageError;

/// Aggregates over a target's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceStats {
    pub total_checks: i64,
    pub successful_checks: i64,
    /// Only prices in the most recent currency are ranked.
    pub lowest: Option<Price>,
    pub highest: Option<Price>,
}

#[derive(Debug, FromRow)]
struct ObservationRow {
    id: i64,
    target_id: i64,
    checked_at: DateTime<Utc>,
    status: String,
    amount: Option<String>,
    currency: Option<String>,
    raw_text: Option<String>,
    failure_kind: Option<String>,
    error: Option<String>,
}

impl TryFrom<ObservationRow> for Observation {
    type Error = StorageError;

    fn try_from(row: ObservationRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: &str| StorageError::Corrupt {
            id: row.id,
            reason: reason.to_string(),
        };

        let outcome = match row.status.parse::<ObservationStatus>()? {
            ObservationStatus::Success => {
                let (Some(amount), Some(currency)) = (&row.amount, &row.currency) else {
                    return Err(corrupt("success without amount or currency"));
                };
                let amount =
                    Decimal::from_str(amount).map_err(|_| corrupt("amount is not a decimal"))?;
                Outcome::Success(Price::new(amount, CurrencyCode::parse(currency)?))
            }
            ObservationStatus::Failure => {
                let kind = match &row.failure_kind {
                    Some(kind) => kind.parse::<FailureKind>()?,
                    None => return Err(corrupt("failure without a kind")),
                };
                Outcome::Failure {
                    kind,
                    detail: row.error.clone().unwrap_or_default(),
                }
            }
        };

        Ok(Observation {
            target_id: row.target_id,
            checked_at: row.checked_at,
            raw_text: row.raw_text,
            outcome,
        })
    }
}

pub struct ObservationRepository;

impl ObservationRepository {
    pub async fn append(pool: &SqlitePool, observation: &Observation) -> Result<i64, StorageError> {
        let (amount, currency, failure_kind, error) = match &observation.outcome {
            Outcome::Success(price) => (
                Some(price.amount.to_string()),
                Some(price.currency.as_str()),
                None,
                None,
            ),
            Outcome::Failure { kind, detail } => {
                (None, None, Some(kind.as_str()), Some(detail.as_str()))
            }
        };

        let id = sqlx::query_scalar::<_, i64>(
            r#"
                INSERT INTO observations (
                    target_id, checked_at, status, amount, currency, raw_text, failure_kind, error
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
            "#,
        )
        .bind(observation.target_id)
        .bind(observation.checked_at)
        .bind(observation.status().as_str())
        .bind(amount)
        .bind(currency)
        .bind(observation.raw_text.as_deref())
        .bind(failure_kind)
        .bind(error)
        .fetch_one(pool)
        .await?;

        Ok(id)
    }

    /// Newest first.
    pub async fn recent(
        pool: &SqlitePool,
        target_id: i64,
        limit: usize,
    ) -> Result<Vec<Observation>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ObservationRow>(
            r#"
                SELECT id, target_id, checked_at, status, amount, currency, raw_text, failure_kind, error
                FROM observations
                WHERE target_id = ?
                ORDER BY checked_at DESC, id DESC
                LIMIT ?
            "#,
        )
        .bind(target_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Observation::try_from).collect()
    }

    pub async fn stats(pool: &SqlitePool, target_id: i64) -> Result<PriceStats, StorageError> {
        let (total_checks, successful_checks) = sqlx::query_as::<_, (i64, i64)>(
            r#"
                SELECT COUNT(*), COALESCE(SUM(status = 'success'), 0)
                FROM observations
                WHERE target_id = ?
            "#,
        )
        .bind(target_id)
        .fetch_one(pool)
        .await?;

        // Amounts are decimal text, so ranking happens here rather than in SQL.
        let successes = sqlx::query_as::<_, (i64, String, String)>(
            r#"
                SELECT id, amount, currency
                FROM observations
                WHERE target_id = ? AND status = 'success'
                ORDER BY checked_at DESC, id DESC
            "#,
        )
        .bind(target_id)
        .fetch_all(pool)
        .await?;

        let mut prices = Vec::with_capacity(successes.len());
        for (id, amount, currency) in successes {
            let amount = Decimal::from_str(&amount).map_err(|_| StorageError::Corrupt {
                id,
                reason: format!("stored amount '{amount}' is not a decimal"),
            })?;
            prices.push(Price::new(amount, CurrencyCode::parse(&currency)?));
        }

        let current_currency = prices.first().map(|price| price.currency.clone());
        let comparable = || {
            prices
                .iter()
                .filter(|price| Some(&price.currency) == current_currency.as_ref())
        };

        Ok(PriceStats {
            total_checks,
            successful_checks,
            lowest: comparable().min_by_key(|price| price.amount).cloned(),
            highest: comparable().max_by_key(|price| price.amount).cloned(),
        })
    }
}
