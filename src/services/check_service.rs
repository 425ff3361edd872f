use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use common::actors::{Actor, ActorType, ControlMessage};
use common::models::{ChangeSummary, Observation, Target};
use engine::{Checker, Fetcher, HistoryLookup};
use futures_util::{StreamExt, stream};
use sqlx::SqlitePool;
use storage::SqliteHistory;
use storage::repositories::{ObservationRepository, TargetRecord, TargetRepository};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

const BATCH_HEADER: &str = "Price changes were detected:";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub checked: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One line per notifiable change.
    pub changes: Vec<String>,
}

/// One pass over every target: check, persist, collect changes.
pub struct CheckRound<F> {
    checker: Checker<F>,
    pool: SqlitePool,
    history: SqliteHistory,
    max_concurrent: usize,
}

impl<F: Fetcher> CheckRound<F> {
    pub fn new(checker: Checker<F>, pool: SqlitePool, max_concurrent: usize) -> Self {
        Self {
            checker,
            history: SqliteHistory::new(pool.clone()),
            pool,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// A target that fails to check or persist is logged and counted; the
    /// round carries on with the rest.
    pub async fn run(&self) -> anyhow::Result<RoundReport> {
        let targets = TargetRepository::list(&self.pool)
            .await
            .context("loading targets")?;
        info!(targets = targets.len(), "starting check round");

        let results: Vec<(i64, anyhow::Result<TargetCheck>)> = stream::iter(targets)
            .map(|record| async move {
                let id = record.target.id;
                (id, self.check_target(record).await)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut report = RoundReport::default();
        for (target_id, result) in results {
            report.checked += 1;
            match result {
                Ok(TargetCheck { observation, change }) => {
                    if observation.is_success() {
                        report.succeeded += 1;
                    } else {
                        report.failed += 1;
                    }
                    report.changes.extend(change);
                }
                Err(e) => {
                    report.failed += 1;
                    error!(target_id, "check could not be completed: {:#}", e);
                }
            }
        }

        info!(
            checked = report.checked,
            succeeded = report.succeeded,
            failed = report.failed,
            changes = report.changes.len(),
            "check round finished"
        );
        Ok(report)
    }

    /// Checks one target and persists the observation, as a round does.
    pub async fn check_target(&self, record: TargetRecord) -> anyhow::Result<TargetCheck> {
        let target = record.target;
        let history = self
            .history
            .recent(target.id, self.checker.config().history_limit)
            .await?;

        let outcome = self.checker.check_one(&target, &history).await;
        ObservationRepository::append(&self.pool, &outcome.observation)
            .await
            .with_context(|| format!("recording observation for target {}", target.id))?;

        if let Some(price) = outcome.observation.price() {
            if record.last_currency.as_ref() != Some(&price.currency) {
                TargetRepository::set_last_currency(&self.pool, target.id, &price.currency)
                    .await
                    .with_context(|| format!("recording currency of target {}", target.id))?;
            }
        }

        let change = match &outcome.change {
            Some(change) if outcome.is_notifiable() => Some(change_line(&target, change)),
            _ => None,
        };
        Ok(TargetCheck {
            observation: outcome.observation,
            change,
        })
    }
}

pub struct TargetCheck {
    pub observation: Observation,
    /// Set only for a notifiable change.
    pub change: Option<String>,
}

fn change_line(target: &Target, change: &ChangeSummary) -> String {
    let previous = change
        .previous
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "- {}: {} -> {} ({})",
        target.display_name(),
        previous,
        change.current,
        target.url
    )
}

/// Joins a round's change lines into one message, or `None` when nothing changed.
pub fn format_batch(changes: &[String]) -> Option<String> {
    if changes.is_empty() {
        return None;
    }
    Some(format!("{BATCH_HEADER}\n{}", changes.join("\n")))
}

/// Scheduler actor: one round at start-up, then one per interval.
pub struct CheckRoundService<F> {
    id: Uuid,
    round: Arc<CheckRound<F>>,
    interval: Duration,
    notify_tx: broadcast::Sender<String>,
}

impl<F: Fetcher> CheckRoundService<F> {
    pub fn new(
        round: Arc<CheckRound<F>>,
        interval: Duration,
        notify_tx: broadcast::Sender<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            round,
            interval,
            notify_tx,
        }
    }

    fn publish(&self, report: &RoundReport) {
        let Some(message) = format_batch(&report.changes) else {
            return;
        };
        if self.notify_tx.send(message.clone()).is_err() {
            info!("No notifier configured, skipping delivery:\n{}", message);
        }
    }
}

#[async_trait]
impl<F: Fetcher + 'static> Actor for CheckRoundService<F> {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> ActorType {
        ActorType::CheckRoundActor
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());

        info!(
            interval_secs = self.interval.as_secs(),
            "Starting check round service"
        );

        let mut ticker = time::interval(self.interval);
        // A round that overruns the interval delays the next one instead of stacking.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            match self.round.run().await {
                Ok(report) => self.publish(&report),
                Err(e) => {
                    let err_msg = format!("check round failed: {e:#}");
                    warn!("{}", err_msg);
                    if supervisor_tx
                        .send(ControlMessage::Error(self.name(), err_msg))
                        .await
                        .is_err()
                    {
                        heartbeat_handle.abort();
                        anyhow::bail!("supervisor channel closed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::TargetSelector;
    use engine::{EngineConfig, FetchError, FetchedDocument};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Pages(Arc<Mutex<HashMap<String, String>>>);

    impl Pages {
        fn put(&self, url: &str, body: &str) {
            self.0.lock().unwrap().insert(url.to_string(), body.to_string());
        }
    }

    #[async_trait]
    impl Fetcher for Pages {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchedDocument, FetchError> {
            let body = self.0.lock().unwrap().get(url).cloned();
            body.map(|body| FetchedDocument::html(url, body))
                .ok_or(FetchError::Status { status: 404 })
        }
    }

    const KETTLE: &str = "https://shop.example.com/kettle";
    const MUG: &str = "https://shop.example.com/mug";
    const GONE: &str = "https://shop.example.com/gone";

    fn page(price: &str) -> String {
        format!(r#"<html><body><span class="price">{price}</span></body></html>"#)
    }

    async fn setup() -> (Pages, CheckRound<Pages>, SqlitePool) {
        let pool = storage::db::connect("sqlite::memory:").await.unwrap();
        let selector = TargetSelector::declarative(".price").unwrap();
        TargetRepository::insert(&pool, KETTLE, Some("Kettle"), Some(&selector))
            .await
            .unwrap();
        TargetRepository::insert(&pool, MUG, Some("Mug"), Some(&selector))
            .await
            .unwrap();
        TargetRepository::insert(&pool, GONE, None, None).await.unwrap();

        let pages = Pages::default();
        let checker = Checker::new(pages.clone(), EngineConfig::default());
        let round = CheckRound::new(checker, pool.clone(), 2);
        (pages, round, pool)
    }

    #[tokio::test]
    async fn rounds_record_history_and_report_changes() {
        let (pages, round, pool) = setup().await;
        pages.put(KETTLE, &page("$49.99"));
        pages.put(MUG, &page("€8,50"));

        let first = round.run().await.unwrap();
        assert_eq!(first.checked, 3);
        assert_eq!(first.succeeded, 2);
        assert_eq!(first.failed, 1);
        assert!(first.changes.is_empty());

        pages.put(KETTLE, &page("$39.99"));
        let second = round.run().await.unwrap();
        assert_eq!(
            second.changes,
            vec!["- Kettle: $49.99 -> $39.99 (https://shop.example.com/kettle)".to_string()]
        );

        let targets = TargetRepository::list(&pool).await.unwrap();
        assert_eq!(targets[0].last_currency.as_ref().unwrap().as_str(), "USD");
        assert_eq!(targets[1].last_currency.as_ref().unwrap().as_str(), "EUR");
        assert!(targets[2].last_currency.is_none());

        let kettle = ObservationRepository::recent(&pool, targets[0].target.id, 10)
            .await
            .unwrap();
        assert_eq!(kettle.len(), 2);
        let gone = ObservationRepository::recent(&pool, targets[2].target.id, 10)
            .await
            .unwrap();
        assert_eq!(gone.len(), 2);
        assert!(gone.iter().all(|o| !o.is_success()));
    }

    #[tokio::test]
    async fn single_target_check_leaves_the_others_alone() {
        let (pages, round, pool) = setup().await;
        let targets = TargetRepository::list(&pool).await.unwrap();
        let (kettle_id, mug_id) = (targets[0].target.id, targets[1].target.id);
        pages.put(KETTLE, &page("$49.99"));
        pages.put(MUG, &page("€8,50"));

        let first = round.check_target(targets[0].clone()).await.unwrap();
        assert!(first.observation.is_success());
        assert!(first.change.is_none());

        pages.put(KETTLE, &page("$45.00"));
        let kettle = TargetRepository::get(&pool, kettle_id).await.unwrap().unwrap();
        assert_eq!(kettle.last_currency.as_ref().unwrap().as_str(), "USD");
        let second = round.check_target(kettle).await.unwrap();
        assert_eq!(
            second.change.as_deref(),
            Some("- Kettle: $49.99 -> $45.00 (https://shop.example.com/kettle)")
        );

        let recorded = ObservationRepository::recent(&pool, kettle_id, 10).await.unwrap();
        assert_eq!(recorded.len(), 2);
        let untouched = ObservationRepository::recent(&pool, mug_id, 10).await.unwrap();
        assert!(untouched.is_empty());
    }

    #[tokio::test]
    async fn single_target_failure_is_recorded_not_raised() {
        let (_pages, round, pool) = setup().await;
        let gone = TargetRepository::list(&pool).await.unwrap().remove(2);

        let checked = round.check_target(gone.clone()).await.unwrap();
        assert!(!checked.observation.is_success());
        assert!(checked.change.is_none());
        let recorded = ObservationRepository::recent(&pool, gone.target.id, 10)
            .await
            .unwrap();
        assert_eq!(recorded.len(), 1);
    }

    #[test]
    fn batch_message_lists_every_change() {
        assert_eq!(format_batch(&[]), None);
        let message = format_batch(&[
            "- Kettle: $49.99 -> $39.99 (https://a.example)".to_string(),
            "- Mug: €8.50 -> €9.00 (https://b.example)".to_string(),
        ])
        .unwrap();
        assert_eq!(
            message,
            "Price changes were detected:\n\
             - Kettle: $49.99 -> $39.99 (https://a.example)\n\
             - Mug: €8.50 -> €9.00 (https://b.example)"
        );
    }

    #[test]
    fn change_line_for_currency_switch() {
        use common::models::{CurrencyCode, Direction, Price};
        use rust_decimal::Decimal;

        let target = Target::new(4, "https://c.example/lamp");
        let change = ChangeSummary {
            previous: Some(Price::new(Decimal::new(2000, 2), CurrencyCode::parse("USD").unwrap())),
            current: Price::new(Decimal::new(1600, 2), CurrencyCode::parse("GBP").unwrap()),
            direction: Direction::CurrencyChanged,
        };
        assert_eq!(
            change_line(&target, &change),
            "- https://c.example/lamp: $20.00 -> £16.00 (https://c.example/lamp)"
        );
    }
}
