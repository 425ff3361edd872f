use chrono::{Duration, TimeZone, Utc};
use common::models::{CurrencyCode, FailureKind, Observation, Price, TargetSelector};
use engine::HistoryLookup;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use storage::SqliteHistory;
use storage::db::connect;
use storage::repositories::{ObservationRepository, TargetRepository};

const URL: &str = "https://shop.example.com/kettle";

async fn pool() -> SqlitePool {
    connect("sqlite::memory:").await.unwrap()
}

fn price(cents: i64, currency: &str) -> Price {
    Price::new(Decimal::new(cents, 2), CurrencyCode::parse(currency).unwrap())
}

#[tokio::test]
async fn targets_round_trip() {
    let pool = pool().await;
    let selector = TargetSelector::declarative("span.price").unwrap();

    let created = TargetRepository::insert(&pool, URL, Some("Kettle"), Some(&selector))
        .await
        .unwrap();
    let bare = TargetRepository::insert(&pool, "https://shop.example.com/mug", None, None)
        .await
        .unwrap();
    assert!(bare.target.id > created.target.id);

    let listed = TargetRepository::list(&pool).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].target.url, URL);
    assert_eq!(listed[0].target.selector.as_ref(), Some(&selector));
    assert_eq!(listed[0].target.name.as_deref(), Some("Kettle"));
    assert!(listed[1].target.selector.is_none());

    let path = TargetSelector::structural("//span[@class='price']").unwrap();
    assert!(TargetRepository::update_selector(&pool, bare.target.id, Some(&path)).await.unwrap());
    assert!(TargetRepository::update_name(&pool, bare.target.id, "Mug").await.unwrap());
    TargetRepository::set_last_currency(&pool, bare.target.id, &CurrencyCode::parse("eur").unwrap())
        .await
        .unwrap();

    let fetched = TargetRepository::get(&pool, bare.target.id).await.unwrap().unwrap();
    assert_eq!(fetched.target.selector, Some(path));
    assert_eq!(fetched.target.display_name(), "Mug");
    assert_eq!(fetched.last_currency.unwrap().as_str(), "EUR");

    assert!(!TargetRepository::update_name(&pool, 999, "Ghost").await.unwrap());
    assert!(TargetRepository::get(&pool, 999).await.unwrap().is_none());
}

#[tokio::test]
async fn history_is_newest_first_and_survives_failures() {
    let pool = pool().await;
    let target = TargetRepository::insert(&pool, URL, None, None).await.unwrap().target;
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();

    let observations = [
        Observation::success(target.id, start, price(4999, "USD"), "$49.99"),
        Observation::failure(
            target.id,
            start + Duration::hours(4),
            FailureKind::Normalization,
            "normalization failed: no digits",
            Some("Sold out".to_string()),
        ),
        Observation::failure(
            target.id,
            start + Duration::hours(8),
            FailureKind::Fetch,
            "fetch failed: status 503",
            None,
        ),
        Observation::success(target.id, start + Duration::hours(12), price(3999, "USD"), "$39.99"),
    ];
    for observation in &observations {
        ObservationRepository::append(&pool, observation).await.unwrap();
    }

    let recent = ObservationRepository::recent(&pool, target.id, 10).await.unwrap();
    let expected: Vec<Observation> = observations.iter().rev().cloned().collect();
    assert_eq!(recent, expected);

    let limited = ObservationRepository::recent(&pool, target.id, 2).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].price(), Some(&price(3999, "USD")));
    assert_eq!(limited[1].failure_kind(), Some(FailureKind::Fetch));

    let history = SqliteHistory::new(pool.clone());
    let via_trait = history.recent(target.id, 1).await.unwrap();
    assert_eq!(via_trait, vec![observations[3].clone()]);
}

#[tokio::test]
async fn stats_rank_only_the_current_currency() {
    let pool = pool().await;
    let target = TargetRepository::insert(&pool, URL, None, None).await.unwrap().target;
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();

    let empty = ObservationRepository::stats(&pool, target.id).await.unwrap();
    assert_eq!(empty.total_checks, 0);
    assert!(empty.lowest.is_none() && empty.highest.is_none());

    let rows = [
        Observation::success(target.id, start, price(500, "USD"), "$5.00"),
        Observation::success(target.id, start + Duration::hours(1), price(90000, "USD"), "$900.00"),
        Observation::failure(
            target.id,
            start + Duration::hours(2),
            FailureKind::NoMatch,
            "no match: selector matched nothing",
            None,
        ),
        Observation::success(target.id, start + Duration::hours(3), price(1800, "GBP"), "£18.00"),
        Observation::success(target.id, start + Duration::hours(4), price(1650, "GBP"), "£16.50"),
    ];
    for observation in &rows {
        ObservationRepository::append(&pool, observation).await.unwrap();
    }

    let stats = ObservationRepository::stats(&pool, target.id).await.unwrap();
    assert_eq!(stats.total_checks, 5);
    assert_eq!(stats.successful_checks, 4);
    assert_eq!(stats.lowest, Some(price(1650, "GBP")));
    assert_eq!(stats.highest, Some(price(1800, "GBP")));
}

#[tokio::test]
async fn deleting_a_target_drops_its_history() {
    let pool = pool().await;
    let target = TargetRepository::insert(&pool, URL, None, None).await.unwrap().target;
    ObservationRepository::append(
        &pool,
        &Observation::success(target.id, Utc::now(), price(100, "USD"), "$1.00"),
    )
    .await
    .unwrap();

    assert!(TargetRepository::delete(&pool, target.id).await.unwrap());
    assert!(!TargetRepository::delete(&pool, target.id).await.unwrap());
    assert!(ObservationRepository::recent(&pool, target.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn observation_for_unknown_target_is_rejected() {
    let pool = pool().await;
    let orphan = Observation::success(42, Utc::now(), price(100, "USD"), "$1.00");
    assert!(ObservationRepository::append(&pool, &orphan).await.is_err());
}
