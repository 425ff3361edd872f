use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use common::models::{Direction, FailureKind, Observation, Target, TargetSelector};
use engine::{Checker, EngineConfig, FetchError, FetchedDocument, Fetcher};
use rust_decimal::Decimal;

/// Serves whatever page was last put under a URL.
#[derive(Default)]
struct PageServer {
    pages: Mutex<HashMap<String, String>>,
}

impl PageServer {
    fn put(&self, url: &str, body: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }
}

#[async_trait]
impl<'a> Fetcher for &'a PageServer {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchedDocument, FetchError> {
        let body = self.pages.lock().unwrap().get(url).cloned();
        body.map(|body| FetchedDocument::html(url, body))
            .ok_or(FetchError::Status { status: 404 })
    }
}

const URL: &str = "https://shop.example.com/kettle";

fn page(price: &str) -> String {
    format!(
        r#"<html><head><title>Kettle</title></head>
           <body><h1>Kettle</h1><span class="price">{price}</span></body></html>"#
    )
}

fn target() -> Target {
    Target::new(1, URL).with_selector(TargetSelector::declarative(".price").unwrap())
}

#[tokio::test]
async fn price_drop_is_detected() {
    let server = PageServer::default();
    let checker = Checker::new(&server, EngineConfig::default());
    let mut history: Vec<Observation> = Vec::new();

    server.put(URL, &page("$49.99"));
    let first = checker.check_one(&target(), &history).await;

    let price = first.observation.price().unwrap();
    assert_eq!(price.amount, Decimal::new(4999, 2));
    assert_eq!(price.currency.as_str(), "USD");
    assert_eq!(first.observation.raw_text.as_deref(), Some("$49.99"));
    assert_eq!(first.change.as_ref().unwrap().direction, Direction::First);
    assert!(!first.is_notifiable());
    history.insert(0, first.observation);

    server.put(URL, &page("$39.99"));
    let second = checker.check_one(&target(), &history).await;

    let change = second.change.clone().unwrap();
    assert_eq!(change.direction, Direction::Decreased);
    assert_eq!(change.previous.unwrap().amount, Decimal::new(4999, 2));
    assert_eq!(change.current.amount, Decimal::new(3999, 2));
    assert!(second.is_notifiable());
}

#[tokio::test]
async fn repeated_checks_agree() {
    let server = PageServer::default();
    server.put(URL, &page("1.234,56 €"));
    let checker = Checker::new(&server, EngineConfig::default());

    let a = checker.check_one(&target(), &[]).await;
    let b = checker.check_one(&target(), &[]).await;

    assert_eq!(a.observation.status(), b.observation.status());
    assert_eq!(a.observation.price(), b.observation.price());
    assert_eq!(a.observation.price().unwrap().amount, Decimal::new(123456, 2));
    assert_eq!(a.observation.price().unwrap().currency.as_str(), "EUR");
}

#[tokio::test]
async fn failures_are_skipped_when_comparing() {
    let server = PageServer::default();
    let checker = Checker::new(&server, EngineConfig::default());
    let mut history: Vec<Observation> = Vec::new();

    server.put(URL, &page("$20.00"));
    history.insert(0, checker.check_one(&target(), &history).await.observation);

    server.put(URL, &page("Temporarily unavailable"));
    let failed = checker.check_one(&target(), &history).await;
    assert_eq!(failed.observation.failure_kind(), Some(FailureKind::Normalization));
    assert_eq!(
        failed.observation.raw_text.as_deref(),
        Some("Temporarily unavailable")
    );
    history.insert(0, failed.observation);

    server.put(URL, &page("$25.00"));
    let recovered = checker.check_one(&target(), &history).await;
    assert_eq!(recovered.change.unwrap().direction, Direction::Increased);
}

#[tokio::test]
async fn currency_switch_is_flagged() {
    let server = PageServer::default();
    let checker = Checker::new(&server, EngineConfig::default());

    server.put(URL, &page("$20.00"));
    let first = checker.check_one(&target(), &[]).await;

    server.put(URL, &page("£16.00"));
    let second = checker
        .check_one(&target(), std::slice::from_ref(&first.observation))
        .await;

    let change = second.change.unwrap();
    assert_eq!(change.direction, Direction::CurrencyChanged);
    let mismatch = change.currency_mismatch().unwrap();
    assert_eq!(mismatch.previous.as_str(), "USD");
    assert_eq!(mismatch.current.as_str(), "GBP");
}

#[tokio::test]
async fn missing_page_and_out_of_range_prices_fail() {
    let server = PageServer::default();
    let checker = Checker::new(&server, EngineConfig::default());

    let missing = checker.check_one(&target(), &[]).await;
    assert_eq!(missing.observation.failure_kind(), Some(FailureKind::Fetch));
    assert!(missing.observation.raw_text.is_none());

    for fragment in ["-5.00", "0", "$25,000,000"] {
        server.put(URL, &page(fragment));
        let outcome = checker.check_one(&target(), &[]).await;
        assert_eq!(
            outcome.observation.failure_kind(),
            Some(FailureKind::Normalization),
            "{fragment}"
        );
        assert_eq!(outcome.observation.raw_text.as_deref(), Some(fragment));
    }
}

#[tokio::test]
async fn structural_path_selects_the_second_offer() {
    let server = PageServer::default();
    server.put(
        URL,
        r#"<ul><li><b>CHF 12.00</b></li><li><b>CHF 10.50</b></li></ul>"#,
    );
    let checker = Checker::new(&server, EngineConfig::default());
    let target =
        Target::new(1, URL).with_selector(TargetSelector::structural("//li[2]/b/text()").unwrap());

    let outcome = checker.check_one(&target, &[]).await;
    let price = outcome.observation.price().unwrap();
    assert_eq!(price.amount, Decimal::new(1050, 2));
    assert_eq!(price.currency.as_str(), "CHF");
}

#[tokio::test]
async fn page_without_any_price_reports_no_match() {
    let server = PageServer::default();
    server.put(URL, "<html><body><p>Coming soon</p></body></html>");
    let checker = Checker::new(&server, EngineConfig::default());

    let outcome = checker.check_one(&Target::new(1, URL), &[]).await;
    assert_eq!(outcome.observation.failure_kind(), Some(FailureKind::NoMatch));
    assert!(outcome.observation.error().unwrap().starts_with("no match"));
}
