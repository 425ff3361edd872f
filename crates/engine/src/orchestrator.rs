use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use common::models::{ChangeSummary, CurrencyCode, Observation, Price, Target, TargetSelector};
use scraper::Html;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::EngineConfig;
use crate::detector;
use crate::error::{CheckError, FetchError, NoMatchError};
use crate::locator::{self, Locator};
use crate::naming;
use crate::normalizer::{Normalizer, Notation};
use crate::selector;
use crate::traits::{Fetcher, is_supported_content_type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStage {
    Fetching,
    Evaluating,
    Locating,
    Normalizing,
    Comparing,
}

impl CheckStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Evaluating => "evaluating",
            Self::Locating => "locating",
            Self::Normalizing => "normalizing",
            Self::Comparing => "comparing",
        }
    }
}

impl fmt::Display for CheckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one check, ready for the caller to persist and notify on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub observation: Observation,
    /// Present iff the observation is a success.
    pub change: Option<ChangeSummary>,
}

impl CheckOutcome {
    pub fn is_notifiable(&self) -> bool {
        self.change.as_ref().is_some_and(ChangeSummary::is_notifiable)
    }
}

struct Extracted {
    price: Price,
    fragment: String,
}

/// Drives one target through fetch, extraction, normalization and comparison.
///
/// Holds nothing mutable, so one `Checker` serves any number of concurrent
/// checks of distinct targets.
pub struct Checker<F> {
    fetcher: F,
    config: Arc<EngineConfig>,
    locator: Locator,
    normalizer: Normalizer,
}

impl<F: Fetcher> Checker<F> {
    pub fn new(fetcher: F, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        Self {
            fetcher,
            locator: Locator::new(&config),
            normalizer: Normalizer::new(Arc::clone(&config)),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a single check. Never fails: every error becomes a failure
    /// observation. `history` is the target's recent observations, newest
    /// first. Dropping the future abandons the check with nothing recorded.
    pub async fn check_one(&self, target: &Target, history: &[Observation]) -> CheckOutcome {
        let span = info_span!("check", target_id = target.id, url = %target.url);

        async move {
            let result = self.extract(target).await;
            let checked_at = Utc::now();

            match result {
                Ok(Extracted { price, fragment }) => {
                    debug!(stage = %CheckStage::Comparing, "comparing with history");
                    let change = detector::summarize(history, &price);
                    if let Some(mismatch) = change.currency_mismatch() {
                        warn!(%mismatch, "currency changed between checks");
                    }
                    info!(price = %price, direction = %change.direction, "check succeeded");

                    CheckOutcome {
                        observation: Observation::success(target.id, checked_at, price, fragment),
                        change: Some(change),
                    }
                }
                Err(err) => {
                    warn!(kind = %err.kind(), error = %err, "check failed");

                    CheckOutcome {
                        observation: Observation::failure(
                            target.id,
                            checked_at,
                            err.kind(),
                            err.to_string(),
                            err.raw_fragment().map(str::to_string),
                        ),
                        change: None,
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Fetches the target and names it from the page. Fetch problems are
    /// logged and the host name is used instead.
    pub async fn detect_name(&self, url: &str) -> String {
        match self.fetch(url).await {
            Ok(body) => {
                let document = Html::parse_document(&body);
                naming::detect_name(&document, url)
            }
            Err(err) => {
                warn!(url, error = %err, "could not fetch page to detect its name");
                naming::fallback_name(url)
            }
        }
    }

    async fn extract(&self, target: &Target) -> Result<Extracted, CheckError> {
        debug!(stage = %CheckStage::Fetching, "fetching page");
        let body = self.fetch(&target.url).await?;
        extract_price(&body, target.selector.as_ref(), &self.locator, &self.normalizer)
    }

    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let timeout = self.config.fetch_timeout;
        let document = tokio::time::timeout(timeout, self.fetcher.fetch(url, timeout))
            .await
            .map_err(|_| FetchError::Timeout(timeout))??;

        if !is_supported_content_type(document.content_type.as_deref()) {
            return Err(FetchError::UnsupportedContentType(
                document.content_type.unwrap_or_default(),
            ));
        }
        if document.final_url != url {
            debug!(final_url = %document.final_url, "followed redirect");
        }
        Ok(document.body)
    }
}

/// Everything that touches the parsed tree. Kept synchronous so the tree
/// never lives across an await.
fn extract_price(
    body: &str,
    selector: Option<&TargetSelector>,
    price_locator: &Locator,
    normalizer: &Normalizer,
) -> Result<Extracted, CheckError> {
    let document = Html::parse_document(body);

    let (fragment, currency_hint, notation): (String, Option<CurrencyCode>, Notation) =
        match selector {
            Some(selector) => {
                debug!(stage = %CheckStage::Evaluating, kind = %selector.kind(), "evaluating selector");
                let fragment = selector::evaluate(&document, selector)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        NoMatchError::SelectorMatchedNothing(selector.expression().to_string())
                    })?;
                (fragment, locator::currency_hint(&document), Notation::Locale)
            }
            None => {
                debug!(stage = %CheckStage::Locating, "locating price");
                let located = price_locator.locate(&document)?;
                (located.fragment, located.currency_hint, located.notation)
            }
        };

    debug!(stage = %CheckStage::Normalizing, %fragment, "normalizing");
    let price = normalizer.normalize_with(&fragment, currency_hint.as_ref(), notation)?;

    Ok(Extracted { price, fragment })
}
