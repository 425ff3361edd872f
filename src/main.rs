use std::sync::Arc;

use anyhow::{Context, bail};
use dotenvy::dotenv;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use common::actors::{Actor, ActorType};
use common::logger;
use common::models::Outcome;
use engine::{Checker, EngineConfig};
use fetcher::HttpFetcher;
use storage::repositories::{ObservationRepository, TargetRepository};

use crate::actors::Supervisor;
use crate::cli::Command;
use crate::config::AppConfig;
use crate::services::check_service::format_batch;
use crate::services::{CheckRound, CheckRoundService, TelegramService};

mod actors;
mod cli;
mod config;
mod services;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::setup_logger();
    dotenv().ok();

    let command = cli::parse_args(std::env::args().skip(1))?;
    if command == Command::Help {
        println!("{}", cli::USAGE);
        return Ok(());
    }

    let app_config = AppConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;
    debug!(?app_config, "configuration loaded");

    let pool = storage::db::connect(&app_config.database_url)
        .await
        .with_context(|| format!("opening database {}", app_config.database_url))?;
    let checker = Checker::new(HttpFetcher::new()?, engine_config);

    match command {
        Command::Run => run(app_config, checker, pool).await,
        Command::Once => once(&app_config, checker, pool).await,
        Command::Add {
            url,
            selector,
            name,
        } => {
            url::Url::parse(&url).with_context(|| format!("'{url}' is not a valid url"))?;
            let name = match name {
                Some(name) => name,
                None => checker.detect_name(&url).await,
            };
            let record = TargetRepository::insert(&pool, &url, Some(&name), selector.as_ref()).await?;
            println!("Added target {}: {}", record.target.id, name);
            Ok(())
        }
        Command::Selector {
            id,
            selector,
            check,
        } => {
            if !TargetRepository::update_selector(&pool, id, selector.as_ref()).await? {
                bail!("no target with id {id}");
            }
            match &selector {
                Some(selector) => println!(
                    "Target {id} now uses {} {}",
                    selector.kind(),
                    selector.expression()
                ),
                None => println!("Target {id} now locates its price automatically"),
            }
            if check {
                check_one(&app_config, checker, pool, id).await?;
            }
            Ok(())
        }
        Command::Rename { id, name } => {
            if !TargetRepository::update_name(&pool, id, &name).await? {
                bail!("no target with id {id}");
            }
            println!("Renamed target {id} to {name}");
            Ok(())
        }
        Command::Check { id } => check_one(&app_config, checker, pool, id).await,
        Command::List => list(&pool).await,
        Command::History { id, limit } => history(&pool, id, limit).await,
        Command::Remove { id } => {
            if !TargetRepository::delete(&pool, id).await? {
                bail!("no target with id {id}");
            }
            println!("Removed target {id}");
            Ok(())
        }
        Command::Help => Ok(()),
    }
}

async fn run(
    app_config: AppConfig,
    checker: Checker<HttpFetcher>,
    pool: SqlitePool,
) -> anyhow::Result<()> {
    info!("System starting up...");

    let round = Arc::new(CheckRound::new(checker, pool, app_config.max_concurrent_checks));
    let (notify_tx, _) = broadcast::channel::<String>(64);

    match &app_config.telegram {
        Some(telegram) => {
            let service = TelegramService::new(telegram);
            tokio::spawn(service.start(notify_tx.subscribe()));
        }
        None => warn!("Telegram is not configured; price changes will only be logged"),
    }

    let mut supervisor = Supervisor::new();
    let interval = app_config.check_interval;
    supervisor.register_actor(
        ActorType::CheckRoundActor,
        Box::new(move || -> Box<dyn Actor> {
            Box::new(CheckRoundService::new(
                round.clone(),
                interval,
                notify_tx.clone(),
            ))
        }),
    );

    supervisor.start().await;
    Ok(())
}

async fn once(
    app_config: &AppConfig,
    checker: Checker<HttpFetcher>,
    pool: SqlitePool,
) -> anyhow::Result<()> {
    let round = CheckRound::new(checker, pool, app_config.max_concurrent_checks);
    let report = round.run().await?;
    println!(
        "Checked {} targets: {} succeeded, {} failed",
        report.checked, report.succeeded, report.failed
    );

    if let Some(message) = format_batch(&report.changes) {
        println!("{message}");
        match &app_config.telegram {
            Some(telegram) => TelegramService::new(telegram)
                .send(message)
                .await
                .context("sending Telegram notification")?,
            None => info!("Telegram is not configured; skipping notification"),
        }
    }
    Ok(())
}

async fn check_one(
    app_config: &AppConfig,
    checker: Checker<HttpFetcher>,
    pool: SqlitePool,
    id: i64,
) -> anyhow::Result<()> {
    let Some(record) = TargetRepository::get(&pool, id).await? else {
        bail!("no target with id {id}");
    };
    let name = record.target.display_name().to_string();

    let round = CheckRound::new(checker, pool, app_config.max_concurrent_checks);
    let checked = round.check_target(record).await?;
    match &checked.observation.outcome {
        Outcome::Success(price) => println!("{name}: {price}"),
        Outcome::Failure { kind, detail } => println!("{name}: {kind}: {detail}"),
    }
    if let Some(change) = checked.change {
        println!("{change}");
    }
    Ok(())
}

async fn list(pool: &SqlitePool) -> anyhow::Result<()> {
    let targets = TargetRepository::list(pool).await?;
    if targets.is_empty() {
        println!("No targets yet. Add one with `price-watch add <url>`.");
        return Ok(());
    }

    for record in targets {
        let target = &record.target;
        let selector = target
            .selector
            .as_ref()
            .map(|s| format!("{} {}", s.kind(), s.expression()))
            .unwrap_or_else(|| "auto".to_string());
        let currency = record
            .last_currency
            .as_ref()
            .map(|c| c.as_str())
            .unwrap_or("-");
        println!(
            "{:>4}  {}  [{}]  {}  {}",
            target.id,
            target.display_name(),
            currency,
            selector,
            target.url
        );
    }
    Ok(())
}

async fn history(pool: &SqlitePool, id: i64, limit: usize) -> anyhow::Result<()> {
    let Some(record) = TargetRepository::get(pool, id).await? else {
        bail!("no target with id {id}");
    };
    let observations = ObservationRepository::recent(pool, id, limit).await?;
    let stats = ObservationRepository::stats(pool, id).await?;

    println!("{} ({})", record.target.display_name(), record.target.url);
    println!(
        "{} checks, {} successful",
        stats.total_checks, stats.successful_checks
    );
    if let (Some(lowest), Some(highest)) = (&stats.lowest, &stats.highest) {
        println!("lowest {lowest}, highest {highest}");
    }

    for observation in observations {
        let when = observation.checked_at.format("%Y-%m-%d %H:%M");
        match &observation.outcome {
            Outcome::Success(price) => println!("{when}  {price}"),
            Outcome::Failure { kind, detail } => println!("{when}  {kind}: {detail}"),
        }
    }
    Ok(())
}
