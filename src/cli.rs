use anyhow::{Context, bail};
use common::models::TargetSelector;

pub const USAGE: &str = "\
usage: price-watch [command]

commands:
  run                                   check every target on the configured interval (default)
  once                                  run a single round and exit
  add <url> [--css EXPR | --xpath EXPR] [--name NAME]
                                        start watching a page
  selector <id> (--css EXPR | --xpath EXPR | --auto) [--check]
                                        change how a target's price is found
  rename <id> <name>                    change a target's display name
  check <id>                            check one target now and record the result
  list                                  show watched targets
  history <id> [limit]                  show recent observations of a target
  remove <id>                           stop watching a target and drop its history";

const DEFAULT_HISTORY_ROWS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    Once,
    Add {
        url: String,
        selector: Option<TargetSelector>,
        name: Option<String>,
    },
    Selector {
        id: i64,
        /// `None` switches the target back to automatic location.
        selector: Option<TargetSelector>,
        check: bool,
    },
    Rename { id: i64, name: String },
    Check { id: i64 },
    List,
    History { id: i64, limit: usize },
    Remove { id: i64 },
    Help,
}

/// Parses the arguments after the program name.
pub fn parse_args<I>(args: I) -> anyhow::Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let Some(command) = args.next() else {
        return Ok(Command::Run);
    };

    let parsed = match command.as_str() {
        "run" => Command::Run,
        "once" => Command::Once,
        "list" => Command::List,
        "-h" | "--help" | "help" => Command::Help,
        "add" => parse_add(&mut args)?,
        "selector" => parse_selector(&mut args)?,
        "rename" => {
            let id = parse_id(args.next())?;
            let name = args.next().context("rename needs a name")?;
            if name.trim().is_empty() {
                bail!("the name must not be blank");
            }
            Command::Rename { id, name }
        }
        "check" => Command::Check {
            id: parse_id(args.next())?,
        },
        "history" => {
            let id = parse_id(args.next())?;
            let limit = match args.next() {
                Some(limit) => limit
                    .parse::<usize>()
                    .with_context(|| format!("invalid history limit '{limit}'"))?,
                None => DEFAULT_HISTORY_ROWS,
            };
            Command::History { id, limit }
        }
        "remove" => Command::Remove {
            id: parse_id(args.next())?,
        },
        other => bail!("unknown command '{other}'\n\n{USAGE}"),
    };

    if let Some(extra) = args.next() {
        bail!("unexpected argument '{extra}'");
    }
    Ok(parsed)
}

fn parse_add(args: &mut impl Iterator<Item = String>) -> anyhow::Result<Command> {
    let mut url = None;
    let mut selector = None;
    let mut name = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--css" | "--xpath" => {
                let expression = args
                    .next()
                    .with_context(|| format!("missing expression for {arg}"))?;
                if selector.is_some() {
                    bail!("only one of --css and --xpath may be given");
                }
                selector = Some(build_selector(&arg, expression)?);
            }
            "--name" => {
                name = Some(args.next().context("missing value for --name")?);
            }
            flag if flag.starts_with("--") => bail!("unknown option '{flag}'"),
            _ if url.is_none() => url = Some(arg),
            _ => bail!("unexpected argument '{arg}'"),
        }
    }

    Ok(Command::Add {
        url: url.context("add needs a url")?,
        selector,
        name,
    })
}

fn parse_selector(args: &mut impl Iterator<Item = String>) -> anyhow::Result<Command> {
    let id = parse_id(args.next())?;
    let mut choice = None;
    let mut check = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--css" | "--xpath" | "--auto" => {
                if choice.is_some() {
                    bail!("only one of --css, --xpath and --auto may be given");
                }
                choice = Some(if arg == "--auto" {
                    None
                } else {
                    let expression = args
                        .next()
                        .with_context(|| format!("missing expression for {arg}"))?;
                    Some(build_selector(&arg, expression)?)
                });
            }
            "--check" => check = true,
            _ => bail!("unexpected argument '{arg}'"),
        }
    }

    Ok(Command::Selector {
        id,
        selector: choice.context("selector needs one of --css EXPR, --xpath EXPR or --auto")?,
        check,
    })
}

/// Builds the selector for `--css` or `--xpath` and rejects malformed
/// expressions before anything is stored.
fn build_selector(flag: &str, expression: String) -> anyhow::Result<TargetSelector> {
    let selector = if flag == "--css" {
        TargetSelector::declarative(expression)?
    } else {
        TargetSelector::structural(expression)?
    };
    engine::selector::validate(&selector)?;
    Ok(selector)
}

fn parse_id(arg: Option<String>) -> anyhow::Result<i64> {
    let arg = arg.context("missing target id")?;
    arg.parse::<i64>()
        .with_context(|| format!("invalid target id '{arg}'"))
}
