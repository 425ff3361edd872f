use std::cmp::Ordering;

use common::models::{ChangeSummary, Direction, Observation, Price};

/// Price of the newest successful observation in a most-recent-first slice.
pub fn latest_success(history: &[Observation]) -> Option<&Price> {
    history.iter().find_map(Observation::price)
}

pub fn compare(previous: Option<&Price>, current: &Price) -> ChangeSummary {
    let direction = match previous {
        None => Direction::First,
        Some(previous) if previous.currency != current.currency => Direction::CurrencyChanged,
        Some(previous) => match current.amount.cmp(&previous.amount) {
            Ordering::Equal => Direction::Unchanged,
            Ordering::Greater => Direction::Increased,
            Ordering::Less => Direction::Decreased,
        },
    };

    ChangeSummary {
        previous: previous.cloned(),
        current: current.clone(),
        direction,
    }
}

pub fn summarize(history: &[Observation], current: &Price) -> ChangeSummary {
    compare(latest_success(history), current)
}
