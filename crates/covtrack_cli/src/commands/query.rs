//! Query command implementation.

use crate::error::CliResult;
use crate::mirror::DirectoryRemote;
use crate::store::{FileClockStore, FileStore};
use clap::Subcommand;
use covtrack_model::{DateKey, Metric, Place, StatRecord};
use covtrack_sync::{QueryState, RankingBoard, SyncConfig, SyncError, SyncRepository};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Query shapes.
#[derive(Subcommand, Debug, Clone)]
pub enum QueryShape {
    /// Every record of a day, refreshed from the mirror when stale
    Snapshot {
        /// Day to read (YYYY-MM-DD); the most recent day when absent
        #[arg(short, long)]
        date: Option<String>,
    },

    /// One place on one day
    Place {
        /// Place path, e.g. `spain/madrid`
        place: String,

        /// Day to read; the most recent day when absent
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Full history of a place
    History {
        /// Place path
        place: String,
    },

    /// Children of a place ordered by confirmed cases
    Ranked {
        /// Parent place path
        #[arg(default_value = "world")]
        parent: String,

        /// Day to read; the most recent day when absent
        #[arg(short, long)]
        date: Option<String>,

        /// Print every child's full history instead of one day
        #[arg(long)]
        history: bool,
    },

    /// Children with the highest counter, with their histories
    Most {
        /// Parent place path
        #[arg(default_value = "world")]
        parent: String,

        /// Ranking counter (confirmed, deaths, recovered, open_cases)
        #[arg(short, long, default_value = "confirmed")]
        metric: String,

        /// Number of children to keep
        #[arg(short, long, default_value_t = 5)]
        limit: usize,

        /// Rank by every counter at once
        #[arg(long)]
        board: bool,
    },

    /// Children of a place
    Children {
        /// Parent place path
        #[arg(default_value = "world")]
        parent: String,
    },

    /// Every stored day
    Dates,
}

/// A query state as printed in JSON output.
#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum StateView<T> {
    Loading,
    Success { data: T },
    EmptyData,
    Error { error: String },
}

impl<T> From<QueryState<T>> for StateView<T> {
    fn from(state: QueryState<T>) -> Self {
        match state {
            QueryState::Loading => StateView::Loading,
            QueryState::Success(data) => StateView::Success { data },
            QueryState::EmptyData => StateView::EmptyData,
            QueryState::Error(err) => StateView::Error {
                error: err.to_string(),
            },
        }
    }
}

fn parse_date(date: Option<String>) -> CliResult<Option<DateKey>> {
    Ok(date.as_deref().map(DateKey::parse).transpose()?)
}

/// Runs one query and prints every emitted state.
pub async fn run(
    path: &Path,
    mirror: Option<PathBuf>,
    shape: QueryShape,
    format: &str,
) -> CliResult<()> {
    let config = SyncConfig::new();
    let store = Arc::new(FileStore::open(path).await.map_err(SyncError::from)?);
    let clock = Arc::new(FileClockStore::open(path));
    let remote = Arc::new(DirectoryRemote::new(
        mirror.unwrap_or_else(|| path.join("mirror")),
    ));
    let repo = SyncRepository::new(&config, remote, store, clock);

    match shape {
        QueryShape::Snapshot { date } => {
            let states = repo.snapshot(parse_date(date)?).collect().await;
            print_states(states, format, print_records)
        }
        QueryShape::Place { place, date } => {
            let states = repo
                .place_on_date(Place::parse(&place)?, parse_date(date)?)
                .collect()
                .await;
            print_states(states, format, print_records)
        }
        QueryShape::History { place } => {
            let states = repo.history(Place::parse(&place)?).collect().await;
            print_states(states, format, print_records)
        }
        QueryShape::Ranked {
            parent,
            date,
            history,
        } => {
            let parent = Place::parse(&parent)?;
            let stream = if history {
                repo.children_history_by_confirmed(parent)
            } else {
                repo.children_by_confirmed(parent, parse_date(date)?)
            };
            print_states(stream.collect().await, format, print_records)
        }
        QueryShape::Most {
            parent,
            metric,
            limit,
            board,
        } => {
            let parent = Place::parse(&parent)?;
            if board {
                let states = repo.most_stats_board(parent, limit).collect().await;
                let states = states
                    .into_iter()
                    .map(|s| s.map(RankingBoard::into_inner))
                    .collect();
                print_states(states, format, print_board)
            } else {
                let metric: Metric = metric.parse()?;
                let states = repo.most_children(parent, metric, limit).collect().await;
                print_states(states, format, print_records)
            }
        }
        QueryShape::Children { parent } => {
            let states = repo.children(Place::parse(&parent)?).collect().await;
            print_states(states, format, print_records)
        }
        QueryShape::Dates => {
            let states = repo.all_dates().collect().await;
            print_states(states, format, |dates: &Vec<DateKey>| {
                for date in dates {
                    println!("  {date}");
                }
            })
        }
    }
}

fn print_states<T: Serialize>(
    states: Vec<QueryState<T>>,
    format: &str,
    print_data: impl Fn(&T),
) -> CliResult<()> {
    match format {
        "json" => {
            let views: Vec<StateView<T>> = states.into_iter().map(StateView::from).collect();
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        _ => {
            for state in &states {
                match state {
                    QueryState::Loading => println!("Loading"),
                    QueryState::Success(data) => {
                        println!("Success");
                        print_data(data);
                    }
                    QueryState::EmptyData => println!("No data"),
                    QueryState::Error(err) => println!("Error: {err}"),
                }
            }
            if states.len() == 1 {
                println!("(refresh failed, nothing served)");
            }
        }
    }
    Ok(())
}

#[allow(clippy::ptr_arg)]
fn print_records(records: &Vec<StatRecord>) {
    for record in records {
        let s = &record.stats;
        println!(
            "  {}  {:<28} confirmed {:>10}  deaths {:>8}  recovered {:>10}  open {:>10}",
            record.date,
            record.place.to_string(),
            s.confirmed,
            s.deaths,
            s.recovered,
            s.open_cases
        );
    }
}

fn print_board(board: &BTreeMap<Metric, Vec<StatRecord>>) {
    for (metric, records) in board {
        println!(" {metric}:");
        print_records(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_views_are_tagged() {
        let view: StateView<Vec<u32>> = QueryState::Success(vec![1]).into();
        assert_eq!(
            serde_json::to_string(&view).unwrap(),
            r#"{"state":"success","data":[1]}"#
        );

        let view: StateView<Vec<u32>> = QueryState::EmptyData.into();
        assert_eq!(serde_json::to_string(&view).unwrap(), r#"{"state":"empty_data"}"#);
    }

    #[test]
    fn dates_are_optional_but_validated() {
        assert_eq!(parse_date(None).unwrap(), None);
        assert!(parse_date(Some("2020-04-26".into())).unwrap().is_some());
        assert!(parse_date(Some("2020-4-26".into())).is_err());
    }
}
