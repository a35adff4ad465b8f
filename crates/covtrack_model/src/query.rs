//! Query shapes understood by the repository and the local store.

use crate::date::DateKey;
use crate::error::{ModelError, ModelResult};
use crate::place::Place;
use crate::record::Metric;

/// A request for statistics.
///
/// A query names a place (or a parent place whose children are wanted) and,
/// where it makes sense, a date; an absent date means "the most recent date
/// the store holds". Queries are built by the caller and consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every record stored for a day: the world and all places.
    ///
    /// This is the only freshness-sensitive shape: when the cache has
    /// expired the repository refreshes the day from the remote source
    /// before reading.
    Snapshot {
        /// Day to read; `None` for the most recent day.
        date: Option<DateKey>,
    },

    /// One place on one day.
    PlaceOnDate {
        /// Place to read.
        place: Place,
        /// Day to read; `None` for the most recent day.
        date: Option<DateKey>,
    },

    /// Full daily history of one place, ascending by date.
    History {
        /// Place to read.
        place: Place,
    },

    /// Direct children of a place on one day, most confirmed first.
    ChildrenByConfirmed {
        /// Parent place.
        parent: Place,
        /// Day to read; `None` for the most recent day.
        date: Option<DateKey>,
    },

    /// Full histories of every direct child of a place.
    ///
    /// Children are ordered by their latest confirmed count (descending),
    /// each child's records ascending by date.
    ChildrenHistoryByConfirmed {
        /// Parent place.
        parent: Place,
    },

    /// The `limit` children with the highest `metric` on the most recent
    /// day, with their full histories.
    MostChildren {
        /// Parent place.
        parent: Place,
        /// Ranking counter.
        metric: Metric,
        /// Number of children to keep.
        limit: usize,
    },

    /// The direct children of a place, one (latest) record each, ordered
    /// by name.
    Children {
        /// Parent place.
        parent: Place,
    },
}

impl Query {
    /// Snapshot of the most recent day.
    pub fn latest() -> Self {
        Query::Snapshot { date: None }
    }

    /// True when the cache coherence gate must be consulted before reading.
    pub fn is_freshness_sensitive(&self) -> bool {
        matches!(self, Query::Snapshot { .. })
    }

    /// The day to refresh from the remote source, resolving "most recent"
    /// to `today`.
    pub fn refresh_date(&self, today: DateKey) -> Option<DateKey> {
        match self {
            Query::Snapshot { date } => Some(date.unwrap_or(today)),
            _ => None,
        }
    }

    /// Rejects queries that can never be answered.
    pub fn validate(&self) -> ModelResult<()> {
        match self {
            Query::ChildrenByConfirmed { parent, .. }
            | Query::ChildrenHistoryByConfirmed { parent }
            | Query::Children { parent } => Self::check_parent(parent),
            Query::MostChildren { parent, limit, .. } => {
                Self::check_parent(parent)?;
                if *limit == 0 {
                    return Err(ModelError::InvalidQuery("ranking limit must be at least 1".into()));
                }
                Ok(())
            }
            Query::Snapshot { .. } | Query::PlaceOnDate { .. } | Query::History { .. } => Ok(()),
        }
    }

    fn check_parent(parent: &Place) -> ModelResult<()> {
        if parent.has_children() {
            Ok(())
        } else {
            Err(ModelError::InvalidQuery(format!("{parent} has no child places")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_snapshots_are_freshness_sensitive() {
        assert!(Query::latest().is_freshness_sensitive());
        assert!(!Query::History {
            place: Place::World
        }
        .is_freshness_sensitive());
        assert!(!Query::PlaceOnDate {
            place: Place::World,
            date: None
        }
        .is_freshness_sensitive());
    }

    #[test]
    fn refresh_date_resolves_latest_to_today() {
        let today = DateKey::parse("2020-05-01").unwrap();
        let day = DateKey::parse("2020-04-26").unwrap();
        assert_eq!(Query::latest().refresh_date(today), Some(today));
        assert_eq!(Query::Snapshot { date: Some(day) }.refresh_date(today), Some(day));
        assert_eq!(Query::History { place: Place::World }.refresh_date(today), None);
    }

    #[test]
    fn validation() {
        let leaf = Place::sub_region("spain", "madrid", "alcala");
        assert!(Query::Children { parent: leaf.clone() }.validate().is_err());
        assert!(Query::MostChildren {
            parent: Place::World,
            metric: Metric::Deaths,
            limit: 0
        }
        .validate()
        .is_err());
        assert!(Query::MostChildren {
            parent: Place::World,
            metric: Metric::Deaths,
            limit: 5
        }
        .validate()
        .is_ok());
        assert!(Query::History { place: leaf }.validate().is_ok());
    }
}
