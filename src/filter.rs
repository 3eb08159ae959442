//! Filtering and ordering of a result set for display.
//!
//! Everything here is a pure function of its inputs. The raw list is only
//! borrowed; callers recompute on every criteria change instead of caching.

use std::collections::HashSet;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::models::Flight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Price,
    #[serde(rename = "time")]
    DepartureTime,
}

/// Time-of-day range, inclusive on both ends at minute resolution. A window
/// whose start is after its end wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartureWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DepartureWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let minute = to_minute(time);
        let (start, end) = (to_minute(self.start), to_minute(self.end));
        if start <= end {
            (start..=end).contains(&minute)
        } else {
            minute >= start || minute <= end
        }
    }
}

impl Default for DepartureWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

fn to_minute(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Empty means every airline.
    pub airlines: HashSet<String>,
    pub min_price: f64,
    pub max_price: f64,
    pub departure_window: DepartureWindow,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            airlines: HashSet::new(),
            min_price: 0.0,
            max_price: 10_000.0,
            departure_window: DepartureWindow::default(),
        }
    }
}

impl FilterCriteria {
    pub fn matches(&self, flight: &Flight) -> bool {
        (self.airlines.is_empty() || self.airlines.contains(&flight.airline))
            && self.min_price <= flight.price
            && flight.price <= self.max_price
            && self.departure_window.contains(flight.departure_time.time())
    }

    /// Adds the airline if absent, removes it if present.
    pub fn toggle_airline(&mut self, airline: &str) {
        if !self.airlines.remove(airline) {
            self.airlines.insert(airline.to_string());
        }
    }
}

/// Filters `raw` by `criteria` and orders the survivors by `sort`. Equal keys
/// keep their input order.
pub fn apply(raw: &[Flight], criteria: &FilterCriteria, sort: SortKey) -> Vec<Flight> {
    let mut shown: Vec<Flight> = raw
        .iter()
        .filter(|flight| criteria.matches(flight))
        .cloned()
        .collect();

    match sort {
        SortKey::Price => shown.sort_by(|a, b| a.price.total_cmp(&b.price)),
        SortKey::DepartureTime => shown.sort_by_key(|flight| flight.departure_time),
    }
    shown
}

/// Distinct airlines of the unfiltered list, in first-seen order.
pub fn available_airlines(raw: &[Flight]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter(|flight| seen.insert(flight.airline.as_str()))
        .map(|flight| flight.airline.clone())
        .collect()
}
