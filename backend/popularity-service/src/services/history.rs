//! Day-keyed rank trail kept for reviews.
//!
//! Stored form is a versioned JSON document:
//! `{"version":1,"days":{"2026-10-17":4,"2026-10-18":2}}`.
//!
//! Older rows may hold a bare day map keyed `D-MM-YYYY`, or a plain variation
//! marker (`"NEW"`, `"+3"`) from before trails existed. Both are accepted on
//! read; anything unparseable reads as [`RankHistory::NoHistory`].

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::services::variation::{variation, Variation};

pub const HISTORY_CAPACITY: usize = 30;
const HISTORY_VERSION: u32 = 1;

const DAY_KEY_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d-%m-%Y"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RankHistory {
    #[default]
    NoHistory,
    /// Rank per calendar day; `BTreeMap` keeps days in chronological order
    DayRankMap(BTreeMap<NaiveDate, u32>),
}

#[derive(Serialize)]
struct StoredHistory<'a> {
    version: u32,
    days: &'a BTreeMap<NaiveDate, u32>,
}

impl RankHistory {
    /// Lenient read of a stored trail.
    pub fn parse(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => return RankHistory::NoHistory,
        };

        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return RankHistory::NoHistory,
        };

        let days = match value {
            Value::Object(mut obj) => match obj.remove("days") {
                Some(Value::Object(days))
                    if obj.get("version").and_then(Value::as_u64)
                        == Some(u64::from(HISTORY_VERSION)) =>
                {
                    days
                }
                Some(_) => return RankHistory::NoHistory,
                None => obj,
            },
            _ => return RankHistory::NoHistory,
        };

        let map: BTreeMap<NaiveDate, u32> = days
            .into_iter()
            .filter_map(|(key, rank)| {
                let day = parse_day_key(&key)?;
                let rank = rank
                    .as_u64()
                    .or_else(|| rank.as_str().and_then(|s| s.trim().parse().ok()))
                    .and_then(|r| u32::try_from(r).ok())
                    .filter(|r| *r > 0)?;
                Some((day, rank))
            })
            .collect();

        if map.is_empty() {
            RankHistory::NoHistory
        } else {
            RankHistory::DayRankMap(map)
        }
    }

    /// Insert or overwrite `day`, then drop the oldest days beyond `capacity`.
    pub fn record(self, day: NaiveDate, rank: u32, capacity: usize) -> Self {
        let mut days = match self {
            RankHistory::NoHistory => BTreeMap::new(),
            RankHistory::DayRankMap(days) => days,
        };

        days.insert(day, rank);
        while days.len() > capacity.max(1) {
            days.pop_first();
        }

        RankHistory::DayRankMap(days)
    }

    pub fn len(&self) -> usize {
        match self {
            RankHistory::NoHistory => 0,
            RankHistory::DayRankMap(days) => days.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn days(&self) -> impl DoubleEndedIterator<Item = (&NaiveDate, &u32)> {
        let days = match self {
            RankHistory::NoHistory => None,
            RankHistory::DayRankMap(days) => Some(days.iter()),
        };
        days.into_iter().flatten()
    }

    pub fn rank_on(&self, day: NaiveDate) -> Option<u32> {
        match self {
            RankHistory::NoHistory => None,
            RankHistory::DayRankMap(days) => days.get(&day).copied(),
        }
    }

    pub fn latest(&self) -> Option<(NaiveDate, u32)> {
        match self {
            RankHistory::NoHistory => None,
            RankHistory::DayRankMap(days) => days.last_key_value().map(|(d, r)| (*d, *r)),
        }
    }

    /// Variation between the two most recent days of the trail.
    pub fn latest_variation(&self) -> Variation {
        let mut recent = self.days().rev().map(|(_, rank)| *rank);
        match (recent.next(), recent.next()) {
            (Some(current), Some(previous)) => variation(current, previous),
            _ => Variation::New,
        }
    }

    pub fn to_stored(&self) -> Result<String, serde_json::Error> {
        let empty = BTreeMap::new();
        let days = match self {
            RankHistory::NoHistory => &empty,
            RankHistory::DayRankMap(days) => days,
        };
        serde_json::to_string(&StoredHistory {
            version: HISTORY_VERSION,
            days,
        })
    }
}

/// Day-key formatting used by the stored trail.
pub fn day_key(day: NaiveDate) -> String {
    day.format(DAY_KEY_FORMATS[0]).to_string()
}

/// Parse both the current ISO key and the legacy `D-MM-YYYY` key into a real date.
pub fn parse_day_key(key: &str) -> Option<NaiveDate> {
    let key = key.trim();
    DAY_KEY_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(key, fmt).ok())
}
