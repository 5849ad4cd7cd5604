//! Rank movement between two consecutive runs.

use std::fmt;

/// Rank change marker: `NEW`, `+N`, `-N` or `=`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variation {
    /// Not ranked by the previous run
    New,
    /// Moved up by N positions
    Up(u32),
    /// Moved down by N positions
    Down(u32),
    Unchanged,
}

/// Compare a new rank with the previously stored one (0 = never ranked).
pub fn variation(new_rank: u32, previous_rank: u32) -> Variation {
    if previous_rank == 0 {
        return Variation::New;
    }

    let delta = i64::from(previous_rank) - i64::from(new_rank);
    match delta {
        d if d > 0 => Variation::Up(d as u32),
        d if d < 0 => Variation::Down(d.unsigned_abs() as u32),
        _ => Variation::Unchanged,
    }
}

impl Variation {
    /// Signed delta; `None` for new entries.
    pub fn delta(&self) -> Option<i64> {
        match self {
            Variation::New => None,
            Variation::Up(n) => Some(i64::from(*n)),
            Variation::Down(n) => Some(-i64::from(*n)),
            Variation::Unchanged => Some(0),
        }
    }

    /// Parse a stored marker. Anything unrecognized yields `None`.
    pub fn parse_marker(raw: &str) -> Option<Variation> {
        let raw = raw.trim();
        match raw {
            "NEW" => Some(Variation::New),
            "=" => Some(Variation::Unchanged),
            _ => {
                let (sign, digits) = raw.split_at(raw.char_indices().nth(1)?.0);
                let n: u32 = digits.parse().ok()?;
                match (sign, n) {
                    ("+" | "-", 0) => Some(Variation::Unchanged),
                    ("+", n) => Some(Variation::Up(n)),
                    ("-", n) => Some(Variation::Down(n)),
                    _ => None,
                }
            }
        }
    }
}

impl fmt::Display for Variation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variation::New => write!(f, "NEW"),
            Variation::Up(n) => write!(f, "+{}", n),
            Variation::Down(n) => write!(f, "-{}", n),
            Variation::Unchanged => write!(f, "="),
        }
    }
}
