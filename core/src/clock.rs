//! Run clock: the single source of "today" for a run.
//!
//! Every date-only decision (active-note check, audit RUN DATE, template year)
//! reads from here, so all of them agree on one reference time zone.

use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;

pub const DEFAULT_TIME_ZONE: Tz = chrono_tz::America::Los_Angeles;

#[derive(Debug, Clone, PartialEq)]
pub struct RunClock {
    pub zone: Tz,
    fixed_today: Option<NaiveDate>,
}

impl RunClock {
    pub fn new(zone: Tz) -> Self {
        Self { zone, fixed_today: None }
    }

    /// A clock pinned to one calendar date. Used by tests and re-runs.
    pub fn fixed(zone: Tz, today: NaiveDate) -> Self {
        Self { zone, fixed_today: Some(today) }
    }

    pub fn today(&self) -> NaiveDate {
        self.fixed_today
            .unwrap_or_else(|| Utc::now().with_timezone(&self.zone).date_naive())
    }

    pub fn year(&self) -> i32 {
        self.today().year()
    }
}

impl Default for RunClock {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_ZONE)
    }
}
