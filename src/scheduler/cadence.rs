use chrono::{DateTime, FixedOffset, LocalResult, NaiveTime, TimeZone, Utc};

/// Fires once a day at a fixed wall-clock time in a fixed offset.
#[derive(Debug, Clone)]
pub(crate) struct DailyCadence {
    tz: FixedOffset,
    target: NaiveTime,
}

impl DailyCadence {
    /// `None` when the offset or the time of day is out of range.
    pub(crate) fn new(utc_offset_hours: i32, hour: u32, minute: u32) -> Option<Self> {
        let tz = FixedOffset::east_opt(utc_offset_hours.checked_mul(3600)?)?;
        let target = NaiveTime::from_hms_opt(hour, minute, 0)?;
        Some(Self { tz, target })
    }

    pub(crate) fn tz(&self) -> FixedOffset {
        self.tz
    }

    /// First trigger at or after `now`.
    pub(crate) fn next_run_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_now = now.with_timezone(&self.tz);
        let mut date = local_now.date_naive();
        if local_now.time() > self.target {
            date = date.succ_opt().unwrap_or(date);
        }

        match self.tz.from_local_datetime(&date.and_time(self.target)) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
            // A fixed offset has no gaps.
            LocalResult::None => now,
        }
    }
}
