// src/clock.rs
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Utc};

/// Source of local wall-clock time. Attendance dates, submission stamps and
/// payroll payment dates all come from here so tests can pin "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Returns `None` when the offset is outside +/- 24h.
    pub fn with_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

#[cfg(test)]
pub use test_clock::TestClock;

#[cfg(test)]
mod test_clock {
    use super::Clock;
    use chrono::{Duration, NaiveDateTime};
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    pub struct TestClock {
        current_time: Arc<Mutex<NaiveDateTime>>,
    }

    impl TestClock {
        pub fn new(datetime_str: &str) -> Self {
            let dt = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
                .expect("Failed to parse datetime string in TestClock::new");
            Self {
                current_time: Arc::new(Mutex::new(dt)),
            }
        }

        pub fn set_time(&self, datetime_str: &str) {
            *self.current_time.lock().unwrap() =
                NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
                    .expect("Failed to parse datetime string in TestClock::set_time");
        }

        pub fn advance(&self, duration: Duration) {
            *self.current_time.lock().unwrap() += duration;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> NaiveDateTime {
            *self.current_time.lock().unwrap()
        }
    }
}

#[cfg(test)]
mod clock_tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_clock_is_settable_and_advances() {
        let clock = TestClock::new("2025-03-03 08:59:00");
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        clock.advance(Duration::minutes(2));
        assert_eq!(clock.now().format("%H:%M").to_string(), "09:01");
        clock.set_time("2025-03-04 17:30:00");
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 3, 4).unwrap());
    }

    #[test]
    fn system_clock_rejects_out_of_range_offsets() {
        assert!(SystemClock::with_offset_minutes(480).is_some());
        assert!(SystemClock::with_offset_minutes(-300).is_some());
        assert!(SystemClock::with_offset_minutes(24 * 60).is_none());
    }
}
