use std::time::Duration;

use chrono::{DateTime, Utc};

use requeue_core::{ActiveObject, ObjectKey};

/// One scheduling of a timeout for `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deadline {
    pub key: ObjectKey,
    pub fires_at: DateTime<Utc>,
    pub generation: u64,
}

/// What a persisted object means for its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Deadline at this instant.
    At(DateTime<Utc>),
    /// Timeout explicitly set to zero.
    Disabled,
    /// No recorded start time yet.
    NotStarted,
    Done,
    /// Start plus timeout falls outside the representable range.
    Unbounded,
}

impl Resolution {
    /// Resolve `recorded_start + timeout`, substituting `default_timeout` when
    /// the object does not carry its own.
    pub fn of(object: &ActiveObject, default_timeout: Duration) -> Self {
        if object.done {
            return Resolution::Done;
        }
        let Some(started) = object.recorded_start else {
            return Resolution::NotStarted;
        };
        let timeout = object.timeout.unwrap_or(default_timeout);
        if timeout.is_zero() {
            return Resolution::Disabled;
        }
        chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|window| started.checked_add_signed(window))
            .map_or(Resolution::Unbounded, Resolution::At)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn object(start: Option<DateTime<Utc>>, timeout: Option<Duration>) -> ActiveObject {
        ActiveObject {
            key: ObjectKey::new("TaskRun", "ci", "build-1"),
            recorded_start: start,
            timeout,
            done: false,
        }
    }

    #[test]
    fn deadline_is_start_plus_timeout() {
        let start = Utc::now();
        let resolved = Resolution::of(&object(Some(start), Some(HOUR)), HOUR * 5);
        assert_eq!(resolved, Resolution::At(start + chrono::Duration::hours(1)));
    }

    #[test]
    fn missing_timeout_uses_default() {
        let start = Utc::now();
        let resolved = Resolution::of(&object(Some(start), None), HOUR * 2);
        assert_eq!(resolved, Resolution::At(start + chrono::Duration::hours(2)));
    }

    #[test]
    fn zero_timeout_disables() {
        let resolved = Resolution::of(&object(Some(Utc::now()), Some(Duration::ZERO)), HOUR);
        assert_eq!(resolved, Resolution::Disabled);
    }

    #[test]
    fn unstarted_and_done_objects_have_no_deadline() {
        assert_eq!(Resolution::of(&object(None, Some(HOUR)), HOUR), Resolution::NotStarted);

        let mut finished = object(Some(Utc::now()), Some(HOUR));
        finished.done = true;
        assert_eq!(Resolution::of(&finished, HOUR), Resolution::Done);
    }

    #[test]
    fn absurd_timeout_is_unbounded() {
        let resolved = Resolution::of(&object(Some(Utc::now()), Some(Duration::MAX)), HOUR);
        assert_eq!(resolved, Resolution::Unbounded);
    }
}
