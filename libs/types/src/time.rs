//! Microsecond conversions for request headers
//!
//! Request timeouts and start times travel as unsigned microsecond counts.

use crate::error::{Result, TypesError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Whole microseconds in `duration`, failing if it does not fit in `u64`
pub fn duration_to_micros(duration: Duration) -> Result<u64> {
    u64::try_from(duration.as_micros()).map_err(|_| TypesError::TimeOverflow {
        message: format!("duration {:?} exceeds u64 microseconds", duration),
    })
}

pub fn duration_from_micros(micros: u64) -> Duration {
    Duration::from_micros(micros)
}

/// Microseconds since the Unix epoch; times before the epoch are rejected
pub fn system_time_to_micros(time: SystemTime) -> Result<u64> {
    let since_epoch = time
        .duration_since(UNIX_EPOCH)
        .map_err(|e| TypesError::TimeOverflow {
            message: format!("time precedes the Unix epoch by {:?}", e.duration()),
        })?;
    duration_to_micros(since_epoch)
}

pub fn system_time_from_micros(micros: u64) -> Result<SystemTime> {
    UNIX_EPOCH
        .checked_add(Duration::from_micros(micros))
        .ok_or_else(|| TypesError::TimeOverflow {
            message: format!("{} microseconds after the epoch is not representable", micros),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_micros() {
        assert_eq!(duration_to_micros(Duration::from_millis(50)).unwrap(), 50_000);
        assert_eq!(duration_to_micros(Duration::from_nanos(1999)).unwrap(), 1);
        assert_eq!(duration_from_micros(1_500), Duration::from_micros(1_500));
        assert!(duration_to_micros(Duration::MAX).is_err());
    }

    #[test]
    fn test_system_time_micros() {
        let time = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let micros = system_time_to_micros(time).unwrap();
        assert_eq!(micros, 1_700_000_000_000_000);
        assert_eq!(system_time_from_micros(micros).unwrap(), time);

        let before = UNIX_EPOCH - Duration::from_secs(1);
        assert!(matches!(
            system_time_to_micros(before),
            Err(TypesError::TimeOverflow { .. })
        ));
    }
}
