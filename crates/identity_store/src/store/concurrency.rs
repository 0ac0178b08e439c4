//! Optimistic concurrency guard.
//!
//! The `updated_at` a caller read is its version token. An update carrying a
//! token that no longer matches the stored row is refused. An update with no
//! token (`None`) is an unconditional write: the check is skipped on purpose,
//! for callers that want last-writer-wins.

use crate::model::{clean_time, now, KindDescriptor};
use crate::store::{StoreError, StoreResult};
use chrono::{DateTime, Duration, Utc};

/// Fails with `Conflict` when `desired` is set and differs from `stored`.
pub fn check_fresh(
    kind: &KindDescriptor,
    id: &str,
    desired: Option<DateTime<Utc>>,
    stored: Option<DateTime<Utc>>,
) -> StoreResult<()> {
    let Some(desired) = desired else {
        return Ok(());
    };
    if Some(clean_time(desired)) == stored.map(clean_time) {
        return Ok(());
    }
    Err(StoreError::Conflict {
        kind: kind.name,
        id: id.to_string(),
    })
}

/// Next `updated_at` for a row last written at `previous`.
///
/// Strictly later than `previous`, even when the clock has not moved a full
/// millisecond since (or went backwards).
pub fn next_updated_at(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let current = now();
    match previous {
        Some(previous) if current <= previous => previous + Duration::milliseconds(1),
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use super::{check_fresh, next_updated_at};
    use crate::model::gateway::GATEWAY_KIND;
    use crate::model::now;
    use crate::store::StoreError;
    use chrono::{Duration, TimeZone, Timelike, Utc};

    #[test]
    fn missing_token_skips_the_check() {
        assert!(check_fresh(&GATEWAY_KIND, "gtw-1", None, Some(now())).is_ok());
    }

    #[test]
    fn matching_token_passes_even_with_sub_millisecond_noise() {
        let stored = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let desired = stored.with_nanosecond(400_000).unwrap();
        assert!(check_fresh(&GATEWAY_KIND, "gtw-1", Some(desired), Some(stored)).is_ok());
    }

    #[test]
    fn stale_token_conflicts() {
        let stored = now();
        let stale = stored - Duration::seconds(1);
        let err = check_fresh(&GATEWAY_KIND, "gtw-1", Some(stale), Some(stored)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { kind: "gateway", ref id } if id == "gtw-1"));
    }

    #[test]
    fn next_updated_at_strictly_advances() {
        let future = now() + Duration::seconds(30);
        assert_eq!(next_updated_at(Some(future)), future + Duration::milliseconds(1));

        let past = now() - Duration::seconds(30);
        assert!(next_updated_at(Some(past)) > past);
        assert!(next_updated_at(None) <= now());
    }
}
