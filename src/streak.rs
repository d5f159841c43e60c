//! Streak calculator.
//!
//! Pure function over verified-completion history. Recomputed in full
//! after every mutation that could change it; never patched
//! incrementally, so partial updates cannot drift.

use std::collections::{HashMap, HashSet};

use chrono::{Days, NaiveDate};

use crate::model::TaskKind;

/// Count consecutive calendar days, walking backward from `today`, on
/// which every kind in `required` has a verified completion.
///
/// Today counts as day zero: if today's required set is incomplete the
/// streak is 0, regardless of any prior run. No gap-skipping, no partial
/// credit. `lookback_days` bounds the walk for cost control.
pub fn compute_streak(
    verified: &[(NaiveDate, TaskKind)],
    required: &[TaskKind],
    today: NaiveDate,
    lookback_days: u32,
) -> u32 {
    if required.is_empty() {
        return 0;
    }

    let mut by_day: HashMap<NaiveDate, HashSet<&TaskKind>> = HashMap::new();
    for (date, kind) in verified {
        by_day.entry(*date).or_default().insert(kind);
    }

    let mut streak = 0;
    for offset in 0..=lookback_days {
        let Some(day) = today.checked_sub_days(Days::new(offset as u64)) else {
            break;
        };
        let complete = by_day
            .get(&day)
            .is_some_and(|kinds| required.iter().all(|k| kinds.contains(k)));
        if !complete {
            break;
        }
        streak += 1;
    }
    streak
}
