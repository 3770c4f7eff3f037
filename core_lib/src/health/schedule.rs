//! Cron gate deciding whether a check runs in the current cycle

use super::checks::query_param;
use crate::error::ScheduleError;
use chrono::{DateTime, Duration, TimeZone};
use croner::Cron;

const RUN_WINDOW_SECONDS: i64 = 60;

/// Returns `true` when the check behind `url` should run at `now`.
///
/// Without a `cron` query parameter the check always runs. Otherwise the
/// expression (5 fields, `_` accepted in place of spaces) must fire within
/// the next minute.
pub fn should_run<Tz: TimeZone>(url: &str, now: &DateTime<Tz>) -> Result<bool, ScheduleError> {
    let Some(raw) = query_param(url, "cron") else {
        return Ok(true);
    };

    let expression = raw.trim().replace('_', " ");
    let cron = Cron::new(&expression)
        .parse()
        .map_err(|e| ScheduleError::InvalidExpression {
            expression: expression.clone(),
            reason: e.to_string(),
        })?;

    let next = cron
        .find_next_occurrence(now, false)
        .map_err(|_| ScheduleError::NoUpcomingRun(expression.clone()))?;

    let until_next = next.clone().signed_duration_since(now.clone());
    Ok(*now < next && until_next <= Duration::seconds(RUN_WINDOW_SECONDS))
}
