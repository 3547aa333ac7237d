//! 5-field cron evaluation (min hour dom month dow), timezone-aware.

use chrono::{DateTime, Datelike, Timelike, Utc};

use bs_domain::{Error, Result};

/// Parse a timezone string, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

/// Validate a cron expression shape: five fields, each parseable.
pub fn validate_cron(cron: &str) -> Result<()> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::Validation(format!(
            "cron expression must have 5 fields, got {}",
            fields.len()
        )));
    }
    for field in fields {
        if !field_is_well_formed(field) {
            return Err(Error::Validation(format!("bad cron field '{field}'")));
        }
    }
    Ok(())
}

fn field_is_well_formed(field: &str) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        return step.parse::<u32>().map(|n| n > 0).unwrap_or(false);
    }
    field.split(',').all(|part| {
        if let Some((start, end)) = part.split_once('-') {
            start.parse::<u32>().is_ok() && end.parse::<u32>().is_ok()
        } else {
            part.parse::<u32>().is_ok()
        }
    })
}

fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if part.parse::<u32>() == Ok(value) {
            return true;
        }
    }
    false
}

fn matches_naive(cron: &str, dt: &chrono::NaiveDateTime) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    field_matches(fields[0], dt.minute())
        && field_matches(fields[1], dt.hour())
        && field_matches(fields[2], dt.day())
        && field_matches(fields[3], dt.month())
        && field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

/// Whether a UTC instant matches the expression (evaluated in UTC).
pub fn cron_matches(cron: &str, dt: &DateTime<Utc>) -> bool {
    matches_naive(cron, &dt.naive_utc())
}

/// Next occurrence strictly after `after`, evaluated in `tz`, returned in
/// UTC. Nonexistent local times (DST spring-forward) are skipped; ambiguous
/// ones (fall-back) take the earlier mapping.
pub fn cron_next_tz(
    cron: &str,
    after: &DateTime<Utc>,
    tz: chrono_tz::Tz,
) -> Option<DateTime<Utc>> {
    use chrono::TimeZone;

    let local_after = after.with_timezone(&tz).naive_local();
    let to_next_minute = 60 - local_after.second() as i64;
    let mut candidate = local_after + chrono::Duration::seconds(to_next_minute);
    candidate = candidate.with_second(0).unwrap_or(candidate);

    let max_checks = 366 * 24 * 60; // one year of minutes
    for _ in 0..max_checks {
        if matches_naive(cron, &candidate) {
            match tz.from_local_datetime(&candidate) {
                chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    return Some(earliest.with_timezone(&Utc));
                }
                chrono::LocalResult::None => {}
            }
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

/// Next occurrence in UTC.
pub fn cron_next(cron: &str, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron_next_tz(cron, after, chrono_tz::UTC)
}
