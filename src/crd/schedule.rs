//! Cron schedule validation for backup CronJobs
//!
//! Accepts the five-field syntax the Kubernetes CronJob controller accepts
//! (minute, hour, day-of-month, month, day-of-week) plus the `@` macros.
//! A schedule that parses but can never fire, such as `0 0 31 2 *`, is
//! rejected too. With a restricted day of week the job fires on either
//! match, so the day-of-month check only applies when day of week is `*`.

const MACROS: &[&str] = &[
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

const MONTHS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const WEEKDAYS: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Longest day of month per month, February counted in leap years
const DAYS_IN_MONTH: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const FIELDS: [Field; 5] = [
    Field {
        name: "minute",
        min: 0,
        max: 59,
        names: &[],
    },
    Field {
        name: "hour",
        min: 0,
        max: 23,
        names: &[],
    },
    Field {
        name: "day of month",
        min: 1,
        max: 31,
        names: &[],
    },
    Field {
        name: "month",
        min: 1,
        max: 12,
        names: MONTHS,
    },
    Field {
        name: "day of week",
        min: 0,
        max: 7,
        names: WEEKDAYS,
    },
];

/// Check that `expr` is a schedule the CronJob controller can parse
///
/// Returns a human-readable reason on failure.
pub fn validate_schedule(expr: &str) -> Result<(), String> {
    let expr = expr.trim();
    if expr.starts_with('@') {
        return if MACROS.contains(&expr.to_ascii_lowercase().as_str()) {
            Ok(())
        } else {
            Err(format!("unknown schedule macro {expr:?}"))
        };
    }

    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() != FIELDS.len() {
        return Err(format!(
            "expected {} fields, found {} in {expr:?}",
            FIELDS.len(),
            parts.len()
        ));
    }

    let mut selected = [0u64; 5];
    for (i, (part, field)) in parts.iter().zip(FIELDS.iter()).enumerate() {
        selected[i] = field_values(part, field)?;
    }

    let any_weekday = matches!(parts[4], "*" | "?");
    if any_weekday && !day_of_month_fits(selected[2], selected[3]) {
        return Err(format!(
            "day of month {:?} never occurs in month {:?}",
            parts[2], parts[3]
        ));
    }
    Ok(())
}

/// True when some selected day exists in some selected month
fn day_of_month_fits(days: u64, months: u64) -> bool {
    (1..=12u32)
        .filter(|m| months & (1 << m) != 0)
        .any(|m| (1..=DAYS_IN_MONTH[m as usize - 1]).any(|d| days & (1 << d) != 0))
}

/// Parse one field into a bitmask of the values it selects
fn field_values(part: &str, field: &Field) -> Result<u64, String> {
    let mut mask = 0u64;
    for item in part.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };

        let step = match step {
            Some(step) => match step.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(format!("invalid step {step:?} in {} field", field.name)),
            },
            None => 1,
        };

        let (lo, hi) = if range == "*" || range == "?" {
            (field.min, field.max)
        } else {
            match range.split_once('-') {
                Some((lo, hi)) => {
                    let lo = value(lo, field)?;
                    let hi = value(hi, field)?;
                    if lo > hi {
                        return Err(format!(
                            "range {range:?} is reversed in {} field",
                            field.name
                        ));
                    }
                    (lo, hi)
                }
                None if step > 1 => (value(range, field)?, field.max),
                None => {
                    let v = value(range, field)?;
                    (v, v)
                }
            }
        };

        for v in (lo..=hi).step_by(step as usize) {
            mask |= 1 << v;
        }
    }
    Ok(mask)
}

fn value(token: &str, field: &Field) -> Result<u32, String> {
    let lower = token.to_ascii_lowercase();
    if let Some(idx) = field.names.iter().position(|n| *n == lower) {
        return Ok(idx as u32 + if field.min == 1 { 1 } else { 0 });
    }
    match token.parse::<u32>() {
        Ok(n) if (field.min..=field.max).contains(&n) => Ok(n),
        Ok(n) => Err(format!(
            "{n} is outside {}..={} in {} field",
            field.min, field.max, field.name
        )),
        Err(_) => Err(format!("invalid value {token:?} in {} field", field.name)),
    }
}
