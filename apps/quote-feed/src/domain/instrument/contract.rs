//! Option contract addressing helpers.
//!
//! Collaborators that price option legs off the quotes served here need the
//! at-the-money strike for a spot price and the monthly expiry date.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::Decimal;

/// Spot level above which strikes are spaced 100 apart instead of 50.
const WIDE_STRIKE_THRESHOLD: i64 = 10_000;

/// Strike step for a given spot price.
#[must_use]
pub fn strike_step(spot: Decimal) -> Decimal {
    if spot > Decimal::from(WIDE_STRIKE_THRESHOLD) {
        Decimal::from(100)
    } else {
        Decimal::from(50)
    }
}

/// Nearest listed strike to `spot`. Midpoints round to even steps.
#[must_use]
pub fn atm_strike(spot: Decimal) -> Decimal {
    let step = strike_step(spot);
    (spot / step).round() * step
}

/// Last Thursday of a month, or `None` for an invalid year/month.
#[must_use]
pub fn last_thursday(year: i32, month: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last_day = first_of_next - Duration::days(1);

    let back = (i64::from(last_day.weekday().num_days_from_monday())
        - i64::from(Weekday::Thu.num_days_from_monday()))
    .rem_euclid(7);
    Some(last_day - Duration::days(back))
}

/// Monthly expiry on or after `today`.
#[must_use]
pub fn next_monthly_expiry(today: NaiveDate) -> Option<NaiveDate> {
    let this_month = last_thursday(today.year(), today.month())?;
    if today <= this_month {
        return Some(this_month);
    }
    if today.month() == 12 {
        last_thursday(today.year() + 1, 1)
    } else {
        last_thursday(today.year(), today.month() + 1)
    }
}

/// Expiry in the upstream `DDMONYYYY` form, e.g. `30JAN2025`.
#[must_use]
pub fn expiry_code(expiry: NaiveDate) -> String {
    expiry.format("%d%b%Y").to_string().to_uppercase()
}
