//! Share expiration dates.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use shareflow_types::{Dataset, ExpirySetting};

/// Last day of the month `period` expiry units from `now`, counting the current month.
///
/// A monthly period of 1 expires at the end of the current month.
pub fn calculate_expiry_date(now: DateTime<Utc>, period: u32, setting: ExpirySetting) -> EngineResult<DateTime<Utc>> {
    let months = period.saturating_mul(setting.months_per_unit()).saturating_sub(1);
    let first_of_month = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .ok_or_else(|| EngineError::invalid_input("expiry_date", format!("no first day of month for {now}")))?;
    let end = first_of_month
        .checked_add_months(Months::new(months + 1))
        .and_then(|d| d.pred_opt())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| EngineError::invalid_input("share_expiration_period", format!("{period} is out of range")))?;
    Ok(Utc.from_utc_datetime(&end))
}

/// Checks a requested period against the dataset's expiration bounds.
///
/// Periods are ignored for datasets without expiration and for non-expirable shares.
pub fn validate_expiration_period(dataset: &Dataset, period: Option<u32>, non_expirable: bool) -> EngineResult<()> {
    if !dataset.enable_expiration || non_expirable {
        return Ok(());
    }
    let min = dataset.expiry_min_duration.unwrap_or(1);
    let max = dataset.expiry_max_duration.unwrap_or(u32::MAX);
    match period {
        Some(p) if (min..=max).contains(&p) => Ok(()),
        _ => Err(EngineError::invalid_input(
            "share_expiration_period",
            format!("Share expiration period is not within the minimum ({min}) and the maximum ({max}) expiration duration"),
        )),
    }
}

/// Expiry date requested for a new or extended share, if the dataset expires shares.
pub fn requested_expiry(
    dataset: &Dataset,
    period: Option<u32>,
    non_expirable: bool,
    now: DateTime<Utc>,
) -> EngineResult<Option<DateTime<Utc>>> {
    validate_expiration_period(dataset, period, non_expirable)?;
    if !dataset.enable_expiration || non_expirable {
        return Ok(None);
    }
    let (Some(period), Some(setting)) = (period, dataset.expiry_setting) else {
        return Ok(None);
    };
    calculate_expiry_date(now, period, setting).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 15, 30, 0).single().unwrap_or_default()
    }

    #[test]
    fn monthly_period_of_one_ends_this_month() {
        let expiry = calculate_expiry_date(at(2026, 2, 10), 1, ExpirySetting::Monthly).unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn quarterly_period_spans_year_end() {
        let expiry = calculate_expiry_date(at(2026, 11, 30), 1, ExpirySetting::Quarterly).unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2027, 1, 31, 0, 0, 0).unwrap());
    }
}
