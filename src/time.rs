use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_date(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Calendar day of a timestamp in the device's local zone.
pub fn local_day(ms: i64) -> NaiveDate {
    Local.from_utc_datetime(&to_date(ms).naive_utc()).date_naive()
}

/// Half-open `[start, end)` millisecond bounds of the local calendar day containing `ms`.
pub fn local_day_bounds(ms: i64) -> (i64, i64) {
    let day = local_day(ms);
    let start = day
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(ms);
    let end = day
        .succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(start + 86_400_000);
    (start, end)
}
