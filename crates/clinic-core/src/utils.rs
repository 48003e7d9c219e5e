//! 通用工具函数

use crate::error::{ClinicError, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};

/// 由分钟数构造诊所本地时区偏移
pub fn clinic_offset(utc_offset_minutes: i32) -> Result<FixedOffset> {
    utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| ClinicError::Config(format!("invalid UTC offset: {} minutes", utc_offset_minutes)))
}

/// 返回 `now` 所在本地日的 `[当天零点, 次日零点)`，以 UTC 表示
pub fn day_window(now: DateTime<Utc>, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_midnight = now.with_timezone(&offset).date_naive().and_time(NaiveTime::MIN);
    let start = Utc.from_utc_datetime(&local_midnight)
        - Duration::seconds(i64::from(offset.local_minus_utc()));
    (start, start + Duration::days(1))
}

/// 时间点是否早于 `now` 所在本地日的零点
pub fn before_today(at: DateTime<Utc>, now: DateTime<Utc>, offset: FixedOffset) -> bool {
    at < day_window(now, offset).0
}
