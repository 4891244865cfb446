use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// 调度计划所在时区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleZone {
    /// 主机本地时区
    Local,
    Named(Tz),
}

impl ScheduleZone {
    /// 解析 IANA 时区名，空值或无法识别时回落到本地时区
    pub fn resolve(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() {
            return ScheduleZone::Local;
        }
        name.parse::<Tz>()
            .map(ScheduleZone::Named)
            .unwrap_or(ScheduleZone::Local)
    }

    pub fn name(&self) -> String {
        match self {
            ScheduleZone::Local => "Local".to_string(),
            ScheduleZone::Named(tz) => tz.name().to_string(),
        }
    }

    pub fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            ScheduleZone::Local => instant.with_timezone(&Local).naive_local(),
            ScheduleZone::Named(tz) => instant.with_timezone(tz).naive_local(),
        }
    }

    pub fn to_fixed(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            ScheduleZone::Local => instant.with_timezone(&Local).fixed_offset(),
            ScheduleZone::Named(tz) => instant.with_timezone(tz).fixed_offset(),
        }
    }

    /// 本地时间转为绝对时刻
    ///
    /// 夏令时跳过的时间向后顺延一小时，重复的时间取较早的一个。
    pub fn from_local(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            ScheduleZone::Local => map_local(&Local, naive),
            ScheduleZone::Named(tz) => map_local(tz, naive),
        }
    }
}

fn map_local<Z: TimeZone>(zone: &Z, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    zone.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            zone.from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}
