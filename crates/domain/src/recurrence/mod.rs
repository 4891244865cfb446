//! 日历循环规则
//!
//! 规则有两种模式：
//! - 间隔模式：`interval` 秒执行一次，可用 `interval_hours` 限定每天的时段
//! - 固定时间模式：`hours` 列出每天的执行时刻
//!
//! 两种模式共用月份、星期、月内日期三个过滤条件，三者同时满足的日期才会执行。

mod filters;
mod schedule;
mod times;
mod zone;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use scheduler_core::{SchedulerError, SchedulerResult};

pub use filters::{MonthDayFilter, MonthSet, WeekdaySet};
pub use schedule::CompiledSchedule;
pub use times::{merge_windows, TimeWindow};
pub use zone::ScheduleZone;

use times::{interval_times, parse_fixed_times, parse_windows, TIME_FORMAT};

/// 最多向后搜索的天数
const SEARCH_HORIZON_DAYS: usize = 366;

/// 规则的文本形式，用于持久化与配置文件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleDefinition {
    /// 间隔秒数，0 表示固定时间模式
    pub interval: i64,
    /// 08:00:05-10:00:00,14:00:00-18:00:00
    pub interval_hours: String,
    /// 08:00:05,10:00:00
    pub hours: String,
    /// JFMAMJJASOND: "010001000000" 或 "*"
    pub months: String,
    /// 周一到周日: "1111100" 或 "*"
    pub week_days: String,
    /// "1,15,FIRST,LAST,1MON,3TUE" 或 "*"
    pub month_days: String,
}

/// 校验后的规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    interval: u32,
    windows: Vec<TimeWindow>,
    /// 每天的执行时刻，已排序
    times: Vec<NaiveTime>,
    months: MonthSet,
    week_days: WeekdaySet,
    month_days: MonthDayFilter,
}

impl RecurrenceRule {
    /// 校验并解析规则，错误信息中包含出错的字段名
    pub fn validate(definition: &RuleDefinition) -> SchedulerResult<Self> {
        let (interval, windows, times) = if definition.interval > 0 {
            let interval = u32::try_from(definition.interval).unwrap_or(u32::MAX);
            let windows = parse_windows(&definition.interval_hours)
                .map_err(|e| SchedulerError::invalid_recurrence("IntervalHours", e))?;
            let times = interval_times(interval, &windows);
            (interval, windows, times)
        } else {
            if definition.hours.trim().is_empty() {
                return Err(SchedulerError::invalid_recurrence("Hours", "empty"));
            }
            let times = parse_fixed_times(&definition.hours)
                .map_err(|e| SchedulerError::invalid_recurrence("Hours", e))?;
            (0, Vec::new(), times)
        };

        let week_days = WeekdaySet::parse(&definition.week_days)
            .map_err(|e| SchedulerError::invalid_recurrence("WeekDays", e))?;
        let month_days = MonthDayFilter::parse(&definition.month_days)
            .map_err(|e| SchedulerError::invalid_recurrence("MonthDays", e))?;
        let months = MonthSet::parse(&definition.months)
            .map_err(|e| SchedulerError::invalid_recurrence("Months", e))?;

        Ok(Self {
            interval,
            windows,
            times,
            months,
            week_days,
            month_days,
        })
    }

    pub fn is_interval(&self) -> bool {
        self.interval > 0
    }

    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    pub fn windows(&self) -> &[TimeWindow] {
        &self.windows
    }

    /// 规范化后的文本形式
    pub fn to_definition(&self) -> RuleDefinition {
        let (interval_hours, hours) = if self.is_interval() {
            let windows: Vec<String> = self.windows.iter().map(TimeWindow::to_definition).collect();
            (windows.join(","), String::new())
        } else {
            let hours: Vec<String> = self
                .times
                .iter()
                .map(|t| t.format(TIME_FORMAT).to_string())
                .collect();
            (String::new(), hours.join(","))
        };

        RuleDefinition {
            interval: self.interval as i64,
            interval_hours,
            hours,
            months: self.months.to_definition(),
            week_days: self.week_days.to_definition(),
            month_days: self.month_days.to_definition(),
        }
    }

    /// 计算严格晚于 `reference` 的下一次执行时刻
    ///
    /// 参考时间先转换到规则时区并取整到秒（有亚秒部分时进一秒）。
    /// 366 天内没有满足条件的时刻时返回 `None`。
    pub fn calc_next_launch(
        &self,
        reference: DateTime<Utc>,
        zone: &ScheduleZone,
    ) -> Option<DateTime<Utc>> {
        if self.times.is_empty() || self.months.is_empty() {
            return None;
        }

        let local = zone.to_local(reference);
        let truncated = local.with_nanosecond(0)?;
        let local_ref = if truncated < local {
            truncated + Duration::seconds(1)
        } else {
            truncated
        };
        let ref_date = local_ref.date();
        let ref_time = local_ref.time();

        let mut day = ref_date;
        for i in 0..SEARCH_HORIZON_DAYS {
            if i > 0 {
                day = day.succ_opt()?;
            }
            // 整月跳过不符合的月份
            while !self.months.contains(day.month()) {
                day = first_day_of_next_month(day)?;
            }

            if !self.week_days.contains(day.weekday()) || !self.month_days.matches(day) {
                continue;
            }

            // times 已排序，参考日只需二分定位到参考时刻之后
            let first = if day == ref_date {
                self.times.partition_point(|time| *time <= ref_time)
            } else {
                0
            };
            for time in &self.times[first..] {
                if let Some(instant) = zone.from_local(day.and_time(*time)) {
                    if instant > reference {
                        return Some(instant);
                    }
                }
            }
        }

        None
    }
}

fn first_day_of_next_month(day: chrono::NaiveDate) -> Option<chrono::NaiveDate> {
    let (year, month) = if day.month() == 12 {
        (day.year() + 1, 1)
    } else {
        (day.year(), day.month() + 1)
    };
    chrono::NaiveDate::from_ymd_opt(year, month, 1)
}
