use chrono::{NaiveTime, Timelike};

pub(crate) const TIME_FORMAT: &str = "%H:%M:%S";
const SECONDS_PER_DAY: u32 = 24 * 3600;

/// 一天内的执行时段，首尾均包含
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn to_definition(&self) -> String {
        format!(
            "{}-{}",
            self.start.format(TIME_FORMAT),
            self.end.format(TIME_FORMAT)
        )
    }
}

fn strip_spaces(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, TIME_FORMAT).ok()
}

/// 解析固定时间列表 "08:00:00,20:00:00"，去重并排序
pub fn parse_fixed_times(text: &str) -> Result<Vec<NaiveTime>, String> {
    let cleaned = strip_spaces(text);
    let mut errs = Vec::new();
    let mut times = Vec::new();
    for entry in cleaned.split(',') {
        match parse_time(entry) {
            Some(time) => times.push(time),
            None => errs.push(format!("{entry} : parse fail")),
        }
    }
    if !errs.is_empty() {
        return Err(errs.join(","));
    }
    times.sort();
    times.dedup();
    if times.is_empty() {
        return Err("Hours empty".to_string());
    }
    Ok(times)
}

/// 解析时段列表 "08:00:00-10:00:00,14:00:00-18:00:00" 并合并
pub fn parse_windows(text: &str) -> Result<Vec<TimeWindow>, String> {
    let cleaned = strip_spaces(text);
    if cleaned == "*" {
        return Ok(Vec::new());
    }

    let mut errs = Vec::new();
    let mut windows = Vec::new();
    for entry in cleaned.split(',').filter(|e| !e.is_empty()) {
        let Some((from, to)) = entry.split_once('-') else {
            errs.push(format!("{entry} : invalid"));
            continue;
        };
        match (parse_time(from), parse_time(to)) {
            (Some(start), Some(end)) if end > start => windows.push(TimeWindow { start, end }),
            (Some(_), Some(_)) => errs.push(format!("{entry} : end must be after start")),
            _ => errs.push(format!("{entry} : parse fail")),
        }
    }
    if !errs.is_empty() {
        return Err(errs.join(","));
    }
    Ok(merge_windows(windows))
}

/// 合并相交或相邻的时段，结果按开始时间排序
///
/// 包含、被包含、向前或向后延伸的时段都会并入已有时段。
pub fn merge_windows(mut windows: Vec<TimeWindow>) -> Vec<TimeWindow> {
    windows.sort();
    let mut merged: Vec<TimeWindow> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(current) if window.start <= current.end => {
                if window.end > current.end {
                    current.end = window.end;
                }
            }
            _ => merged.push(window),
        }
    }
    merged
}

/// 按间隔生成一天内的执行时刻
pub fn interval_times(interval_secs: u32, windows: &[TimeWindow]) -> Vec<NaiveTime> {
    let step = interval_secs.max(1);
    let mut times = Vec::new();
    let mut push_range = |from: u32, to_inclusive: u32| {
        let mut secs = from;
        while secs <= to_inclusive && secs < SECONDS_PER_DAY {
            if let Some(time) = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0) {
                times.push(time);
            }
            secs = match secs.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
    };

    if windows.is_empty() {
        push_range(0, SECONDS_PER_DAY - 1);
    } else {
        for window in windows {
            push_range(
                window.start.num_seconds_from_midnight(),
                window.end.num_seconds_from_midnight(),
            );
        }
    }
    times.sort();
    times.dedup();
    times
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(text: &str) -> NaiveTime {
        NaiveTime::parse_from_str(text, TIME_FORMAT).unwrap()
    }

    fn window(text: &str) -> TimeWindow {
        let (a, b) = text.split_once('-').unwrap();
        TimeWindow { start: t(a), end: t(b) }
    }

    #[test]
    fn test_fixed_times_sorted_and_deduplicated() {
        let times = parse_fixed_times("20:00:00, 08:00:00,20:00:00").unwrap();
        assert_eq!(times, vec![t("08:00:00"), t("20:00:00")]);
    }

    #[test]
    fn test_fixed_times_report_bad_entries() {
        let err = parse_fixed_times("08:00:00,25:00:00,abc").unwrap_err();
        assert_eq!(err, "25:00:00 : parse fail,abc : parse fail");
        assert!(parse_fixed_times("").is_err());
    }

    #[test]
    fn test_overlapping_windows_merge() {
        let merged = parse_windows("08:00:00-10:00:00,09:00:00-10:30:00").unwrap();
        assert_eq!(merged, vec![window("08:00:00-10:30:00")]);
    }

    #[test]
    fn test_window_merge_is_idempotent() {
        let once = merge_windows(vec![
            window("14:00:00-18:00:00"),
            window("08:00:00-10:00:00"),
            window("09:00:00-10:30:00"),
            window("15:00:00-16:00:00"),
            window("07:00:00-08:00:00"),
        ]);
        assert_eq!(
            once,
            vec![window("07:00:00-10:30:00"), window("14:00:00-18:00:00")]
        );
        assert_eq!(merge_windows(once.clone()), once);

        let text: Vec<String> = once.iter().map(TimeWindow::to_definition).collect();
        assert_eq!(parse_windows(&text.join(",")).unwrap(), once);
    }

    #[test]
    fn test_invalid_windows() {
        assert!(parse_windows("08:00:00").is_err());
        assert!(parse_windows("10:00:00-08:00:00").is_err());
        assert!(parse_windows("08:00-09:00:00").is_err());
        assert!(parse_windows("*").unwrap().is_empty());
        assert!(parse_windows("").unwrap().is_empty());
    }

    #[test]
    fn test_interval_times_whole_day() {
        let times = interval_times(6 * 3600, &[]);
        assert_eq!(
            times,
            vec![t("00:00:00"), t("06:00:00"), t("12:00:00"), t("18:00:00")]
        );
    }

    #[test]
    fn test_interval_times_include_window_end() {
        let times = interval_times(3600, &[window("09:00:00-11:00:00")]);
        assert_eq!(times, vec![t("09:00:00"), t("10:00:00"), t("11:00:00")]);
    }
}
