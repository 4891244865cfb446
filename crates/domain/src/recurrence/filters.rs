//! 月份、星期与月内日期过滤器
//!
//! 文本形式只用于序列化，校验时解析为定长位集。

use chrono::{Datelike, NaiveDate, Weekday};

const WEEKDAY_CODES: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

fn parse_bitmask(text: &str, width: usize) -> Result<Option<u32>, String> {
    let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() || cleaned == "*" {
        return Ok(None);
    }
    if cleaned.len() != width || !cleaned.chars().all(|c| c == '0' || c == '1') {
        return Err(format!(
            "{cleaned} : expected {width} characters of 0/1 or *"
        ));
    }
    let bits = cleaned
        .chars()
        .enumerate()
        .filter(|(_, c)| *c == '1')
        .fold(0u32, |acc, (i, _)| acc | (1 << i));
    Ok(Some(bits))
}

fn render_bitmask(bits: u32, width: usize) -> String {
    if bits == (1 << width) - 1 {
        return "*".to_string();
    }
    (0..width)
        .map(|i| if bits & (1 << i) != 0 { '1' } else { '0' })
        .collect()
}

/// 12 位月份集合，第 0 位为一月
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthSet(u16);

impl MonthSet {
    pub const ALL: MonthSet = MonthSet(0x0FFF);

    pub fn parse(text: &str) -> Result<Self, String> {
        Ok(parse_bitmask(text, 12)?.map_or(Self::ALL, |bits| MonthSet(bits as u16)))
    }

    /// `month` 取值 1..=12
    pub fn contains(&self, month: u32) -> bool {
        (1..=12).contains(&month) && self.0 & (1 << (month - 1)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn to_definition(&self) -> String {
        render_bitmask(self.0 as u32, 12)
    }
}

/// 7 位星期集合，周一在前
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const ALL: WeekdaySet = WeekdaySet(0x7F);

    pub fn parse(text: &str) -> Result<Self, String> {
        Ok(parse_bitmask(text, 7)?.map_or(Self::ALL, |bits| WeekdaySet(bits as u8)))
    }

    pub fn contains(&self, weekday: Weekday) -> bool {
        self.0 & (1 << weekday.num_days_from_monday()) != 0
    }

    pub fn to_definition(&self) -> String {
        render_bitmask(self.0 as u32, 7)
    }
}

/// 月内日期过滤：日期号、FIRST、LAST、以及 `<1-5><MON..SUN>` 第 n 个星期几
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonthDayFilter {
    days: u32,
    first: bool,
    last: bool,
    /// 第 (n-1)*7 + weekday 位
    nth_weekdays: u64,
}

impl MonthDayFilter {
    pub fn parse(text: &str) -> Result<Self, String> {
        let cleaned: String = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        let mut filter = MonthDayFilter::default();
        if cleaned.is_empty() || cleaned == "*" {
            return Ok(filter);
        }

        let mut errs = Vec::new();
        for entry in cleaned.split(',').filter(|e| !e.is_empty()) {
            match entry {
                "FIRST" => filter.first = true,
                "LAST" => filter.last = true,
                _ => {
                    if let Some(bit) = parse_nth_weekday(entry) {
                        filter.nth_weekdays |= 1 << bit;
                    } else if let Ok(day @ 1..=31) = entry.parse::<u32>() {
                        filter.days |= 1 << (day - 1);
                    } else {
                        errs.push(format!("{entry} : unknown day"));
                    }
                }
            }
        }

        if errs.is_empty() {
            Ok(filter)
        } else {
            Err(errs.join(","))
        }
    }

    /// 未配置任何条件时不做限制
    pub fn is_unrestricted(&self) -> bool {
        self.days == 0 && !self.first && !self.last && self.nth_weekdays == 0
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let day = date.day();
        let is_last = date
            .succ_opt()
            .map_or(true, |next| next.month() != date.month());

        self.days & (1 << (day - 1)) != 0
            || (self.first && day == 1)
            || (self.last && is_last)
            || self.nth_weekdays & (1 << nth_weekday_bit(date)) != 0
    }

    pub fn to_definition(&self) -> String {
        if self.is_unrestricted() {
            return "*".to_string();
        }
        let mut parts = Vec::new();
        if self.first {
            parts.push("FIRST".to_string());
        }
        if self.last {
            parts.push("LAST".to_string());
        }
        let mut keywords: Vec<String> = (0..35)
            .filter(|bit| self.nth_weekdays & (1 << bit) != 0)
            .map(|bit| format!("{}{}", bit / 7 + 1, WEEKDAY_CODES[(bit % 7) as usize]))
            .collect();
        keywords.sort();
        parts.extend(keywords);
        parts.extend(
            (1..=31u32)
                .filter(|day| self.days & (1 << (day - 1)) != 0)
                .map(|day| day.to_string()),
        );
        parts.join(",")
    }
}

/// "3TUE" -> 第三个周二
fn parse_nth_weekday(entry: &str) -> Option<u32> {
    if entry.len() != 4 || !entry.is_ascii() {
        return None;
    }
    let ordinal = entry[..1].parse::<u32>().ok().filter(|n| (1..=5).contains(n))?;
    let weekday = WEEKDAY_CODES.iter().position(|code| *code == &entry[1..])? as u32;
    Some((ordinal - 1) * 7 + weekday)
}

fn nth_weekday_bit(date: NaiveDate) -> u32 {
    let ordinal = (date.day() - 1) / 7;
    ordinal * 7 + date.weekday().num_days_from_monday()
}
