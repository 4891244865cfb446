use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

/// 按时刻分桶的待触发调度计划
#[derive(Debug, Default, Clone)]
pub struct NextLaunches {
    buckets: BTreeMap<DateTime<Utc>, Vec<i64>>,
}

impl NextLaunches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, at: DateTime<Utc>, schedule_id: i64) {
        let bucket = self.buckets.entry(at).or_default();
        if !bucket.contains(&schedule_id) {
            bucket.push(schedule_id);
        }
    }

    /// 取出所有 `<= now` 的条目，按时刻升序，同一时刻按调度计划ID升序
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, i64)> {
        let later = self.buckets.split_off(&(now + Duration::nanoseconds(1)));
        let due = std::mem::replace(&mut self.buckets, later);

        due.into_iter()
            .flat_map(|(at, mut ids)| {
                ids.sort_unstable();
                ids.into_iter().map(move |id| (at, id))
            })
            .collect()
    }

    /// 丢弃 `reference` 之后的所有条目
    pub fn drop_after(&mut self, reference: DateTime<Utc>) {
        let _ = self
            .buckets
            .split_off(&(reference + Duration::nanoseconds(1)));
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateTime<Utc>, i64)> + '_ {
        self.buckets
            .iter()
            .flat_map(|(at, ids)| ids.iter().map(move |id| (*at, *id)))
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
