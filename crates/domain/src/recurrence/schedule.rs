use chrono::{DateTime, Utc};

use scheduler_core::{SchedulerError, SchedulerResult};

use super::{RecurrenceRule, ScheduleZone};
use crate::entities::Schedule;

/// 已校验的调度计划，多条规则之间为"或"关系
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSchedule {
    pub id: i64,
    pub name: String,
    pub zone: ScheduleZone,
    pub rules: Vec<RecurrenceRule>,
}

impl CompiledSchedule {
    /// 所有规则中最早的下一次执行时刻
    pub fn calc_next_launch(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.rules
            .iter()
            .filter_map(|rule| rule.calc_next_launch(reference, &self.zone))
            .min()
    }
}

impl Schedule {
    pub fn compile(&self) -> SchedulerResult<CompiledSchedule> {
        if self.rules.is_empty() {
            return Err(SchedulerError::InvalidSchedule {
                id: self.id,
                message: "invalid scheduling".to_string(),
            });
        }

        let zone = ScheduleZone::resolve(&self.time_zone);
        let rules = self
            .rules
            .iter()
            .enumerate()
            .map(|(i, definition)| {
                RecurrenceRule::validate(definition).map_err(|e| SchedulerError::InvalidSchedule {
                    id: self.id,
                    message: format!("invalid scheduling {} : {}", i + 1, e),
                })
            })
            .collect::<SchedulerResult<Vec<_>>>()?;

        Ok(CompiledSchedule {
            id: self.id,
            name: self.name.clone(),
            zone,
            rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::RuleDefinition;

    fn utc(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    fn schedule(rules: Vec<RuleDefinition>) -> Schedule {
        Schedule {
            id: 4,
            name: "business hours".to_string(),
            time_zone: "UTC".to_string(),
            rules,
        }
    }

    #[test]
    fn test_earliest_rule_wins() {
        let compiled = schedule(vec![
            RuleDefinition {
                hours: "18:00:00".to_string(),
                ..Default::default()
            },
            RuleDefinition {
                hours: "12:30:00".to_string(),
                week_days: "0000011".to_string(),
                ..Default::default()
            },
            RuleDefinition {
                hours: "12:00:00".to_string(),
                ..Default::default()
            },
        ])
        .compile()
        .unwrap();

        // 2024-01-06 为周六
        assert_eq!(
            compiled.calc_next_launch(utc("2024-01-06T12:10:00Z")),
            Some(utc("2024-01-06T12:30:00Z"))
        );
        assert_eq!(
            compiled.calc_next_launch(utc("2024-01-08T12:10:00Z")),
            Some(utc("2024-01-08T18:00:00Z"))
        );
    }

    #[test]
    fn test_compile_errors() {
        let err = schedule(vec![]).compile().unwrap_err();
        assert!(err.to_string().contains("invalid scheduling"));

        let err = schedule(vec![
            RuleDefinition {
                hours: "08:00:00".to_string(),
                ..Default::default()
            },
            RuleDefinition {
                interval: 60,
                interval_hours: "x".to_string(),
                ..Default::default()
            },
        ])
        .compile()
        .unwrap_err();
        assert!(err.to_string().contains("invalid scheduling 2 : invalid IntervalHours"));
    }
}
