//! 实体变更通知

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Agent,
    Task,
    TaskFlow,
    Queue,
    Schedule,
}

impl EntityKind {
    /// 全量刷新时的加载顺序
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Agent,
        EntityKind::Task,
        EntityKind::Queue,
        EntityKind::TaskFlow,
        EntityKind::Schedule,
    ];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Agent => "agent",
            EntityKind::Task => "task",
            EntityKind::TaskFlow => "taskflow",
            EntityKind::Queue => "queue",
            EntityKind::Schedule => "schedule",
        };
        f.write_str(name)
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "agent" => Ok(EntityKind::Agent),
            "task" => Ok(EntityKind::Task),
            "taskflow" => Ok(EntityKind::TaskFlow),
            "queue" => Ok(EntityKind::Queue),
            "schedule" => Ok(EntityKind::Schedule),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// 外部通知：某类实体（或其中一个）已变更
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityChange {
    pub kind: EntityKind,
    /// `None` 表示整类重新加载
    pub id: Option<i64>,
}

impl EntityChange {
    pub fn one(kind: EntityKind, id: i64) -> Self {
        Self { kind, id: Some(id) }
    }

    pub fn all(kind: EntityKind) -> Self {
        Self { kind, id: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("TaskFlow".parse::<EntityKind>().unwrap(), EntityKind::TaskFlow);
        assert_eq!(EntityKind::Queue.to_string(), "queue");
        assert!("user".parse::<EntityKind>().is_err());
    }
}
