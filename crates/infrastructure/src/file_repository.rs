use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    Agent, EntityRepository, Queue, RunOutcome, RunResult, Schedule, Task, TaskFlow,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// 定义文件内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityDefinitions {
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
    pub queues: Vec<Queue>,
    pub taskflows: Vec<TaskFlow>,
    pub schedules: Vec<Schedule>,
}

impl EntityDefinitions {
    /// 按扩展名解析：`.json` 为 JSON，其余按 TOML
    pub fn parse(path: &Path, content: &str) -> SchedulerResult<Self> {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let definitions: Self = if is_json {
            serde_json::from_str(content).map_err(|e| {
                SchedulerError::Configuration(format!("解析定义文件 {} 失败: {e}", path.display()))
            })?
        } else {
            toml::from_str(content).map_err(|e| {
                SchedulerError::Configuration(format!("解析定义文件 {} 失败: {e}", path.display()))
            })?
        };

        definitions.validate()?;
        Ok(definitions)
    }

    /// 检查ID唯一以及任务流步骤结构
    pub fn validate(&self) -> SchedulerResult<()> {
        check_unique("agent", self.agents.iter().map(|a| a.id))?;
        check_unique("task", self.tasks.iter().map(|t| t.id))?;
        check_unique("queue", self.queues.iter().map(|q| q.id))?;
        check_unique("taskflow", self.taskflows.iter().map(|t| t.id))?;
        check_unique("schedule", self.schedules.iter().map(|s| s.id))?;

        if let Some(queue) = self.queues.iter().find(|q| q.id <= Queue::DIRECT_ID) {
            return Err(SchedulerError::Configuration(format!(
                "队列ID必须为正数: {}",
                queue.id
            )));
        }

        for taskflow in &self.taskflows {
            taskflow.validate().map_err(|message| {
                SchedulerError::Configuration(format!("taskflow {} : {message}", taskflow.id))
            })?;
        }
        Ok(())
    }
}

fn check_unique(kind: &str, ids: impl Iterator<Item = i64>) -> SchedulerResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(SchedulerError::Configuration(format!(
                "{kind} ID 重复: {id}"
            )));
        }
    }
    Ok(())
}

fn select<T: Clone>(items: &[T], id: Option<i64>, key: impl Fn(&T) -> i64) -> Vec<T> {
    items
        .iter()
        .filter(|item| id.is_none_or(|id| key(item) == id))
        .cloned()
        .collect()
}

/// 基于定义文件的实体仓储
///
/// 运行结果只保存在内存中，读取任务流时合并到 `last_run`。
pub struct FileEntityRepository {
    path: PathBuf,
    definitions: RwLock<EntityDefinitions>,
    outcomes: RwLock<HashMap<i64, RunOutcome>>,
}

impl FileEntityRepository {
    pub async fn open(path: impl AsRef<Path>) -> SchedulerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let definitions = Self::read(&path).await?;
        info!(
            path = %path.display(),
            agents = definitions.agents.len(),
            tasks = definitions.tasks.len(),
            queues = definitions.queues.len(),
            taskflows = definitions.taskflows.len(),
            schedules = definitions.schedules.len(),
            "实体定义已加载"
        );

        Ok(Self {
            path,
            definitions: RwLock::new(definitions),
            outcomes: RwLock::new(HashMap::new()),
        })
    }

    /// 从内存中的定义构建，不关联文件
    pub fn from_definitions(definitions: EntityDefinitions) -> SchedulerResult<Self> {
        definitions.validate()?;
        Ok(Self {
            path: PathBuf::new(),
            definitions: RwLock::new(definitions),
            outcomes: RwLock::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 重新读取定义文件；失败时保留原有定义
    pub async fn reload(&self) -> SchedulerResult<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }

        let definitions = Self::read(&self.path).await?;
        *self.definitions.write().await = definitions;
        info!(path = %self.path.display(), "实体定义已重新加载");
        Ok(())
    }

    pub async fn last_outcome(&self, taskflow_id: i64) -> Option<RunOutcome> {
        self.outcomes.read().await.get(&taskflow_id).cloned()
    }

    async fn read(path: &Path) -> SchedulerResult<EntityDefinitions> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SchedulerError::Configuration(format!("读取定义文件 {} 失败: {e}", path.display()))
        })?;
        EntityDefinitions::parse(path, &content)
    }
}

#[async_trait]
impl EntityRepository for FileEntityRepository {
    async fn list_agents(&self, id: Option<i64>) -> SchedulerResult<Vec<Agent>> {
        Ok(select(&self.definitions.read().await.agents, id, |a| a.id))
    }

    async fn list_tasks(&self, id: Option<i64>) -> SchedulerResult<Vec<Task>> {
        Ok(select(&self.definitions.read().await.tasks, id, |t| t.id))
    }

    async fn list_taskflows(&self, id: Option<i64>) -> SchedulerResult<Vec<TaskFlow>> {
        let mut taskflows = select(&self.definitions.read().await.taskflows, id, |t| t.id);
        let outcomes = self.outcomes.read().await;
        for taskflow in taskflows.iter_mut() {
            if let Some(outcome) = outcomes.get(&taskflow.id) {
                taskflow.last_run = outcome.clone();
            }
        }
        Ok(taskflows)
    }

    async fn list_queues(&self, id: Option<i64>) -> SchedulerResult<Vec<Queue>> {
        Ok(select(&self.definitions.read().await.queues, id, |q| q.id))
    }

    async fn list_schedules(&self, id: Option<i64>) -> SchedulerResult<Vec<Schedule>> {
        Ok(select(&self.definitions.read().await.schedules, id, |s| s.id))
    }

    async fn save_run_outcome(
        &self,
        taskflow_id: i64,
        outcome: &RunOutcome,
    ) -> SchedulerResult<()> {
        info!(
            taskflow_id,
            result = ?outcome.result,
            failed = outcome.result == RunResult::Fail,
            "任务流运行结果已记录"
        );
        self.outcomes
            .write()
            .await
            .insert(taskflow_id, outcome.clone());
        Ok(())
    }
}
