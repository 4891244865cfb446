use std::collections::HashMap;

use scheduler_core::SchedulerResult;
use scheduler_domain::{
    Agent, CompiledSchedule, EntityChange, EntityKind, EntityRepository, Queue, Task, TaskFlow,
};
use tracing::{debug, info, warn};

/// 一次刷新的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub kind: Option<EntityKind>,
    /// 本次刷新中消失的队列，需要通知 Worker 删除
    pub removed_queues: Vec<i64>,
}

/// 调度器持有的实体缓存
///
/// 只在调度循环内部读写。调度计划以编译后的形式保存，编译失败的不进入缓存。
#[derive(Debug, Default)]
pub struct EntityCache {
    agents: HashMap<i64, Agent>,
    tasks: HashMap<i64, Task>,
    taskflows: HashMap<i64, TaskFlow>,
    queues: HashMap<i64, Queue>,
    schedules: HashMap<i64, CompiledSchedule>,
    /// 调度计划 -> 绑定的启用任务流，ID 升序
    schedule_taskflows: HashMap<i64, Vec<i64>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(&self, id: i64) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn task(&self, id: i64) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn taskflow(&self, id: i64) -> Option<&TaskFlow> {
        self.taskflows.get(&id)
    }

    pub fn queue(&self, id: i64) -> Option<&Queue> {
        self.queues.get(&id)
    }

    /// 按ID升序
    pub fn queues(&self) -> Vec<Queue> {
        let mut queues: Vec<Queue> = self.queues.values().cloned().collect();
        queues.sort_by_key(|q| q.id);
        queues
    }

    pub fn schedule(&self, id: i64) -> Option<&CompiledSchedule> {
        self.schedules.get(&id)
    }

    pub fn schedules(&self) -> impl Iterator<Item = &CompiledSchedule> {
        self.schedules.values()
    }

    pub fn taskflows_of(&self, schedule_id: i64) -> &[i64] {
        self.schedule_taskflows
            .get(&schedule_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 按 `EntityKind::ALL` 的顺序重新加载所有实体
    pub async fn refresh_all(
        &mut self,
        repository: &dyn EntityRepository,
    ) -> SchedulerResult<Vec<RefreshReport>> {
        let mut reports = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            reports.push(self.refresh(repository, EntityChange::all(kind)).await?);
        }
        Ok(reports)
    }

    /// 刷新一类实体；带ID时只刷新该实体，仓储中不存在则从缓存移除
    pub async fn refresh(
        &mut self,
        repository: &dyn EntityRepository,
        change: EntityChange,
    ) -> SchedulerResult<RefreshReport> {
        let mut report = RefreshReport {
            kind: Some(change.kind),
            ..RefreshReport::default()
        };

        match change.kind {
            EntityKind::Agent => {
                let agents = repository.list_agents(change.id).await?;
                apply(&mut self.agents, change.id, agents, |a| a.id);
            }
            EntityKind::Task => {
                let tasks = repository.list_tasks(change.id).await?;
                apply(&mut self.tasks, change.id, tasks, |t| t.id);
            }
            EntityKind::TaskFlow => {
                let taskflows = repository.list_taskflows(change.id).await?;
                apply(&mut self.taskflows, change.id, taskflows, |t| t.id);
                self.rebuild_schedule_links();
            }
            EntityKind::Queue => {
                let mut queues = repository.list_queues(change.id).await?;
                queues.iter_mut().for_each(Queue::normalize);
                let before: Vec<i64> = self.queues.keys().copied().collect();
                apply(&mut self.queues, change.id, queues, |q| q.id);
                report.removed_queues = before
                    .into_iter()
                    .filter(|id| !self.queues.contains_key(id))
                    .collect();
            }
            EntityKind::Schedule => {
                let schedules = repository.list_schedules(change.id).await?;
                let compiled = schedules
                    .iter()
                    .filter_map(|schedule| match schedule.compile() {
                        Ok(compiled) => Some(compiled),
                        Err(e) => {
                            warn!(schedule_id = schedule.id, "调度计划无效，已忽略: {}", e);
                            None
                        }
                    })
                    .collect();
                apply(&mut self.schedules, change.id, compiled, |s| s.id);
                self.rebuild_schedule_links();
            }
        }

        debug!(kind = %change.kind, id = ?change.id, "实体缓存已刷新");
        Ok(report)
    }

    fn rebuild_schedule_links(&mut self) {
        let mut links: HashMap<i64, Vec<i64>> = HashMap::new();
        for taskflow in self.taskflows.values() {
            if taskflow.is_scheduled() && self.schedules.contains_key(&taskflow.schedule_id) {
                links
                    .entry(taskflow.schedule_id)
                    .or_default()
                    .push(taskflow.id);
            }
        }
        for ids in links.values_mut() {
            ids.sort_unstable();
        }

        info!(
            schedules = self.schedules.len(),
            bound_schedules = links.len(),
            "调度计划与任务流绑定关系已更新"
        );
        self.schedule_taskflows = links;
    }
}

fn apply<T>(map: &mut HashMap<i64, T>, id: Option<i64>, items: Vec<T>, key: impl Fn(&T) -> i64) {
    match id {
        None => map.clear(),
        Some(id) => {
            map.remove(&id);
        }
    }
    for item in items {
        map.insert(key(&item), item);
    }
}
