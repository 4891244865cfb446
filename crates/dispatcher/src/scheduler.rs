use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use scheduler_core::{AppConfig, SchedulerConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{
    AgentApi, DashboardView, EntityChange, EntityKind, EntityRepository, PreparedRun, Queue,
    Trigger, UpcomingLaunch,
};
use scheduler_worker::{FlowExecutor, WorkerHandle, WorkerServiceBuilder};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::EntityCache;
use crate::next_launches::NextLaunches;
use crate::preparer::TaskFlowPreparer;

enum SchedulerCommand {
    /// `None` 表示刷新全部实体
    Refresh(Option<EntityChange>),
    ManualLaunch { taskflow_id: i64, actor: String },
    Stop(oneshot::Sender<()>),
}

/// 调度器对外句柄，可在多个任务间克隆共享
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    worker: WorkerHandle,
    upcoming_rx: watch::Receiver<Vec<UpcomingLaunch>>,
}

impl SchedulerHandle {
    /// 通知某类实体（或其中一个）已变更
    pub async fn notify_change(&self, change: EntityChange) -> SchedulerResult<()> {
        self.send(SchedulerCommand::Refresh(Some(change))).await
    }

    pub async fn refresh_all(&self) -> SchedulerResult<()> {
        self.send(SchedulerCommand::Refresh(None)).await
    }

    /// 立即触发任务流，不经过调度计划
    pub async fn manual_launch(&self, taskflow_id: i64, actor: &str) -> SchedulerResult<()> {
        self.send(SchedulerCommand::ManualLaunch {
            taskflow_id,
            actor: actor.to_string(),
        })
        .await
    }

    pub fn dashboard(&self) -> DashboardView {
        DashboardView {
            worker: self.worker.snapshot(),
            upcoming: self.upcoming_rx.borrow().clone(),
        }
    }

    /// 停止调度并等待 Worker 排空（有上限），完成后返回
    pub async fn stop(&self) -> SchedulerResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(SchedulerCommand::Stop(ack_tx)).await?;
        ack_rx
            .await
            .map_err(|_| SchedulerError::ChannelClosed("scheduler stop".to_string()))
    }

    async fn send(&self, command: SchedulerCommand) -> SchedulerResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SchedulerError::ChannelClosed("scheduler".to_string()))
    }
}

pub struct Scheduler;

impl Scheduler {
    /// 加载全部实体、启动 Worker、计算首个预计算窗口并启动调度循环
    pub async fn start(
        config: &AppConfig,
        repository: Arc<dyn EntityRepository>,
        agent_api: Arc<dyn AgentApi>,
    ) -> SchedulerResult<SchedulerHandle> {
        let mut cache = EntityCache::new();
        cache.refresh_all(repository.as_ref()).await?;

        let executor = Arc::new(FlowExecutor::new(agent_api, config.agent.poll_interval()));
        let worker = WorkerServiceBuilder::new(executor, repository.clone())
            .config(config.worker.clone())
            .queues(cache.queues())
            .build()
            .spawn();

        let (command_tx, command_rx) = mpsc::channel(config.scheduler.command_buffer);
        let (upcoming_tx, upcoming_rx) = watch::channel(Vec::new());

        let now = Utc::now();
        let mut control = SchedulerLoop {
            config: config.scheduler.clone(),
            repository,
            cache,
            launches: NextLaunches::new(),
            reference: now,
            next_refresh_at: now,
            worker: worker.clone(),
            upcoming_tx,
        };
        control.recompute(now);
        control.publish_upcoming();

        tokio::spawn(control.run(command_rx));
        info!("调度器已启动");

        Ok(SchedulerHandle {
            command_tx,
            worker,
            upcoming_rx,
        })
    }
}

struct SchedulerLoop {
    config: SchedulerConfig,
    repository: Arc<dyn EntityRepository>,
    cache: EntityCache,
    launches: NextLaunches,
    /// 已处理到的时刻
    reference: DateTime<Utc>,
    /// 到达该时刻后重算预计算窗口
    next_refresh_at: DateTime<Utc>,
    worker: WorkerHandle,
    upcoming_tx: watch::Sender<Vec<UpcomingLaunch>>,
}

impl SchedulerLoop {
    async fn run(mut self, mut command_rx: mpsc::Receiver<SchedulerCommand>) {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let ack = loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(Utc::now()).await,
                command = command_rx.recv() => match command {
                    Some(SchedulerCommand::Refresh(change)) => self.apply_change(change).await,
                    Some(SchedulerCommand::ManualLaunch { taskflow_id, actor }) => {
                        self.manual_launch(taskflow_id, &actor).await
                    }
                    Some(SchedulerCommand::Stop(ack)) => break Some(ack),
                    None => break None,
                },
            }
        };
        command_rx.close();

        info!("调度循环停止，等待运行中的任务流结束");
        self.drain_worker().await;
        self.worker.shutdown();

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        info!("调度器已停止");
    }

    async fn tick(&mut self, now: DateTime<Utc>) {
        for (at, schedule_id) in self.launches.pop_due(now) {
            self.launch_schedule(schedule_id, at).await;
        }

        self.reference = now;
        if now >= self.next_refresh_at {
            self.recompute(now);
        }
        self.publish_upcoming();
    }

    async fn launch_schedule(&self, schedule_id: i64, at: DateTime<Utc>) {
        let Some(schedule) = self.cache.schedule(schedule_id) else {
            debug!(schedule_id, "调度计划已不存在，跳过");
            return;
        };

        let trigger = Trigger::Scheduled {
            schedule_id,
            planned_at: schedule.zone.to_fixed(at),
        };
        let preparer = TaskFlowPreparer::new(&self.cache);
        let runs: Vec<PreparedRun> = self
            .cache
            .taskflows_of(schedule_id)
            .iter()
            .filter_map(|id| self.cache.taskflow(*id))
            .map(|taskflow| preparer.prepare(taskflow, &trigger))
            .collect();

        debug!(schedule_id, taskflows = runs.len(), "调度计划到期");
        for run in runs {
            self.submit(run).await;
        }
    }

    async fn manual_launch(&self, taskflow_id: i64, actor: &str) {
        let Some(taskflow) = self.cache.taskflow(taskflow_id) else {
            warn!(taskflow_id, actor, "手动触发的任务流不存在");
            return;
        };

        let trigger = Trigger::Manual {
            actor: actor.to_string(),
            requested_at: Local::now().fixed_offset(),
        };
        let run = TaskFlowPreparer::new(&self.cache).prepare(taskflow, &trigger);
        info!(taskflow_id, actor, identity = %run.identity, "手动触发任务流");
        self.submit(run).await;
    }

    async fn submit(&self, run: PreparedRun) {
        let taskflow_id = run.taskflow_id;
        if let Err(e) = self.worker.submit(run).await {
            error!(taskflow_id, "提交运行到 Worker 失败: {}", e);
        }
    }

    async fn apply_change(&mut self, change: Option<EntityChange>) {
        let refreshed = match change {
            Some(change) => self
                .cache
                .refresh(self.repository.as_ref(), change)
                .await
                .map(|report| vec![report]),
            None => self.cache.refresh_all(self.repository.as_ref()).await,
        };

        let reports = match refreshed {
            Ok(reports) => reports,
            Err(e) => {
                error!(change = ?change, "刷新实体缓存失败: {}", e);
                return;
            }
        };

        let mut recompute = false;
        for report in reports {
            match report.kind {
                Some(EntityKind::Queue) => self.sync_queues(&report.removed_queues).await,
                Some(EntityKind::Schedule | EntityKind::TaskFlow) => recompute = true,
                _ => {}
            }
        }

        if recompute {
            self.recompute(self.reference);
            self.publish_upcoming();
        }
    }

    /// 把当前全部队列定义和已删除队列的占位定义发给 Worker
    async fn sync_queues(&self, removed: &[i64]) {
        let updates = self
            .cache
            .queues()
            .into_iter()
            .chain(removed.iter().map(|id| Queue::tombstone(*id)));

        for queue in updates {
            if let Err(e) = self.worker.update_queue(queue).await {
                error!("同步队列到 Worker 失败: {}", e);
                return;
            }
        }
    }

    /// 丢弃 `reference` 之后的条目，重新填充到预计算窗口末端
    fn recompute(&mut self, reference: DateTime<Utc>) {
        self.launches.drop_after(reference);
        let horizon = reference + self.config.lookahead();

        for schedule in self.cache.schedules() {
            let mut cursor = reference;
            while let Some(next) = schedule.calc_next_launch(cursor) {
                if next > horizon {
                    break;
                }
                self.launches.add(next, schedule.id);
                cursor = next;
            }
        }

        self.next_refresh_at = reference + self.config.lookahead() / 2;
        debug!(
            entries = self.launches.len(),
            next_refresh_at = %self.next_refresh_at,
            "预计算窗口已更新"
        );
    }

    fn publish_upcoming(&self) {
        let limit = self.config.upcoming_view_limit;
        let mut upcoming = Vec::new();

        'collect: for (at, schedule_id) in self.launches.iter() {
            let Some(schedule) = self.cache.schedule(schedule_id) else {
                continue;
            };
            for taskflow_id in self.cache.taskflows_of(schedule_id) {
                if upcoming.len() >= limit {
                    break 'collect;
                }
                if let Some(taskflow) = self.cache.taskflow(*taskflow_id) {
                    upcoming.push(UpcomingLaunch {
                        at,
                        schedule_id,
                        schedule_name: schedule.name.clone(),
                        taskflow_id: taskflow.id,
                        taskflow_name: taskflow.name.clone(),
                    });
                }
            }
        }

        self.upcoming_tx.send_replace(upcoming);
    }

    async fn drain_worker(&self) {
        let deadline = Instant::now() + self.config.shutdown_grace();
        loop {
            let active = match self.worker.active_runs().await {
                Ok(active) => active,
                Err(e) => {
                    warn!("查询 Worker 运行数失败: {}", e);
                    return;
                }
            };
            if active == 0 {
                return;
            }
            if Instant::now() >= deadline {
                warn!(active, "等待超时，仍有运行中的任务流");
                return;
            }
            tokio::time::sleep(self.config.shutdown_poll_interval()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scheduler_testing_utils::{
        AgentBuilder, MockAgentApi, MockEntityRepository, ScheduleBuilder, TaskBuilder,
        TaskFlowBuilder,
    };
    use std::time::Duration;

    async fn control(repository: Arc<MockEntityRepository>) -> SchedulerLoop {
        let mut cache = EntityCache::new();
        cache.refresh_all(repository.as_ref()).await.unwrap();

        let executor = Arc::new(FlowExecutor::new(
            Arc::new(MockAgentApi::new()),
            Duration::from_millis(1),
        ));
        let worker = WorkerServiceBuilder::new(executor, repository.clone())
            .build()
            .spawn();
        let (upcoming_tx, _) = watch::channel(Vec::new());
        let now = Utc::now();

        SchedulerLoop {
            config: SchedulerConfig::default(),
            repository,
            cache,
            launches: NextLaunches::new(),
            reference: now,
            next_refresh_at: now,
            worker,
            upcoming_tx,
        }
    }

    fn repository() -> Arc<MockEntityRepository> {
        Arc::new(
            MockEntityRepository::new()
                .with_agents(vec![AgentBuilder::new(1).build()])
                .with_tasks(vec![TaskBuilder::command(1, "/bin/job").build()])
                .with_taskflows(vec![
                    TaskFlowBuilder::new(1).name("hourly").schedule(1).step(1).build(),
                    TaskFlowBuilder::new(2).name("twice").schedule(2).step(1).build(),
                ])
                .with_schedules(vec![
                    ScheduleBuilder::new(1).every(3600).build(),
                    ScheduleBuilder::new(2).at("09:10:00,09:20:00").build(),
                ]),
        )
    }

    #[tokio::test]
    async fn test_recompute_fills_lookahead_window() {
        let mut control = control(repository()).await;
        let reference = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();

        control.recompute(reference);

        let entries: Vec<_> = control.launches.iter().collect();
        assert_eq!(
            entries,
            vec![
                (Utc.with_ymd_and_hms(2024, 1, 1, 9, 10, 0).unwrap(), 2),
                (Utc.with_ymd_and_hms(2024, 1, 1, 9, 20, 0).unwrap(), 2),
            ]
        );
        assert_eq!(
            control.next_refresh_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 15, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let mut control = control(repository()).await;
        let reference = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();

        control.recompute(reference);
        let first: Vec<_> = control.launches.iter().collect();
        control.recompute(reference);
        let second: Vec<_> = control.launches.iter().collect();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_tick_pops_due_and_refreshes_half_window() {
        let mut control = control(repository()).await;
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        control.recompute(start);

        control.tick(start + chrono::Duration::minutes(11)).await;
        let remaining: Vec<_> = control.launches.iter().collect();
        assert_eq!(
            remaining,
            vec![(Utc.with_ymd_and_hms(2024, 1, 1, 9, 20, 0).unwrap(), 2)]
        );

        // 半个窗口消耗后自动重算，已取出的 09:10 不会重复出现
        control.tick(start + chrono::Duration::minutes(16)).await;
        let remaining: Vec<_> = control.launches.iter().collect();
        assert_eq!(
            remaining,
            vec![(Utc.with_ymd_and_hms(2024, 1, 1, 9, 20, 0).unwrap(), 2)]
        );

        // 10:00 的整点随窗口前移进入
        control.tick(start + chrono::Duration::minutes(31)).await;
        let remaining: Vec<_> = control.launches.iter().collect();
        assert_eq!(
            remaining,
            vec![(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(), 1)]
        );
    }

    #[tokio::test]
    async fn test_upcoming_view_is_limited() {
        let mut control = control(repository()).await;
        control.config.upcoming_view_limit = 1;
        control.recompute(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());

        control.publish_upcoming();

        let upcoming = control.upcoming_tx.borrow().clone();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].taskflow_name, "twice");
        assert_eq!(upcoming[0].schedule_name, "schedule-2");
    }

    #[tokio::test]
    async fn test_schedule_change_triggers_recompute() {
        let repository = repository();
        let mut control = control(repository.clone()).await;
        control.reference = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        control.recompute(control.reference);

        repository.remove_schedule(2);
        control
            .apply_change(Some(EntityChange::one(EntityKind::Schedule, 2)))
            .await;

        assert!(control.launches.is_empty());
    }
}
