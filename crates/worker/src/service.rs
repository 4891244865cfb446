use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scheduler_core::{SchedulerError, SchedulerResult, WorkerConfig};
use scheduler_domain::{
    EntityRepository, PreparedRun, Queue, RunOutcome, RunState, RunView, WorkerSnapshot,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::components::{FlowExecutor, FlowOutcome};
use crate::queue_state::QueueState;

enum WorkerCommand {
    Submit(Box<PreparedRun>),
    UpdateQueue(Queue),
    /// 按命令顺序回答尚未终止的运行数
    ActiveRuns(oneshot::Sender<usize>),
}

struct RunFeedback {
    seq: u64,
    outcome: FlowOutcome,
}

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    config: WorkerConfig,
    executor: Arc<FlowExecutor>,
    repository: Arc<dyn EntityRepository>,
    queues: Vec<Queue>,
}

impl WorkerServiceBuilder {
    pub fn new(executor: Arc<FlowExecutor>, repository: Arc<dyn EntityRepository>) -> Self {
        Self {
            config: WorkerConfig::default(),
            executor,
            repository,
            queues: Vec::new(),
        }
    }

    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// 初始队列定义
    pub fn queues(mut self, queues: Vec<Queue>) -> Self {
        self.queues = queues;
        self
    }

    pub fn build(self) -> WorkerService {
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(WorkerSnapshot::default());

        let mut service = WorkerService {
            queues: BTreeMap::new(),
            runs: Vec::new(),
            next_seq: 0,
            config: self.config,
            executor: self.executor,
            repository: self.repository,
            feedback_tx,
            feedback_rx: Some(feedback_rx),
            snapshot_tx,
        };

        let direct = Queue::direct(service.config.direct_queue_slot);
        service
            .queues
            .insert(direct.id, QueueState::new(direct));
        for queue in self.queues {
            service.update_queue(queue);
        }
        service.publish_snapshot(Utc::now());
        service
    }
}

/// Worker 控制循环持有的状态，只在循环任务内部修改
pub struct WorkerService {
    queues: BTreeMap<i64, QueueState>,
    /// 按提交顺序排列，启动时先进先出
    runs: Vec<PreparedRun>,
    next_seq: u64,
    config: WorkerConfig,
    executor: Arc<FlowExecutor>,
    repository: Arc<dyn EntityRepository>,
    feedback_tx: mpsc::UnboundedSender<RunFeedback>,
    feedback_rx: Option<mpsc::UnboundedReceiver<RunFeedback>>,
    snapshot_tx: watch::Sender<WorkerSnapshot>,
}

/// Worker 对外句柄
#[derive(Clone)]
pub struct WorkerHandle {
    command_tx: mpsc::Sender<WorkerCommand>,
    snapshot_rx: watch::Receiver<WorkerSnapshot>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerHandle {
    /// 提交一次运行；去重、容量检查在 Worker 循环内完成
    pub async fn submit(&self, run: PreparedRun) -> SchedulerResult<()> {
        self.command_tx
            .send(WorkerCommand::Submit(Box::new(run)))
            .await
            .map_err(|_| SchedulerError::ChannelClosed("worker".to_string()))
    }

    /// 新增、修改或删除（slot 为 0）一个队列
    pub async fn update_queue(&self, queue: Queue) -> SchedulerResult<()> {
        self.command_tx
            .send(WorkerCommand::UpdateQueue(queue))
            .await
            .map_err(|_| SchedulerError::ChannelClosed("worker".to_string()))
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// 尚未终止的运行数，包含在此之前已提交但快照中还看不到的运行
    pub async fn active_runs(&self) -> SchedulerResult<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(WorkerCommand::ActiveRuns(reply_tx))
            .await
            .map_err(|_| SchedulerError::ChannelClosed("worker".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SchedulerError::ChannelClosed("worker active runs".to_string()))
    }

    /// 停止控制循环；已派发的执行任务不受影响
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl WorkerService {
    /// 启动控制循环并返回句柄
    pub fn spawn(mut self) -> WorkerHandle {
        let (command_tx, command_rx) = mpsc::channel(self.config.command_buffer);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let snapshot_rx = self.snapshot_tx.subscribe();

        let feedback_rx = self.feedback_rx.take();
        if let Some(feedback_rx) = feedback_rx {
            tokio::spawn(self.run(command_rx, feedback_rx, shutdown_rx));
        }

        WorkerHandle {
            command_tx,
            snapshot_rx,
            shutdown_tx,
        }
    }

    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<WorkerCommand>,
        mut feedback_rx: mpsc::UnboundedReceiver<RunFeedback>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut housekeeping = interval(self.config.housekeeping_interval());
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Worker 控制循环启动，队列数: {}", self.queues.len());

        loop {
            let changed = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，Worker 控制循环退出");
                    break;
                }
                Some(command) = command_rx.recv() => match command {
                    WorkerCommand::Submit(run) => self.submit(*run, Utc::now()),
                    WorkerCommand::UpdateQueue(queue) => self.update_queue(queue),
                    WorkerCommand::ActiveRuns(reply) => {
                        let _ = reply.send(self.active_runs());
                        false
                    }
                },
                Some(feedback) = feedback_rx.recv() => self.complete(feedback, Utc::now()),
                _ = housekeeping.tick() => {
                    self.clean_terminated(Utc::now());
                    true
                }
            };

            if changed {
                self.check_run_list(Utc::now());
            }
        }
    }

    /// 清理、重算计数、启动空闲槽位上的运行、发布快照
    fn check_run_list(&mut self, now: DateTime<Utc>) {
        self.clean_terminated(now);
        self.recount();
        self.launch_pending(now);
        self.publish_snapshot(now);
    }

    fn update_queue(&mut self, queue: Queue) -> bool {
        if queue.id <= Queue::DIRECT_ID {
            debug!("忽略对直连队列的更新: {}", queue.id);
            return false;
        }

        if queue.is_deleted() {
            if self.queues.remove(&queue.id).is_some() {
                info!(queue_id = queue.id, "队列已删除");
            }
            return true;
        }

        match self.queues.get_mut(&queue.id) {
            Some(state) => {
                if state.definition.paused != queue.paused {
                    if queue.paused {
                        info!(queue_id = queue.id, name = %queue.name, "队列已暂停");
                    } else {
                        info!(queue_id = queue.id, name = %queue.name, "队列已恢复");
                    }
                }
                state.update_definition(queue);
            }
            None => {
                info!(queue_id = queue.id, name = %queue.name, slot = queue.slot, "新增队列");
                self.queues.insert(queue.id, QueueState::new(queue));
            }
        }
        true
    }

    fn submit(&mut self, mut run: PreparedRun, now: DateTime<Utc>) -> bool {
        if run.identity.is_empty() {
            warn!(taskflow_id = run.taskflow_id, "运行缺少去重键，已丢弃");
            return false;
        }

        if self
            .runs
            .iter()
            .any(|r| r.identity == run.identity && !r.state.is_terminal())
        {
            warn!(identity = %run.identity, "相同的运行尚未结束，忽略本次提交");
            return false;
        }

        if let Some(reason) = run.cannot_launch.clone() {
            warn!(
                taskflow_id = run.taskflow_id,
                identity = %run.identity,
                "任务流无法启动: {}",
                reason
            );
            self.next_seq += 1;
            run.seq = self.next_seq;
            run.state = RunState::Terminated;
            run.stopped_at = Some(now);
            self.forget_terminated(&run.identity);
            self.persist(&run);
            self.runs.push(run);
            return true;
        }

        if !self.queues.contains_key(&run.queue_id) {
            warn!(
                taskflow_id = run.taskflow_id,
                queue_id = run.queue_id,
                "队列不存在，已丢弃"
            );
            return false;
        }

        self.recount();
        if let Some(queue) = self.queues.get(&run.queue_id) {
            if queue.is_full() {
                warn!(
                    taskflow_id = run.taskflow_id,
                    queue_id = run.queue_id,
                    max_size = queue.definition.max_size,
                    "队列已满，已丢弃"
                );
                return false;
            }
        }

        self.next_seq += 1;
        run.seq = self.next_seq;
        run.state = RunState::New;
        self.forget_terminated(&run.identity);
        debug!(identity = %run.identity, seq = run.seq, "运行已入列");
        self.runs.push(run);
        true
    }

    fn active_runs(&self) -> usize {
        self.runs.iter().filter(|r| !r.state.is_terminal()).count()
    }

    fn forget_terminated(&mut self, identity: &str) {
        self.runs
            .retain(|r| !(r.state.is_terminal() && r.identity == identity));
    }

    /// 从运行列表重新计算各队列的处理中与等待数
    fn recount(&mut self) {
        for queue in self.queues.values_mut() {
            queue.reset_counts();
        }

        for run in self.runs.iter_mut() {
            if run.state.is_pending() && run.queue_id != Queue::DIRECT_ID {
                if !self.queues.contains_key(&run.queue_id) {
                    info!(
                        identity = %run.identity,
                        queue_id = run.queue_id,
                        "所在队列已删除，转为直接执行"
                    );
                    run.queue_id = Queue::DIRECT_ID;
                    run.queue_name = Queue::direct(0).name;
                    run.state = RunState::New;
                } else if run.state == RunState::New {
                    run.state = RunState::Queued;
                }
            }

            if let Some(queue) = self.queues.get_mut(&run.queue_id) {
                match run.state {
                    RunState::InProgress => queue.processing += 1,
                    RunState::Terminated => {}
                    RunState::New | RunState::Queued => queue.waiting += 1,
                }
            }
        }
    }

    fn launch_pending(&mut self, now: DateTime<Utc>) {
        for run in self.runs.iter_mut() {
            if !run.state.is_pending() {
                continue;
            }
            let Some(queue) = self.queues.get_mut(&run.queue_id) else {
                continue;
            };
            // TODO: honor Queue::no_exec_while once mutually exclusive queues are enforced
            if !queue.can_launch() {
                continue;
            }

            queue.processing += 1;
            queue.waiting -= 1;
            queue.launched += 1;
            run.state = RunState::InProgress;
            run.started_at = Some(now);

            info!(
                taskflow_id = run.taskflow_id,
                identity = %run.identity,
                queue_id = run.queue_id,
                "启动任务流"
            );
            spawn_execution(self.executor.clone(), self.feedback_tx.clone(), run.clone());
        }
    }

    fn complete(&mut self, feedback: RunFeedback, now: DateTime<Utc>) -> bool {
        let Some(run) = self.runs.iter_mut().find(|r| r.seq == feedback.seq) else {
            warn!(seq = feedback.seq, "收到未知运行的执行结果");
            return false;
        };
        if run.state.is_terminal() {
            return false;
        }

        run.state = RunState::Terminated;
        run.stopped_at = Some(now);
        run.result = feedback.outcome.result;
        run.result_message = feedback.outcome.transcript;

        if let Some(queue) = self.queues.get_mut(&run.queue_id) {
            queue.terminated += 1;
        }

        info!(
            taskflow_id = run.taskflow_id,
            identity = %run.identity,
            result = ?run.result,
            duration_ms = run.duration_ms(now).unwrap_or_default(),
            "运行结束"
        );

        let taskflow_id = run.taskflow_id;
        let outcome = run.outcome();
        self.save_outcome(taskflow_id, outcome);
        true
    }

    fn persist(&self, run: &PreparedRun) {
        self.save_outcome(run.taskflow_id, run.outcome());
    }

    /// 异步回写，失败只记录日志
    fn save_outcome(&self, taskflow_id: i64, outcome: RunOutcome) {
        let repository = self.repository.clone();
        tokio::spawn(async move {
            if let Err(e) = repository.save_run_outcome(taskflow_id, &outcome).await {
                error!(taskflow_id, "回写运行结果失败: {}", e);
            }
        });
    }

    fn clean_terminated(&mut self, now: DateTime<Utc>) {
        let retention = self.config.terminated_retention();
        self.runs.retain(|run| match (run.state, run.stopped_at) {
            (RunState::Terminated, Some(stopped)) => stopped + retention >= now,
            _ => true,
        });
    }

    fn publish_snapshot(&self, now: DateTime<Utc>) {
        let mut queues: Vec<_> = self.queues.values().map(QueueState::view).collect();
        queues.sort_by_key(|q| q.id);

        let mut runs: Vec<RunView> = self.runs.iter().map(|run| run_view(run, now)).collect();
        runs.sort_by(|a, b| a.label.cmp(&b.label));

        self.snapshot_tx.send_replace(WorkerSnapshot {
            queues,
            runs,
            taken_at: Some(now),
        });
    }
}

fn run_view(run: &PreparedRun, now: DateTime<Utc>) -> RunView {
    RunView {
        label: run.label(),
        taskflow_id: run.taskflow_id,
        taskflow_name: run.taskflow_name.clone(),
        identity: run.identity.clone(),
        launch_source: run.launch_source.clone(),
        reference: run.reference,
        queue_id: run.queue_id,
        queue_name: run.queue_name.clone(),
        state: run.state,
        started_at: run.started_at,
        stopped_at: run.stopped_at,
        duration_ms: run.duration_ms(now),
        result: run.result,
        result_message: run.result_message.clone(),
    }
}

fn spawn_execution(
    executor: Arc<FlowExecutor>,
    feedback_tx: mpsc::UnboundedSender<RunFeedback>,
    run: PreparedRun,
) {
    tokio::spawn(async move {
        let outcome = executor.execute(&run).await;
        if feedback_tx
            .send(RunFeedback {
                seq: run.seq,
                outcome,
            })
            .is_err()
        {
            warn!(identity = %run.identity, "Worker 已停止，丢弃执行结果");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_testing_utils::{
        AgentBuilder, MockAgentApi, MockEntityRepository, PreparedRunBuilder, QueueBuilder,
        TaskBuilder,
    };
    use std::time::Duration;

    fn service(queues: Vec<Queue>, agent: Arc<MockAgentApi>) -> WorkerService {
        let executor = Arc::new(FlowExecutor::new(agent, Duration::from_millis(5)));
        WorkerServiceBuilder::new(executor, Arc::new(MockEntityRepository::new()))
            .queues(queues)
            .build()
    }

    fn run(taskflow_id: i64, queue_id: i64) -> PreparedRun {
        PreparedRunBuilder::new(taskflow_id)
            .queue(queue_id)
            .step(TaskBuilder::command(1, "/bin/true").build(), AgentBuilder::new(1).build())
            .build()
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_ignored() {
        let mut worker = service(vec![QueueBuilder::new(5).slot(1).build()], Arc::default());
        let now = Utc::now();

        assert!(worker.submit(run(1, 5), now));
        assert!(!worker.submit(run(1, 5), now));
        assert_eq!(worker.runs.len(), 1);

        // 已终止的同键运行会被新的提交替换
        worker.runs[0].state = RunState::Terminated;
        worker.runs[0].stopped_at = Some(now);
        assert!(worker.submit(run(1, 5), now));
        assert_eq!(worker.runs.len(), 1);
        assert_eq!(worker.runs[0].state, RunState::New);
    }

    #[tokio::test]
    async fn test_queue_capacity_drops_excess() {
        let queue = QueueBuilder::new(5).slot(1).max_size(2).paused().build();
        let mut worker = service(vec![queue], Arc::default());
        let now = Utc::now();

        assert!(worker.submit(run(1, 5), now));
        assert!(worker.submit(run(2, 5), now));
        assert!(!worker.submit(run(3, 5), now));

        worker.check_run_list(now);
        let snapshot = worker.snapshot_tx.borrow().clone();
        let view = snapshot.queue(5).unwrap();
        assert_eq!(view.waiting, 2);
        assert_eq!(view.processing, 0);
        assert_eq!(view.launched, 0);
    }

    #[tokio::test]
    async fn test_unknown_queue_is_dropped() {
        let mut worker = service(vec![], Arc::default());
        assert!(!worker.submit(run(1, 42), Utc::now()));
        assert!(worker.runs.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_run_terminates_immediately() {
        let agent = Arc::new(MockAgentApi::new());
        let mut worker = service(vec![], agent.clone());
        let rejected = PreparedRunBuilder::new(7).reject("Empty taskflow").build();

        assert!(worker.submit(rejected, Utc::now()));
        assert_eq!(worker.runs[0].state, RunState::Terminated);
        assert_eq!(worker.runs[0].result_message, "Empty taskflow");
        assert!(agent.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_queue_detaches_waiting_runs() {
        let queue = QueueBuilder::new(5).slot(1).paused().build();
        let mut worker = service(vec![queue], Arc::default());
        let now = Utc::now();

        assert!(worker.submit(run(1, 5), now));
        worker.recount();
        assert_eq!(worker.runs[0].state, RunState::Queued);

        worker.update_queue(Queue::tombstone(5));
        worker.recount();
        assert_eq!(worker.runs[0].queue_id, Queue::DIRECT_ID);
        assert_eq!(worker.runs[0].state, RunState::New);
        assert_eq!(worker.queues[&Queue::DIRECT_ID].waiting, 1);
    }

    #[tokio::test]
    async fn test_direct_queue_cannot_be_replaced() {
        let mut worker = service(vec![], Arc::default());
        assert!(!worker.update_queue(QueueBuilder::new(0).slot(1).build()));
        assert!(!worker.update_queue(QueueBuilder::new(-3).slot(1).build()));
        assert_eq!(worker.queues[&Queue::DIRECT_ID].definition.slot, 1000);
    }

    #[tokio::test]
    async fn test_launch_respects_slot_and_fifo() {
        let agent = Arc::new(MockAgentApi::new());
        agent.hold("/bin/true");
        let mut worker = service(vec![QueueBuilder::new(5).slot(1).build()], agent);
        let now = Utc::now();

        assert!(worker.submit(run(1, 5), now));
        assert!(worker.submit(run(2, 5), now));
        worker.check_run_list(now);

        assert_eq!(worker.runs[0].state, RunState::InProgress);
        assert_eq!(worker.runs[1].state, RunState::Queued);
        let queue = &worker.queues[&5];
        assert_eq!(queue.processing, 1);
        assert_eq!(queue.waiting, 1);
        assert_eq!(queue.launched, 1);
    }

    #[tokio::test]
    async fn test_terminated_runs_expire_after_retention() {
        let mut worker = service(vec![], Arc::default());
        let now = Utc::now();
        let rejected = PreparedRunBuilder::new(7).reject("Empty taskflow").build();
        worker.submit(rejected, now);

        worker.clean_terminated(now + chrono::Duration::seconds(1));
        assert_eq!(worker.runs.len(), 1);
        worker.clean_terminated(now + chrono::Duration::seconds(3));
        assert!(worker.runs.is_empty());
    }
}
