//! Mock implementations for the repository and agent traits
//!
//! 内存实现，测试可在运行过程中修改实体、编排 Agent 的执行结果。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use scheduler_domain::{
    Agent, AgentApi, AgentTaskRequest, AgentTaskStatus, EntityRepository, Queue, RunOutcome,
    Schedule, SchedulerError, SchedulerResult, Task, TaskFlow,
};

fn select<T: Clone>(items: &[T], id: Option<i64>, key: impl Fn(&T) -> i64) -> Vec<T> {
    items
        .iter()
        .filter(|item| id.is_none_or(|id| key(item) == id))
        .cloned()
        .collect()
}

fn upsert<T>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> i64) {
    let id = key(&item);
    match items.iter_mut().find(|existing| key(existing) == id) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

/// Mock implementation of EntityRepository for testing
#[derive(Default)]
pub struct MockEntityRepository {
    agents: Mutex<Vec<Agent>>,
    tasks: Mutex<Vec<Task>>,
    taskflows: Mutex<Vec<TaskFlow>>,
    queues: Mutex<Vec<Queue>>,
    schedules: Mutex<Vec<Schedule>>,
    outcomes: Mutex<Vec<(i64, RunOutcome)>>,
    fail_reads: AtomicBool,
    fail_saves: AtomicBool,
}

impl MockEntityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agents(self, agents: Vec<Agent>) -> Self {
        *self.agents.lock().unwrap() = agents;
        self
    }

    pub fn with_tasks(self, tasks: Vec<Task>) -> Self {
        *self.tasks.lock().unwrap() = tasks;
        self
    }

    pub fn with_taskflows(self, taskflows: Vec<TaskFlow>) -> Self {
        *self.taskflows.lock().unwrap() = taskflows;
        self
    }

    pub fn with_queues(self, queues: Vec<Queue>) -> Self {
        *self.queues.lock().unwrap() = queues;
        self
    }

    pub fn with_schedules(self, schedules: Vec<Schedule>) -> Self {
        *self.schedules.lock().unwrap() = schedules;
        self
    }

    pub fn upsert_taskflow(&self, taskflow: TaskFlow) {
        upsert(&mut self.taskflows.lock().unwrap(), taskflow, |t| t.id);
    }

    pub fn upsert_queue(&self, queue: Queue) {
        upsert(&mut self.queues.lock().unwrap(), queue, |q| q.id);
    }

    pub fn upsert_schedule(&self, schedule: Schedule) {
        upsert(&mut self.schedules.lock().unwrap(), schedule, |s| s.id);
    }

    pub fn remove_taskflow(&self, id: i64) {
        self.taskflows.lock().unwrap().retain(|t| t.id != id);
    }

    pub fn remove_queue(&self, id: i64) {
        self.queues.lock().unwrap().retain(|q| q.id != id);
    }

    pub fn remove_schedule(&self, id: i64) {
        self.schedules.lock().unwrap().retain(|s| s.id != id);
    }

    /// 所有读取操作返回仓储错误
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// 已回写的运行结果，按回写顺序
    pub fn saved_outcomes(&self) -> Vec<(i64, RunOutcome)> {
        self.outcomes.lock().unwrap().clone()
    }

    fn check_reads(&self) -> SchedulerResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SchedulerError::Repository("mock read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityRepository for MockEntityRepository {
    async fn list_agents(&self, id: Option<i64>) -> SchedulerResult<Vec<Agent>> {
        self.check_reads()?;
        Ok(select(&self.agents.lock().unwrap(), id, |a| a.id))
    }

    async fn list_tasks(&self, id: Option<i64>) -> SchedulerResult<Vec<Task>> {
        self.check_reads()?;
        Ok(select(&self.tasks.lock().unwrap(), id, |t| t.id))
    }

    async fn list_taskflows(&self, id: Option<i64>) -> SchedulerResult<Vec<TaskFlow>> {
        self.check_reads()?;
        Ok(select(&self.taskflows.lock().unwrap(), id, |t| t.id))
    }

    async fn list_queues(&self, id: Option<i64>) -> SchedulerResult<Vec<Queue>> {
        self.check_reads()?;
        Ok(select(&self.queues.lock().unwrap(), id, |q| q.id))
    }

    async fn list_schedules(&self, id: Option<i64>) -> SchedulerResult<Vec<Schedule>> {
        self.check_reads()?;
        Ok(select(&self.schedules.lock().unwrap(), id, |s| s.id))
    }

    async fn save_run_outcome(
        &self,
        taskflow_id: i64,
        outcome: &RunOutcome,
    ) -> SchedulerResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SchedulerError::Repository("mock save failure".to_string()));
        }
        self.outcomes
            .lock()
            .unwrap()
            .push((taskflow_id, outcome.clone()));
        Ok(())
    }
}

/// 一次提交记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTask {
    pub agent_id: i64,
    pub remote_id: i64,
    /// 命令或URL
    pub key: String,
    pub request: AgentTaskRequest,
}

#[derive(Default)]
struct AgentState {
    next_id: i64,
    scripted: HashMap<String, VecDeque<bool>>,
    held: HashSet<String>,
    forgotten: HashSet<String>,
    failing_submits: u32,
    remote: HashMap<i64, (String, bool)>,
    submissions: Vec<SubmittedTask>,
}

/// Mock implementation of AgentApi for testing
///
/// 默认所有任务在第一次轮询时成功结束。按命令（或URL）编排结果序列，
/// 被 `hold` 的命令在 `release` 之前一直处于运行中。
#[derive(Default)]
pub struct MockAgentApi {
    state: Mutex<AgentState>,
}

impl MockAgentApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_key(request: &AgentTaskRequest) -> String {
        match request {
            AgentTaskRequest::Command { cmd, .. } => cmd.clone(),
            AgentTaskRequest::UrlCheck { url, .. } => url.clone(),
        }
    }

    /// 为某个命令依次指定每次提交的结果，用完后恢复为成功
    pub fn script(&self, key: &str, results: &[bool]) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .insert(key.to_string(), results.iter().copied().collect());
    }

    pub fn hold(&self, key: &str) {
        self.state.lock().unwrap().held.insert(key.to_string());
    }

    pub fn release(&self, key: &str) {
        self.state.lock().unwrap().held.remove(key);
    }

    /// 接受该命令的提交，但轮询时 Agent 不再认识这个任务ID
    pub fn forget(&self, key: &str) {
        self.state.lock().unwrap().forgotten.insert(key.to_string());
    }

    /// 接下来的 n 次提交返回网络错误
    pub fn fail_next_submits(&self, n: u32) {
        self.state.lock().unwrap().failing_submits = n;
    }

    pub fn submissions(&self) -> Vec<SubmittedTask> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn submit_count(&self, key: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .submissions
            .iter()
            .filter(|s| s.key == key)
            .count()
    }
}

#[async_trait]
impl AgentApi for MockAgentApi {
    async fn submit(&self, agent: &Agent, request: &AgentTaskRequest) -> SchedulerResult<i64> {
        let mut state = self.state.lock().unwrap();
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(SchedulerError::Network(format!(
                "agent {} unreachable",
                agent.id
            )));
        }

        state.next_id += 1;
        let remote_id = state.next_id;
        let key = Self::request_key(request);
        let result = state
            .scripted
            .get_mut(&key)
            .and_then(|results| results.pop_front())
            .unwrap_or(true);

        state.remote.insert(remote_id, (key.clone(), result));
        state.submissions.push(SubmittedTask {
            agent_id: agent.id,
            remote_id,
            key,
            request: request.clone(),
        });
        Ok(remote_id)
    }

    async fn poll(&self, _agent: &Agent, remote_id: i64) -> SchedulerResult<AgentTaskStatus> {
        let state = self.state.lock().unwrap();
        let Some((key, result)) = state.remote.get(&remote_id) else {
            return Ok(AgentTaskStatus {
                id: remote_id,
                ..AgentTaskStatus::default()
            });
        };

        if state.forgotten.contains(key) {
            return Ok(AgentTaskStatus {
                id: remote_id,
                on_register: false,
                ..AgentTaskStatus::default()
            });
        }

        if state.held.contains(key) {
            return Ok(AgentTaskStatus {
                id: remote_id,
                on_register: true,
                ..AgentTaskStatus::default()
            });
        }

        Ok(AgentTaskStatus {
            id: remote_id,
            on_register: true,
            terminated: true,
            result: *result,
            result_info: if *result { "exit 0" } else { "exit 1" }.to_string(),
            duration_ms: 5,
            message: String::new(),
        })
    }
}
