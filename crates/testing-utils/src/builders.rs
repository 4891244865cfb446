//! Test data builders for creating test entities
//!
//! 所有构造器都给出可直接使用的默认值，只需覆盖测试关心的字段。

use std::collections::BTreeMap;

use chrono::Utc;
use scheduler_domain::{
    identity_key, Agent, NextStep, PreparedRun, PreparedStep, Queue, RuleDefinition, RunOutcome,
    Schedule, Task, TaskFlow, TaskFlowStep, TaskKind, Trigger,
};

/// Builder for test Agent entities
pub struct AgentBuilder {
    agent: Agent,
}

impl AgentBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            agent: Agent {
                id,
                host: format!("http://agent-{id}.test:8080"),
                api_key: "test-key".to_string(),
                cert_signature: None,
                insecure: false,
                deleted: false,
            },
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.agent.host = host.to_string();
        self
    }

    pub fn api_key(mut self, api_key: &str) -> Self {
        self.agent.api_key = api_key.to_string();
        self
    }

    pub fn insecure(mut self) -> Self {
        self.agent.insecure = true;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.agent.deleted = true;
        self
    }

    pub fn build(self) -> Agent {
        self.agent
    }
}

/// Builder for test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn command(id: i64, cmd: &str) -> Self {
        Self::with_kind(
            id,
            TaskKind::Command {
                cmd: cmd.to_string(),
                args: Vec::new(),
                start_in: String::new(),
            },
        )
    }

    pub fn url_check(id: i64, url: &str) -> Self {
        Self::with_kind(
            id,
            TaskKind::UrlCheck {
                url: url.to_string(),
            },
        )
    }

    fn with_kind(id: i64, kind: TaskKind) -> Self {
        Self {
            task: Task {
                id,
                name: format!("task-{id}"),
                kind,
                timeout_ms: 60_000,
                log_store: String::new(),
                exec_on: vec![1],
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn args(mut self, new_args: &[&str]) -> Self {
        if let TaskKind::Command { args, .. } = &mut self.task.kind {
            *args = new_args.iter().map(|a| a.to_string()).collect();
        }
        self
    }

    pub fn exec_on(mut self, agents: Vec<i64>) -> Self {
        self.task.exec_on = agents;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Builder for test Queue entities
pub struct QueueBuilder {
    queue: Queue,
}

impl QueueBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            queue: Queue {
                id,
                name: format!("queue-{id}"),
                slot: 1,
                max_size: 0,
                max_duration: 0,
                paused: false,
                paused_since: None,
                no_exec_while: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.queue.name = name.to_string();
        self
    }

    pub fn slot(mut self, slot: i32) -> Self {
        self.queue.slot = slot;
        self
    }

    pub fn max_size(mut self, max_size: i32) -> Self {
        self.queue.max_size = max_size;
        self
    }

    pub fn paused(mut self) -> Self {
        self.queue.paused = true;
        self.queue.paused_since = Some(Utc::now());
        self
    }

    pub fn build(self) -> Queue {
        self.queue
    }
}

/// Builder for test TaskFlow entities，默认启用且允许手动触发
pub struct TaskFlowBuilder {
    flow: TaskFlow,
}

impl TaskFlowBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            flow: TaskFlow {
                id,
                name: format!("flow-{id}"),
                tags: Vec::new(),
                named_args: BTreeMap::new(),
                active: true,
                manual_launch: true,
                schedule_id: 0,
                error_management: 0,
                queue_id: 0,
                last_run: RunOutcome::default(),
                steps: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.flow.name = name.to_string();
        self
    }

    /// 追加一个默认指针的步骤：成功顺序执行，失败结束
    pub fn step(self, task_id: i64) -> Self {
        self.step_with(task_id, NextStep::Sequential, NextStep::Fail, 0)
    }

    pub fn step_with(
        mut self,
        task_id: i64,
        next_on_ok: NextStep,
        next_on_fail: NextStep,
        retry: u32,
    ) -> Self {
        let index = self.flow.steps.len() + 1;
        self.flow.steps.push(TaskFlowStep {
            index,
            task_id,
            next_on_ok,
            next_on_fail,
            retry,
        });
        self
    }

    pub fn queue(mut self, queue_id: i64) -> Self {
        self.flow.queue_id = queue_id;
        self
    }

    pub fn schedule(mut self, schedule_id: i64) -> Self {
        self.flow.schedule_id = schedule_id;
        self
    }

    pub fn manual_launch(mut self, allowed: bool) -> Self {
        self.flow.manual_launch = allowed;
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.flow.active = active;
        self
    }

    pub fn named_arg(mut self, name: &str, value: &str) -> Self {
        self.flow
            .named_args
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> TaskFlow {
        self.flow
    }
}

/// Builder for test Schedule entities
pub struct ScheduleBuilder {
    schedule: Schedule,
}

impl ScheduleBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            schedule: Schedule {
                id,
                name: format!("schedule-{id}"),
                time_zone: "UTC".to_string(),
                rules: Vec::new(),
            },
        }
    }

    pub fn time_zone(mut self, zone: &str) -> Self {
        self.schedule.time_zone = zone.to_string();
        self
    }

    pub fn rule(mut self, rule: RuleDefinition) -> Self {
        self.schedule.rules.push(rule);
        self
    }

    /// 每天固定时刻执行
    pub fn at(self, hours: &str) -> Self {
        self.rule(RuleDefinition {
            hours: hours.to_string(),
            ..RuleDefinition::default()
        })
    }

    /// 全天按秒间隔执行
    pub fn every(self, interval_secs: i64) -> Self {
        self.rule(RuleDefinition {
            interval: interval_secs,
            ..RuleDefinition::default()
        })
    }

    pub fn build(self) -> Schedule {
        self.schedule
    }
}

/// Builder for PreparedRun，绕过缓存直接组装步骤，供 Worker 测试使用
pub struct PreparedRunBuilder {
    run: PreparedRun,
}

impl PreparedRunBuilder {
    pub fn new(taskflow_id: i64) -> Self {
        let trigger = Trigger::Manual {
            actor: "tester".to_string(),
            requested_at: Utc::now().fixed_offset(),
        };
        let mut run = PreparedRun::new(taskflow_id, &format!("flow-{taskflow_id}"), &trigger);
        run.queue_name = Queue::direct(0).name;
        Self { run }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.run.taskflow_name = name.to_string();
        self
    }

    pub fn queue(mut self, queue_id: i64) -> Self {
        self.run.queue_id = queue_id;
        self.run.queue_name = format!("queue-{queue_id}");
        self
    }

    pub fn step(self, task: Task, agent: Agent) -> Self {
        self.step_with(task, agent, NextStep::Sequential, NextStep::Fail, 0)
    }

    pub fn step_with(
        mut self,
        task: Task,
        agent: Agent,
        next_on_ok: NextStep,
        next_on_fail: NextStep,
        retry: u32,
    ) -> Self {
        let index = self.run.steps.len() + 1;
        self.run.steps.push(PreparedStep {
            index,
            task,
            agent,
            next_on_ok,
            next_on_fail,
            retry,
        });
        self
    }

    /// 设置命名参数并重算去重键
    pub fn named_arg(mut self, name: &str, value: &str) -> Self {
        self.run
            .named_args
            .insert(name.to_string(), value.to_string());
        self.run.identity = identity_key(self.run.taskflow_id, &self.run.named_args);
        self
    }

    pub fn identity(mut self, identity: &str) -> Self {
        self.run.identity = identity.to_string();
        self
    }

    pub fn reject(mut self, reason: &str) -> Self {
        self.run.reject(reason);
        self
    }

    pub fn build(self) -> PreparedRun {
        self.run
    }
}
