use std::collections::BTreeMap;

use scheduler_domain::arguments::substitute_date_tags;
use scheduler_domain::{identity_key, PreparedRun, PreparedStep, Queue, TaskFlow, Trigger};
use tracing::debug;

use crate::cache::EntityCache;

/// 将任务流定义与触发上下文绑定为不可变的运行快照
///
/// 引用完整性按顺序检查：手动触发许可、队列、步骤非空、任务、Agent。
/// 任何一项失败都会得到一个带原因的拒绝运行，不会联系任何Agent。
pub struct TaskFlowPreparer<'a> {
    cache: &'a EntityCache,
}

impl<'a> TaskFlowPreparer<'a> {
    pub fn new(cache: &'a EntityCache) -> Self {
        Self { cache }
    }

    pub fn prepare(&self, taskflow: &TaskFlow, trigger: &Trigger) -> PreparedRun {
        let mut run = PreparedRun::new(taskflow.id, &taskflow.name, trigger);
        run.error_management = taskflow.error_management;
        run.queue_id = taskflow.queue_id;

        let reference = trigger.reference();
        run.named_args = taskflow
            .named_args
            .iter()
            .map(|(name, value)| (name.clone(), substitute_date_tags(value, &reference)))
            .collect::<BTreeMap<_, _>>();
        run.identity = identity_key(taskflow.id, &run.named_args);

        if let Err(reason) = self.resolve(taskflow, trigger, &mut run) {
            debug!(taskflow_id = taskflow.id, reason = %reason, "任务流无法启动");
            run.steps.clear();
            run.reject(reason);
        }
        run
    }

    fn resolve(
        &self,
        taskflow: &TaskFlow,
        trigger: &Trigger,
        run: &mut PreparedRun,
    ) -> Result<(), String> {
        if trigger.is_manual() && !taskflow.manual_launch {
            return Err("Manual launch is not allowed".to_string());
        }

        run.queue_name = if taskflow.queue_id > Queue::DIRECT_ID {
            self.cache
                .queue(taskflow.queue_id)
                .map(|queue| queue.name.clone())
                .ok_or_else(|| format!("Queue ID {} not found", taskflow.queue_id))?
        } else {
            Queue::direct(0).name
        };

        if taskflow.steps.is_empty() {
            return Err("Empty taskflow".to_string());
        }

        for step in &taskflow.steps {
            let task = self
                .cache
                .task(step.task_id)
                .ok_or_else(|| format!("Task ID {} not found", step.task_id))?;

            let agent = task
                .exec_on
                .iter()
                .filter_map(|id| self.cache.agent(*id))
                .find(|agent| !agent.deleted)
                .ok_or_else(|| format!("Task ID {} : agent not found", step.task_id))?;

            run.steps.push(PreparedStep {
                index: step.index,
                task: task.clone(),
                agent: agent.clone(),
                next_on_ok: step.next_on_ok,
                next_on_fail: step.next_on_fail,
                retry: step.retry,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use scheduler_domain::RunResult;
    use scheduler_testing_utils::{
        AgentBuilder, MockEntityRepository, QueueBuilder, TaskBuilder, TaskFlowBuilder,
    };

    async fn cache() -> EntityCache {
        let repository = MockEntityRepository::new()
            .with_agents(vec![
                AgentBuilder::new(1).deleted().build(),
                AgentBuilder::new(2).build(),
                AgentBuilder::new(3).build(),
            ])
            .with_tasks(vec![
                TaskBuilder::command(10, "/bin/a").exec_on(vec![9, 1, 2, 3]).build(),
                TaskBuilder::command(11, "/bin/b").exec_on(vec![1]).build(),
            ])
            .with_queues(vec![QueueBuilder::new(5).name("nightly").build()]);
        let mut cache = EntityCache::new();
        cache.refresh_all(&repository).await.unwrap();
        cache
    }

    fn manual() -> Trigger {
        Trigger::Manual {
            actor: "ops".to_string(),
            requested_at: DateTime::parse_from_rfc3339("2024-03-15T08:30:00+01:00").unwrap(),
        }
    }

    fn scheduled() -> Trigger {
        Trigger::Scheduled {
            schedule_id: 4,
            planned_at: DateTime::parse_from_rfc3339("2024-03-15T23:59:59+01:00").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_prepare_resolves_steps_and_first_live_agent() {
        let cache = cache().await;
        let flow = TaskFlowBuilder::new(1).queue(5).step(10).build();

        let run = TaskFlowPreparer::new(&cache).prepare(&flow, &scheduled());

        assert!(run.cannot_launch.is_none());
        assert_eq!(run.queue_name, "nightly");
        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].agent.id, 2);
        assert_eq!(run.launch_source, "Schedule ID 4");
    }

    #[tokio::test]
    async fn test_named_args_use_trigger_reference() {
        let cache = cache().await;
        let flow = TaskFlowBuilder::new(7)
            .step(10)
            .named_arg("DAY", "<%DT_YYYYMMDD%>")
            .named_arg("ENV", "prod")
            .build();

        let run = TaskFlowPreparer::new(&cache).prepare(&flow, &scheduled());

        assert_eq!(run.named_args["DAY"], "20240315");
        assert_eq!(run.identity, "TF7 [DAY=20240315] [ENV=prod]");
    }

    #[tokio::test]
    async fn test_rejections_follow_check_order() {
        let cache = cache().await;
        let preparer = TaskFlowPreparer::new(&cache);

        let cases = [
            (
                TaskFlowBuilder::new(1).manual_launch(false).queue(99).build(),
                manual(),
                "Manual launch is not allowed",
            ),
            (
                TaskFlowBuilder::new(1).queue(99).build(),
                manual(),
                "Queue ID 99 not found",
            ),
            (TaskFlowBuilder::new(1).build(), manual(), "Empty taskflow"),
            (
                TaskFlowBuilder::new(1).step(10).step(42).build(),
                scheduled(),
                "Task ID 42 not found",
            ),
            (
                TaskFlowBuilder::new(1).step(11).build(),
                scheduled(),
                "Task ID 11 : agent not found",
            ),
        ];

        for (flow, trigger, reason) in cases {
            let run = preparer.prepare(&flow, &trigger);
            assert_eq!(run.cannot_launch.as_deref(), Some(reason));
            assert_eq!(run.result, RunResult::Fail);
            assert!(run.steps.is_empty());
        }
    }

    #[tokio::test]
    async fn test_manual_launch_of_scheduled_only_flow_is_allowed_when_scheduled() {
        let cache = cache().await;
        let flow = TaskFlowBuilder::new(1).manual_launch(false).step(10).build();
        let run = TaskFlowPreparer::new(&cache).prepare(&flow, &scheduled());
        assert!(run.cannot_launch.is_none());
    }
}
