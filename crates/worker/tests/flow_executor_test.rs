use std::sync::Arc;
use std::time::Duration;

use scheduler_domain::{NextStep, RunResult};
use scheduler_testing_utils::{AgentBuilder, MockAgentApi, PreparedRunBuilder, TaskBuilder};
use scheduler_worker::FlowExecutor;

fn executor(agent: Arc<MockAgentApi>) -> FlowExecutor {
    FlowExecutor::new(agent, Duration::from_millis(1))
}

#[tokio::test]
async fn test_failed_step_exhausts_retries_and_stops_flow() {
    let agent = Arc::new(MockAgentApi::new());
    agent.script("/bin/extract", &[false, false]);

    let run = PreparedRunBuilder::new(1)
        .step_with(
            TaskBuilder::command(1, "/bin/extract").name("extract").build(),
            AgentBuilder::new(1).build(),
            NextStep::Sequential,
            NextStep::Fail,
            1,
        )
        .step(
            TaskBuilder::command(2, "/bin/load").name("load").build(),
            AgentBuilder::new(1).build(),
        )
        .build();

    let outcome = executor(agent.clone()).execute(&run).await;

    assert_eq!(outcome.result, RunResult::Fail);
    assert_eq!(agent.submit_count("/bin/extract"), 2);
    assert_eq!(agent.submit_count("/bin/load"), 0);
    assert_eq!(outcome.transcript.matches("Step 1 failed (attempt").count(), 2);
    assert!(outcome.transcript.contains("Start step 1 : extract"));
    assert!(outcome.transcript.contains("task fail : exit 1"));
    assert!(!outcome.transcript.contains("Start step 2"));
}

#[tokio::test]
async fn test_retry_recovers_then_continues() {
    let agent = Arc::new(MockAgentApi::new());
    agent.script("/bin/extract", &[false, true]);

    let run = PreparedRunBuilder::new(1)
        .step_with(
            TaskBuilder::command(1, "/bin/extract").build(),
            AgentBuilder::new(1).build(),
            NextStep::Sequential,
            NextStep::Fail,
            2,
        )
        .step(TaskBuilder::command(2, "/bin/load").build(), AgentBuilder::new(1).build())
        .build();

    let outcome = executor(agent.clone()).execute(&run).await;

    assert_eq!(outcome.result, RunResult::Ok);
    assert_eq!(agent.submit_count("/bin/extract"), 2);
    assert_eq!(agent.submit_count("/bin/load"), 1);
    assert!(outcome.transcript.contains("Step 1 terminated"));
    assert!(outcome.transcript.contains("Step 2 terminated"));
}

#[tokio::test]
async fn test_failure_branch_jumps_to_cleanup_step() {
    let agent = Arc::new(MockAgentApi::new());
    agent.script("/bin/extract", &[false]);

    // 1 失败 -> 3 (cleanup)，2 被跳过；最后一步顺序指针视为结束并成功
    let run = PreparedRunBuilder::new(1)
        .step_with(
            TaskBuilder::command(1, "/bin/extract").build(),
            AgentBuilder::new(1).build(),
            NextStep::Sequential,
            NextStep::Goto(3),
            0,
        )
        .step(TaskBuilder::command(2, "/bin/load").build(), AgentBuilder::new(1).build())
        .step(TaskBuilder::command(3, "/bin/cleanup").build(), AgentBuilder::new(1).build())
        .build();

    let outcome = executor(agent.clone()).execute(&run).await;

    assert_eq!(outcome.result, RunResult::Ok);
    assert_eq!(agent.submit_count("/bin/load"), 0);
    assert_eq!(agent.submit_count("/bin/cleanup"), 1);
}

#[tokio::test]
async fn test_out_of_range_pointer_fails_flow() {
    let agent = Arc::new(MockAgentApi::new());
    let run = PreparedRunBuilder::new(1)
        .step_with(
            TaskBuilder::command(1, "/bin/extract").build(),
            AgentBuilder::new(1).build(),
            NextStep::Goto(9),
            NextStep::Fail,
            0,
        )
        .build();

    let outcome = executor(agent).execute(&run).await;

    assert_eq!(outcome.result, RunResult::Fail);
    assert!(outcome.transcript.ends_with("Invalid next step 9"));
}

#[tokio::test]
async fn test_network_error_fails_step_without_retry() {
    let agent = Arc::new(MockAgentApi::new());
    agent.fail_next_submits(1);

    let run = PreparedRunBuilder::new(1)
        .step_with(
            TaskBuilder::command(1, "/bin/extract").build(),
            AgentBuilder::new(1).build(),
            NextStep::Sequential,
            NextStep::Fail,
            3,
        )
        .build();

    let outcome = executor(agent.clone()).execute(&run).await;

    assert_eq!(outcome.result, RunResult::Fail);
    assert!(agent.submissions().is_empty());
    assert!(outcome.transcript.contains("Step 1 error"));
}

#[tokio::test]
async fn test_named_args_reach_the_agent() {
    let agent = Arc::new(MockAgentApi::new());
    let run = PreparedRunBuilder::new(1)
        .named_arg("DAY", "20240315")
        .step(
            TaskBuilder::command(1, "/bin/export").args(&["--day", "<%DAY%>"]).build(),
            AgentBuilder::new(4).build(),
        )
        .build();

    executor(agent.clone()).execute(&run).await;

    let submitted = agent.submissions();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].agent_id, 4);
    match &submitted[0].request {
        scheduler_domain::AgentTaskRequest::Command { args, .. } => {
            assert_eq!(args, &vec!["--day".to_string(), "20240315".to_string()]);
        }
        other => panic!("unexpected request {other:?}"),
    }
}

#[tokio::test]
async fn test_task_unknown_to_agent_fails_step_without_retry() {
    let agent = Arc::new(MockAgentApi::new());
    agent.forget("/bin/extract");

    let run = PreparedRunBuilder::new(1)
        .step_with(
            TaskBuilder::command(1, "/bin/extract").build(),
            AgentBuilder::new(1).build(),
            NextStep::Sequential,
            NextStep::Fail,
            2,
        )
        .step(TaskBuilder::command(2, "/bin/load").build(), AgentBuilder::new(1).build())
        .build();

    let outcome = executor(agent.clone()).execute(&run).await;

    assert_eq!(outcome.result, RunResult::Fail);
    assert_eq!(agent.submit_count("/bin/extract"), 1);
    assert_eq!(agent.submit_count("/bin/load"), 0);
    assert!(outcome.transcript.contains("Step 1 error :"));
    assert!(outcome.transcript.contains("unknown id 1"));
}
