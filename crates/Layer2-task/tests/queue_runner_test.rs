//! 큐 + 러너 조합 테스트 - 대화별 직렬 실행
//!
//! 디스패처가 실제로 조합하는 방식 그대로: 같은 대화의 명령어는
//! 제출 순서대로, 다른 대화와는 완전히 병렬로 실행됩니다.

use std::time::Duration;
use valet_foundation::{AgentProfile, RunTrace, TraceStatus};
use valet_task::{ChatKey, ChatQueue, RunnerConfig, TaskRunner, TaskStatus};

fn test_profile() -> AgentProfile {
    AgentProfile::new("test-agent", ".").with_commands(["echo", "sleep"])
}

#[tokio::test]
async fn test_same_chat_runs_commands_in_submission_order() {
    let queue = ChatQueue::new();
    let runner = TaskRunner::new(RunnerConfig::new(Duration::from_secs(5), 4_096));
    let profile = test_profile();
    let chat = ChatKey::new(100.0).unwrap();

    let slow_runner = runner.clone();
    let slow_profile = profile.clone();
    let slow = queue
        .enqueue(chat, move || async move {
            // sleep은 echo보다 확실히 오래 걸린다
            let handle = slow_runner.start(&slow_profile, "sleep 0.2").await?;
            handle.wait().await
        })
        .await;

    let fast_runner = runner.clone();
    let fast_profile = profile.clone();
    let fast = queue
        .enqueue(chat, move || async move {
            let handle = fast_runner.start(&fast_profile, "echo second").await?;
            handle.wait().await
        })
        .await;

    assert_eq!(queue.depth(chat).await, 2);

    let slow = slow.wait().await.unwrap();
    let fast = fast.wait().await.unwrap();

    let slow_result = slow.value.unwrap();
    let fast_result = fast.value.unwrap();
    assert_eq!(slow_result.task.status, TaskStatus::Completed);
    assert_eq!(fast_result.task.status, TaskStatus::Completed);

    // 두 번째 명령어는 첫 번째가 끝난 뒤에야 시작된다
    assert!(fast_result.task.started_at >= slow_result.finished_at);
    assert!(fast.wait_ms >= slow.wait_ms);

    assert_eq!(queue.depth(chat).await, 0);
    assert!(queue.snapshot(10).await.is_empty());
}

#[tokio::test]
async fn test_trace_brackets_a_queued_run() {
    let queue = ChatQueue::new();
    let runner = TaskRunner::new(RunnerConfig::new(Duration::from_secs(5), 4_096));
    let profile = test_profile();
    let chat = ChatKey::new(7.0).unwrap();

    let trace = RunTrace::start(chat.get(), "run_command", "test").with_user(42);

    let run_runner = runner.clone();
    let run_profile = profile.clone();
    let pending = queue
        .enqueue(chat, move || async move {
            let handle = run_runner.start(&run_profile, "echo traced").await?;
            handle.wait().await
        })
        .await;

    let settled = pending.wait().await.unwrap();
    let result = settled.value.unwrap();

    let record = if result.is_success() {
        trace.finish(TraceStatus::Success)
    } else {
        trace.finish_with_error(TraceStatus::Failure, result.stderr.clone())
    };

    assert_eq!(record.chat, 7);
    assert_eq!(record.user, Some(42));
    assert_eq!(record.status, TraceStatus::Success);
    assert!(record.error.is_none());
    assert!(result.stdout.contains("traced"));
}
