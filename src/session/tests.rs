use super::testing::{CallLog, ScriptedAdapter, Step, context};
use super::*;
use crate::coordination::CoordinationState;
use std::sync::Arc;

const POLL: Duration = Duration::from_millis(5);

fn session(
    provider: &str,
    coordination: &Arc<CoordinationState>,
    adapter: ScriptedAdapter,
) -> Session {
    Session::new(context(provider, coordination), Box::new(adapter)).with_exit_poll_interval(POLL)
}

async fn wait_for_state(rx: &mut watch::Receiver<SessionState>, target: SessionState) {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == target))
        .await
        .expect("timed out waiting for state")
        .expect("session dropped");
}

#[tokio::test]
async fn test_happy_path_with_routed_code() {
    let coordination = Arc::new(CoordinationState::default());
    let log = CallLog::default();
    let s = session(
        "QScript",
        &coordination,
        ScriptedAdapter::new(log.clone()).needing_code(),
    );
    let mut states = s.watch_state();
    let handle = tokio::spawn(s.run());

    tokio::time::timeout(Duration::from_secs(2), async {
        while !coordination.is_active("QScript") {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(coordination.deliver_code("QScript", "123456").is_delivered());

    wait_for_state(&mut states, SessionState::AwaitingExit).await;
    assert_eq!(log.count("cleanup"), 0);

    coordination.signal_exit();
    let report = handle.await.unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(
        log.entries(),
        vec![
            "QScript:initialize",
            "QScript:authenticate",
            "QScript:code:123456",
            "QScript:perform_task",
            "cleanup",
        ]
    );
    assert!(!coordination.is_active("QScript"));
}

#[tokio::test]
async fn test_task_failure_still_awaits_exit() {
    let coordination = Arc::new(CoordinationState::default());
    let log = CallLog::default();
    let s = session(
        "PRODA",
        &coordination,
        ScriptedAdapter::new(log.clone()).with_step(Phase::PerformTask, Step::Fail),
    );
    let mut states = s.watch_state();
    let handle = tokio::spawn(s.run());

    wait_for_state(&mut states, SessionState::AwaitingExit).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(log.count("cleanup"), 0);
    assert!(!handle.is_finished());

    coordination.signal_exit();
    let report = handle.await.unwrap();
    assert!(matches!(report.outcome, SessionOutcome::TaskFailed(_)));
    assert_eq!(log.count("cleanup"), 1);
    assert_eq!(*states.borrow(), SessionState::Closed);
}

#[tokio::test]
async fn test_initialize_failure_skips_later_phases() {
    let coordination = Arc::new(CoordinationState::default());
    let log = CallLog::default();
    let s = session(
        "4Cyte",
        &coordination,
        ScriptedAdapter::new(log.clone()).with_step(Phase::Initialize, Step::Fail),
    );
    let states = s.watch_state();

    let report = s.run().await;

    assert_eq!(
        report.outcome,
        SessionOutcome::Errored {
            phase: Phase::Initialize,
            message: "initialize failed".into(),
        }
    );
    assert_eq!(log.entries(), vec!["4Cyte:initialize", "cleanup"]);
    assert_eq!(*states.borrow(), SessionState::Closed);
    assert!(!coordination.is_exiting());
}

#[tokio::test]
async fn test_exit_while_waiting_for_code() {
    let coordination = Arc::new(CoordinationState::default());
    let log = CallLog::default();
    let s = session(
        "PRODA",
        &coordination,
        ScriptedAdapter::new(log.clone()).needing_code(),
    );
    let handle = tokio::spawn(s.run());

    tokio::time::timeout(Duration::from_secs(2), async {
        while !coordination.is_active("PRODA") {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    coordination.signal_exit();

    let report = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        report.outcome,
        SessionOutcome::Errored {
            phase: Phase::Authenticate,
            ..
        }
    ));
    assert!(!log.entries().iter().any(|e| e == "PRODA:perform_task"));
    assert_eq!(log.count("cleanup"), 1);
    assert!(!coordination.is_active("PRODA"));
}

#[tokio::test]
async fn test_authentication_failure_withdraws_request() {
    let coordination = Arc::new(CoordinationState::default());
    let log = CallLog::default();
    let mut adapter = ScriptedAdapter::new(log.clone()).needing_code();
    adapter.authenticate = Step::Fail;
    let s = session("QScript", &coordination, adapter);
    let handle = tokio::spawn(s.run());

    tokio::time::timeout(Duration::from_secs(2), async {
        while !coordination.is_active("QScript") {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    coordination.deliver_code("QScript", "654321");

    let report = handle.await.unwrap();
    assert!(matches!(
        report.outcome,
        SessionOutcome::Errored {
            phase: Phase::Authenticate,
            ..
        }
    ));
    assert!(coordination.active_requests().is_empty());
}

#[tokio::test]
async fn test_panic_in_task_is_contained() {
    let coordination = Arc::new(CoordinationState::default());
    let log = CallLog::default();
    let s = session(
        "QScan",
        &coordination,
        ScriptedAdapter::new(log.clone()).with_step(Phase::PerformTask, Step::Panic),
    );
    let mut states = s.watch_state();
    let handle = tokio::spawn(s.run());

    wait_for_state(&mut states, SessionState::AwaitingExit).await;
    coordination.signal_exit();

    let report = handle.await.unwrap();
    match report.outcome {
        SessionOutcome::TaskFailed(message) => assert!(message.contains("exploded")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(log.count("cleanup"), 1);
}

#[tokio::test]
async fn test_hanging_initialize_cancelled_by_exit() {
    let coordination = Arc::new(CoordinationState::default());
    let log = CallLog::default();
    let s = session(
        "Meditrust",
        &coordination,
        ScriptedAdapter::new(log.clone()).with_step(Phase::Initialize, Step::Hang),
    );
    let handle = tokio::spawn(s.run());

    tokio::time::sleep(Duration::from_millis(20)).await;
    coordination.signal_exit();

    let report = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        report.outcome,
        SessionOutcome::Errored {
            phase: Phase::Initialize,
            message: ProviderError::Cancelled.to_string(),
        }
    );
    assert_eq!(log.count("cleanup"), 1);
}

#[tokio::test]
async fn test_exit_during_task_counts_as_completed() {
    let coordination = Arc::new(CoordinationState::default());
    let log = CallLog::default();
    let s = session(
        "Meditrust",
        &coordination,
        ScriptedAdapter::new(log.clone()).with_step(Phase::PerformTask, Step::Hang),
    );
    let mut states = s.watch_state();
    let handle = tokio::spawn(s.run());

    wait_for_state(&mut states, SessionState::TaskRunning).await;
    coordination.signal_exit();

    let report = handle.await.unwrap();
    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(log.count("cleanup"), 1);
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn test_run_future_is_send() {
    let coordination = Arc::new(CoordinationState::default());
    let s = session("QXR", &coordination, ScriptedAdapter::default());
    let run = s.run();
    assert_send(&run);

    coordination.signal_exit();
    let report = tokio::spawn(run).await.unwrap();
    assert_eq!(report.provider, "QXR");
}

#[tokio::test]
async fn test_zero_intervals_still_reach_cleanup() {
    let coordination = Arc::new(CoordinationState::new(Duration::ZERO));
    let log = CallLog::default();
    let s = Session::new(
        context("QScript", &coordination),
        Box::new(ScriptedAdapter::new(log.clone()).needing_code()),
    )
    .with_exit_poll_interval(Duration::ZERO);
    let mut states = s.watch_state();
    let handle = tokio::spawn(s.run());

    tokio::time::timeout(Duration::from_secs(2), async {
        while !coordination.is_active("QScript") {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(coordination.deliver_code("QScript", "246810").is_delivered());

    wait_for_state(&mut states, SessionState::AwaitingExit).await;
    coordination.signal_exit();

    let report = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(log.count("QScript:code:246810"), 1);
    assert_eq!(log.count("cleanup"), 1);
}

#[tokio::test]
async fn test_one_time_code_prefers_totp_seed() {
    let coordination = Arc::new(CoordinationState::default());
    let seeded = SessionContext::new(
        "4Cyte",
        crate::credentials::Credentials::new("user", "secret")
            .with_totp_secret("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ"),
        super::testing::sample_input(),
        Arc::clone(&coordination),
    );

    let code = seeded.one_time_code().await.unwrap();
    assert_eq!(code.len(), 6);
    assert!(coordination.active_requests().is_empty());

    let routed = context("QScript", &coordination);
    let waiter = tokio::spawn(async move { routed.one_time_code().await });
    tokio::time::timeout(Duration::from_secs(2), async {
        while !coordination.is_active("QScript") {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(coordination.deliver_code("QScript", "975310").is_delivered());
    assert_eq!(waiter.await.unwrap().unwrap(), "975310");
    assert!(!coordination.is_active("QScript"));
}
