use super::*;
use crate::credentials::{Credentials, MemoryCredentialsStore};
use crate::input::{Field, RawTaskInput};
use crate::provider::ProviderSpec;
use crate::router::RouteTable;
use crate::session::Phase;
use crate::session::testing::{CallLog, ScriptedAdapter, Step, sample_input};
use tokio::sync::mpsc;

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        exit_poll_interval: Duration::from_millis(5),
        reminder_interval: Duration::from_secs(30),
        shutdown_grace: Duration::from_secs(2),
    }
}

fn registry(adapters: Vec<(ProviderSpec, ScriptedAdapter)>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (spec, adapter) in adapters {
        registry
            .register(spec, move |_spec| -> Box<dyn crate::provider::ProviderAdapter> {
                Box::new(adapter.clone())
            })
            .unwrap();
    }
    registry
}

fn store(keys: &[&str]) -> Box<dyn CredentialsStore> {
    let mut store = MemoryCredentialsStore::new();
    for key in keys {
        store.insert(*key, Credentials::new("user", "secret"));
    }
    Box::new(store)
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_missing_credentials_skips_provider() {
    let log = CallLog::default();
    let registry = registry(vec![
        (ProviderSpec::new("4Cyte"), ScriptedAdapter::new(log.clone())),
        (ProviderSpec::new("QScan"), ScriptedAdapter::new(log.clone())),
        (ProviderSpec::new("Meditrust"), ScriptedAdapter::new(log.clone())),
    ]);
    let orchestrator = Orchestrator::new(registry, store(&["4Cyte", "QScan"]), settings());
    let coordination = orchestrator.coordination();
    let router = OtpRouter::new(coordination.clone(), RouteTable::new())
        .with_poll_interval(Duration::from_millis(5));

    let run = tokio::spawn(async move {
        orchestrator
            .run(
                &names(&["4Cyte", "QScan", "Meditrust"]),
                (*sample_input()).clone(),
                router,
            )
            .await
    });

    wait_until(|| log.count("4Cyte:perform_task") == 1 && log.count("QScan:perform_task") == 1)
        .await;
    assert_eq!(log.count("cleanup"), 0);
    assert!(!run.is_finished());

    coordination.signal_exit();
    let summary = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.reports.len(), 2);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].provider, "Meditrust");
    assert_eq!(log.count("Meditrust:initialize"), 0);
    assert_eq!(log.count("cleanup"), 2);
    assert_eq!(summary.failures(), 0);
}

#[tokio::test]
async fn test_unknown_provider_and_missing_fields_are_skipped() {
    let log = CallLog::default();
    let registry = registry(vec![(
        ProviderSpec::new("PRODA").with_required_fields([Field::MedicareNumber]),
        ScriptedAdapter::new(log.clone()),
    )]);
    let orchestrator = Orchestrator::new(registry, store(&["PRODA"]), settings());
    let router = OtpRouter::new(orchestrator.coordination(), RouteTable::new());

    let input = RawTaskInput {
        family_name: Some("Citizen".into()),
        ..RawTaskInput::default()
    }
    .validate()
    .unwrap();
    let summary = orchestrator
        .run(&names(&["PRODA", "Nowhere"]), input, router)
        .await;

    assert!(summary.reports.is_empty());
    let skipped: Vec<&str> = summary.skipped.iter().map(|s| s.provider.as_str()).collect();
    assert_eq!(skipped, vec!["PRODA", "Nowhere"]);
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn test_run_returns_when_all_sessions_error() {
    let log = CallLog::default();
    let registry = registry(vec![
        (
            ProviderSpec::new("QScan"),
            ScriptedAdapter::new(log.clone()).with_step(Phase::Initialize, Step::Fail),
        ),
        (
            ProviderSpec::new("SNP"),
            ScriptedAdapter::new(log.clone()).with_step(Phase::Authenticate, Step::Fail),
        ),
    ]);
    let orchestrator = Orchestrator::new(registry, store(&["QScan", "SNP"]), settings());
    let coordination = orchestrator.coordination();
    let router = OtpRouter::new(coordination.clone(), RouteTable::new())
        .with_poll_interval(Duration::from_millis(5));

    let summary = tokio::time::timeout(
        Duration::from_secs(2),
        orchestrator.run(&names(&["QScan", "SNP"]), (*sample_input()).clone(), router),
    )
    .await
    .unwrap();

    assert_eq!(summary.failures(), 2);
    assert_eq!(log.count("cleanup"), 2);
    assert!(!coordination.is_exiting());
}

#[tokio::test]
async fn test_codes_routed_from_operator_input() {
    let log = CallLog::default();
    let registry = registry(vec![
        (
            ProviderSpec::new("PRODA").with_menu_digit(1),
            ScriptedAdapter::new(log.clone()).needing_code(),
        ),
        (
            ProviderSpec::new("QScript").with_menu_digit(2),
            ScriptedAdapter::new(log.clone()).needing_code(),
        ),
    ]);
    let table = RouteTable::from_specs(registry.specs());
    let orchestrator = Orchestrator::new(registry, store(&["PRODA", "QScript"]), settings());
    let coordination = orchestrator.coordination();
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let router = OtpRouter::new(coordination.clone(), table)
        .with_operator(line_rx)
        .with_poll_interval(Duration::from_millis(5));

    let run = tokio::spawn(async move {
        orchestrator
            .run(&names(&["PRODA", "QScript"]), (*sample_input()).clone(), router)
            .await
    });

    wait_until(|| coordination.active_requests().len() == 2).await;
    line_tx.send("2222222".into()).unwrap();
    line_tx.send("1111111".into()).unwrap();
    wait_until(|| log.count("PRODA:perform_task") == 1 && log.count("QScript:perform_task") == 1)
        .await;

    line_tx.send("x".into()).unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap();

    assert!(coordination.is_exiting());
    assert_eq!(summary.reports.len(), 2);
    assert_eq!(summary.failures(), 0);
    assert_eq!(log.count("PRODA:code:111111"), 1);
    assert_eq!(log.count("QScript:code:222222"), 1);
}

#[tokio::test]
async fn test_stuck_cleanup_is_aborted_after_grace() {
    let log = CallLog::default();
    let mut stuck = ScriptedAdapter::new(log.clone());
    stuck.cleanup_hangs = true;
    let registry = registry(vec![
        (ProviderSpec::new("Medway"), stuck),
        (ProviderSpec::new("QXR"), ScriptedAdapter::new(log.clone())),
    ]);
    let orchestrator = Orchestrator::new(
        registry,
        store(&["Medway", "QXR"]),
        OrchestratorSettings {
            shutdown_grace: Duration::from_millis(50),
            ..settings()
        },
    );
    let coordination = orchestrator.coordination();
    let router = OtpRouter::new(coordination.clone(), RouteTable::new())
        .with_poll_interval(Duration::from_millis(5));

    let run = tokio::spawn(async move {
        orchestrator
            .run(&names(&["Medway", "QXR"]), (*sample_input()).clone(), router)
            .await
    });

    wait_until(|| log.count("Medway:perform_task") == 1 && log.count("QXR:perform_task") == 1)
        .await;
    coordination.signal_exit();

    let summary = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap();
    let mut outcomes: Vec<(String, SessionOutcome)> = summary
        .reports
        .into_iter()
        .map(|r| (r.provider, r.outcome))
        .collect();
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        outcomes,
        vec![
            ("Medway".to_string(), SessionOutcome::Aborted),
            ("QXR".to_string(), SessionOutcome::Completed),
        ]
    );
}
