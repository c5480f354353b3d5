//! Scripted adapter shared by session and orchestrator tests.

use crate::coordination::CoordinationState;
use crate::credentials::Credentials;
use crate::input::{RawTaskInput, TaskInput};
use crate::provider::{ProviderAdapter, ProviderError};
use crate::session::{Phase, SessionContext};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// What the scripted adapter does in one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    Succeed,
    Fail,
    Panic,
    /// Never completes on its own.
    Hang,
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }
}

#[derive(Clone, Default)]
pub struct ScriptedAdapter {
    pub initialize: Step,
    pub authenticate: Step,
    pub perform_task: Step,
    /// Whether authentication waits for a routed code.
    pub needs_code: bool,
    pub cleanup_hangs: bool,
    pub log: CallLog,
}

impl ScriptedAdapter {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn with_step(mut self, phase: Phase, step: Step) -> Self {
        match phase {
            Phase::Initialize => self.initialize = step,
            Phase::Authenticate => self.authenticate = step,
            Phase::PerformTask => self.perform_task = step,
        }
        self
    }

    pub fn needing_code(mut self) -> Self {
        self.needs_code = true;
        self
    }

    async fn play(&self, phase: Phase, step: Step) -> Result<(), ProviderError> {
        match step {
            Step::Succeed => Ok(()),
            Step::Fail => Err(ProviderError::failed(format!("{phase} failed"))),
            Step::Panic => panic!("{phase} exploded"),
            Step::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn initialize(&mut self, ctx: &SessionContext) -> Result<(), ProviderError> {
        self.log.push(format!("{}:initialize", ctx.provider()));
        self.play(Phase::Initialize, self.initialize).await
    }

    async fn authenticate(&mut self, ctx: &SessionContext) -> Result<(), ProviderError> {
        self.log.push(format!("{}:authenticate", ctx.provider()));
        if self.needs_code {
            let code = ctx.obtain_code().await?;
            self.log.push(format!("{}:code:{code}", ctx.provider()));
        }
        self.play(Phase::Authenticate, self.authenticate).await
    }

    async fn perform_task(&mut self, ctx: &SessionContext) -> Result<(), ProviderError> {
        self.log.push(format!("{}:perform_task", ctx.provider()));
        self.play(Phase::PerformTask, self.perform_task).await
    }

    async fn cleanup(&mut self) {
        self.log.push("cleanup");
        if self.cleanup_hangs {
            std::future::pending::<()>().await;
        }
    }
}

pub fn sample_input() -> Arc<TaskInput> {
    let raw = RawTaskInput {
        family_name: Some("Citizen".into()),
        given_name: Some("Jane".into()),
        dob: Some("01021980".into()),
        medicare_number: Some("2123456701".into()),
        sex: Some("F".into()),
    };
    Arc::new(raw.validate().unwrap())
}

pub fn context(provider: &str, coordination: &Arc<CoordinationState>) -> SessionContext {
    SessionContext::new(
        provider,
        Credentials::new("user", "secret"),
        sample_input(),
        Arc::clone(coordination),
    )
}
