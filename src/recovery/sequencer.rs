//! Drives the steps through the state machine.

use super::report::{RecoveryFailure, RecoveryReport};
use super::session::Session;
use super::state::{RecoveryState, StateMachine};
use super::steps::{Step, recovery_steps};
use crate::error::{RescueError, Result};
use crate::interrupt;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::sync::atomic::AtomicBool;

pub struct Sequencer<'a> {
    session: Session<'a>,
    machine: StateMachine,
    steps: Vec<Box<dyn Step>>,
    cancel: &'a AtomicBool,
    stop_after: Option<RecoveryState>,
}

impl<'a> Sequencer<'a> {
    pub fn new(session: Session<'a>, cancel: &'a AtomicBool) -> Self {
        Self {
            session,
            machine: StateMachine::new(),
            steps: recovery_steps(),
            cancel,
            stop_after: None,
        }
    }

    /// End the run successfully once `state` is reached, keeping everything held
    pub fn stop_after(mut self, state: RecoveryState) -> Self {
        self.stop_after = Some(state);
        self
    }

    fn total_steps(&self) -> usize {
        match self.stop_after {
            Some(state) => self
                .steps
                .iter()
                .position(|step| step.target() == state)
                .map_or(self.steps.len(), |index| index + 1),
            None => self.steps.len(),
        }
    }

    /// Run every step in order.
    ///
    /// A failing step moves the machine to `Failed` and rolls back everything
    /// acquired so far before the failure is returned.
    pub fn run(mut self) -> std::result::Result<RecoveryReport, RecoveryFailure> {
        let started_at = Utc::now();
        let total = self.total_steps();
        let steps = std::mem::take(&mut self.steps);

        for (index, step) in steps.iter().enumerate() {
            self.session.console.step(index + 1, total, step.title());
            info!("step {}: {}", step.name(), step.title());

            if let Err(e) = self.execute(step.as_ref()) {
                return Err(self.abort(step.name(), e, started_at));
            }

            if self.stop_after == Some(step.target()) {
                info!("stopping after {}", step.target());
                let held = self.session.registry.disarm();
                return Ok(self.finish(started_at, held));
            }
        }
        Ok(self.finish(started_at, Vec::new()))
    }

    fn execute(&mut self, step: &dyn Step) -> Result<()> {
        interrupt::check(self.cancel)?;
        step.run(&mut self.session)?;
        self.machine.advance(step.target())
    }

    fn abort(mut self, step: &str, error: RescueError, started_at: DateTime<Utc>) -> RecoveryFailure {
        error!("step {} failed: {}", step, error);
        if let Err(e) = self.machine.fail() {
            warn!("{}", e);
        }

        let rollback = self.session.registry.rollback();
        for failure in rollback.failures() {
            self.session.console.warn(&format!(
                "could not release {}: {}",
                failure.resource,
                failure.error.as_deref().unwrap_or("unknown error")
            ));
        }

        RecoveryFailure {
            step: step.to_string(),
            message: error.to_string(),
            error,
            started_at,
            failed_at: Utc::now(),
            history: self.machine.history().to_vec(),
            rollback,
            journal: self.session.journal.clone(),
        }
    }

    fn finish(&self, started_at: DateTime<Utc>, held: Vec<crate::registry::Resource>) -> RecoveryReport {
        RecoveryReport {
            started_at,
            finished_at: Utc::now(),
            final_state: self.machine.current(),
            history: self.machine.history().to_vec(),
            context: self.session.context.clone(),
            journal: self.session.journal.clone(),
            held,
        }
    }
}
