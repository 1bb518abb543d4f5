use tracing::{error, info, warn};

use crate::statements::Statement;
use crate::store::Store;

/// Statement that undoes one forward write.
pub type Compensation = Statement;

#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error("{operation}: step '{step}' failed: {cause:#}")]
    WriteFailure {
        operation: &'static str,
        step: &'static str,
        cause: anyhow::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub attempted: usize,
    pub failed: usize,
}

/// Compensation log for one multi-write operation.
///
/// Owned by the request that runs the operation and discarded with it. A saga
/// dropped with pending compensations (an early return between steps) rolls
/// back on drop. Nothing is persisted: a crash mid-operation leaves whatever
/// was written.
pub struct Saga<'s, S: Store> {
    store: &'s S,
    operation: &'static str,
    compensations: Vec<(&'static str, Compensation)>,
}

impl<'s, S: Store> Saga<'s, S> {
    pub fn new(store: &'s S, operation: &'static str) -> Self {
        Self {
            store,
            operation,
            compensations: Vec::new(),
        }
    }

    pub fn record(&mut self, label: &'static str, compensation: Compensation) {
        self.compensations.push((label, compensation));
    }

    pub fn pending(&self) -> usize {
        self.compensations.len()
    }

    /// Runs one forward write. On success its compensation (if any) is
    /// recorded; on failure everything recorded so far is rolled back.
    pub fn step(
        &mut self,
        label: &'static str,
        forward: Statement,
        undo: Option<Compensation>,
    ) -> Result<usize, SagaError> {
        match self.store.execute(forward.query, &forward.args) {
            Ok(affected) => {
                if let Some(undo) = undo {
                    self.record(label, undo);
                }
                Ok(affected)
            }
            Err(cause) => {
                error!("{}: step '{}' failed: {:#}", self.operation, label, cause);
                self.rollback();
                Err(SagaError::WriteFailure {
                    operation: self.operation,
                    step: label,
                    cause,
                })
            }
        }
    }

    /// [`Self::step`] for a delete of one row. The undo re-inserts that row,
    /// so it is recorded only when the delete actually removed something; a
    /// row that was already gone is never resurrected by a rollback.
    pub fn step_removing(
        &mut self,
        label: &'static str,
        forward: Statement,
        undo: Compensation,
    ) -> Result<usize, SagaError> {
        let removed = self.step(label, forward, None)?;
        if removed > 0 {
            self.record(label, undo);
        }
        Ok(removed)
    }

    /// [`Self::step`] for a bulk write undone row by row, such as a delete
    /// restored from a snapshot taken before it.
    pub fn step_with<I>(&mut self, label: &'static str, forward: Statement, undos: I) -> Result<usize, SagaError>
    where
        I: IntoIterator<Item = Compensation>,
    {
        let affected = self.step(label, forward, None)?;
        for undo in undos {
            self.record(label, undo);
        }
        Ok(affected)
    }

    /// Replays compensations newest first. A failing compensation is logged
    /// and skipped; it never triggers further compensation.
    pub fn rollback(&mut self) -> RollbackReport {
        let mut report = RollbackReport::default();

        while let Some((label, undo)) = self.compensations.pop() {
            report.attempted += 1;
            if let Err(e) = self.store.execute(undo.query, &undo.args) {
                report.failed += 1;
                error!(
                    "{}: compensation for '{}' failed, continuing: {:#}",
                    self.operation, label, e
                );
            }
        }

        if report.attempted > 0 {
            warn!(
                "{}: rolled back {} step(s), {} compensation(s) failed",
                self.operation, report.attempted, report.failed
            );
        }
        report
    }

    /// Marks the operation as committed and forgets its compensations.
    pub fn complete(mut self) {
        info!("{}: committed {} step(s)", self.operation, self.compensations.len());
        self.compensations.clear();
    }
}

impl<S: Store> Drop for Saga<'_, S> {
    fn drop(&mut self) {
        if !self.compensations.is_empty() {
            warn!("{}: abandoned before completion, rolling back", self.operation);
            self.rollback();
        }
    }
}
