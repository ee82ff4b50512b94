//! Per-job transaction coordinator
//!
//! Holds the job's single transaction handle and enforces its life cycle:
//! None -> Open -> Committed | Aborted. A second start, a commit or abort
//! without an open handle, and a second resolution are refused locally
//! without reaching the database.

use crate::domain::{JobNumber, TransactionId};
use crate::error::{Error, Result};
use crate::graph::GraphClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    None,
    Open,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHandle {
    pub id: TransactionId,
    pub state: TransactionState,
}

pub struct TransactionCoordinator {
    graph: GraphClient,
    job_number: JobNumber,
    handle: Option<TransactionHandle>,
}

impl TransactionCoordinator {
    pub fn new(graph: GraphClient, job_number: JobNumber) -> Self {
        Self {
            graph,
            job_number,
            handle: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.handle
            .map(|h| h.state)
            .unwrap_or(TransactionState::None)
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransactionState::Open
    }

    pub fn id(&self) -> Option<TransactionId> {
        self.handle.map(|h| h.id)
    }

    /// Id of the open transaction; staging a mutation without one is a bug
    /// in the calling operation
    pub fn open_id(&self) -> Result<TransactionId> {
        match self.handle {
            Some(TransactionHandle {
                id,
                state: TransactionState::Open,
            }) => Ok(id),
            _ => Err(Error::Internal(format!(
                "job {} has no open transaction",
                self.job_number
            ))),
        }
    }

    pub async fn start(&mut self) -> Result<TransactionId> {
        if let Some(handle) = self.handle {
            return Err(self.refused("start", format!("already holds {}", handle.id)));
        }
        let id = self
            .graph
            .start_transaction(self.job_number)
            .await
            .map_err(|err| self.refused("start", err.to_string()))?;
        self.handle = Some(TransactionHandle {
            id,
            state: TransactionState::Open,
        });
        info!(job_number = %self.job_number, txn = %id, "Transaction started");
        Ok(id)
    }

    /// Commit the open transaction. On failure the handle stays open so the
    /// caller can still abort.
    pub async fn commit(&mut self) -> Result<()> {
        let id = self
            .open_id()
            .map_err(|err| self.refused("commit", err.to_string()))?;
        self.graph
            .commit_transaction(id)
            .await
            .map_err(|err| self.refused("commit", err.to_string()))?;
        self.set_state(TransactionState::Committed);
        info!(job_number = %self.job_number, txn = %id, "Transaction committed");
        Ok(())
    }

    /// Abort the open transaction. The handle is resolved even when the
    /// request fails, so abort is never sent twice.
    pub async fn abort(&mut self) -> Result<()> {
        let id = self
            .open_id()
            .map_err(|err| self.refused("abort", err.to_string()))?;
        self.set_state(TransactionState::Aborted);
        match self.graph.abort_transaction(id).await {
            Ok(()) => {
                debug!(job_number = %self.job_number, txn = %id, "Transaction aborted");
                Ok(())
            }
            Err(err) => {
                warn!(job_number = %self.job_number, txn = %id, "Transaction abort failed: {}", err);
                Err(self.refused("abort", err.to_string()))
            }
        }
    }

    fn set_state(&mut self, state: TransactionState) {
        if let Some(handle) = self.handle.as_mut() {
            handle.state = state;
        }
    }

    fn refused(&self, operation: &'static str, reason: String) -> Error {
        Error::Transaction {
            operation,
            job_number: self.job_number,
            reason,
        }
    }
}
