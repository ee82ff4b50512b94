//! Single-transaction configuration database with an undo snapshot

use super::arena::ObjectArena;
use crate::domain::{JobNumber, ObjectId, TransactionId};

/// One mutation recorded under a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub txn: TransactionId,
    pub opcode: &'static str,
    pub object_id: ObjectId,
}

#[derive(Debug, Clone)]
struct OpenTransaction {
    id: TransactionId,
    job_number: JobNumber,
    snapshot: ObjectArena,
    created: Vec<ObjectId>,
    journal: Vec<JournalEntry>,
}

/// A transaction that reached the durable store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransaction {
    pub id: TransactionId,
    pub job_number: JobNumber,
    pub entries: Vec<JournalEntry>,
}

/// Transaction bookkeeping. Mutations are applied to the arena as they
/// arrive; abort restores the snapshot taken at start.
#[derive(Debug, Default)]
pub struct TransactionLog {
    open: Option<OpenTransaction>,
    next_id: u64,
    starts: Vec<JobNumber>,
    committed: Vec<CommittedTransaction>,
    aborted: Vec<TransactionId>,
}

impl TransactionLog {
    pub fn start(&mut self, job_number: JobNumber, arena: &ObjectArena) -> Result<TransactionId, String> {
        if let Some(open) = &self.open {
            return Err(format!(
                "{} already open for job {}",
                open.id, open.job_number
            ));
        }
        self.next_id += 1;
        let id = TransactionId(self.next_id);
        self.starts.push(job_number);
        self.open = Some(OpenTransaction {
            id,
            job_number,
            snapshot: arena.clone(),
            created: Vec::new(),
            journal: Vec::new(),
        });
        Ok(id)
    }

    /// Check that `txn` is the open transaction
    pub fn check(&self, txn: TransactionId) -> Result<(), String> {
        match &self.open {
            Some(open) if open.id == txn => Ok(()),
            Some(open) => Err(format!("{} is not the open transaction ({})", txn, open.id)),
            None => Err(format!("{} is not open", txn)),
        }
    }

    pub fn record(&mut self, txn: TransactionId, opcode: &'static str, object_id: ObjectId) {
        if let Some(open) = self.open.as_mut().filter(|o| o.id == txn) {
            open.journal.push(JournalEntry {
                txn,
                opcode,
                object_id,
            });
        }
    }

    pub fn record_created(&mut self, txn: TransactionId, object_id: ObjectId) {
        if let Some(open) = self.open.as_mut().filter(|o| o.id == txn) {
            open.created.push(object_id);
        }
    }

    /// Make the open transaction durable; returns the objects it created
    pub fn commit(&mut self, txn: TransactionId) -> Result<Vec<ObjectId>, String> {
        self.check(txn)?;
        let open = self.open.take().ok_or_else(|| format!("{} is not open", txn))?;
        self.committed.push(CommittedTransaction {
            id: open.id,
            job_number: open.job_number,
            entries: open.journal,
        });
        Ok(open.created)
    }

    /// Drop the open transaction and hand back the pre-transaction arena
    pub fn abort(&mut self, txn: TransactionId) -> Result<ObjectArena, String> {
        self.check(txn)?;
        let open = self.open.take().ok_or_else(|| format!("{} is not open", txn))?;
        self.aborted.push(open.id);
        Ok(open.snapshot)
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Journal of the still-open transaction
    pub fn pending(&self) -> Vec<JournalEntry> {
        self.open
            .as_ref()
            .map(|o| o.journal.clone())
            .unwrap_or_default()
    }

    pub fn starts(&self) -> &[JobNumber] {
        &self.starts
    }

    pub fn committed(&self) -> &[CommittedTransaction] {
        &self.committed
    }

    pub fn aborted(&self) -> &[TransactionId] {
        &self.aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_open_transaction() {
        let arena = ObjectArena::new();
        let mut log = TransactionLog::default();

        let txn = log.start(JobNumber(1), &arena).unwrap();
        assert!(log.start(JobNumber(2), &arena).is_err());
        log.record(txn, "destroy_object", ObjectId(0x100));
        log.commit(txn).unwrap();

        assert!(!log.is_open());
        assert_eq!(log.committed()[0].entries.len(), 1);
        assert_eq!(log.starts(), &[JobNumber(1)]);
    }

    #[test]
    fn test_abort_returns_snapshot_and_rejects_stale_id() {
        let arena = ObjectArena::new();
        let mut log = TransactionLog::default();

        let txn = log.start(JobNumber(1), &arena).unwrap();
        assert!(log.check(TransactionId(99)).is_err());
        log.abort(txn).unwrap();
        assert!(log.abort(txn).is_err());
        assert_eq!(log.aborted(), &[txn]);
    }
}
