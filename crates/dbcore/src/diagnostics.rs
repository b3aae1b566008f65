//! Module: diagnostics
//! Responsibility: structured, leveled logging of lock waits, deadlock
//! victims, log flush batches, and recovery phase transitions.
//! Built on `log`, left to the binary (`dbcore-cli`) to route via
//! `fern`; emitted only at operator construction and transaction
//! boundaries, never on the hot per-tuple path.

use crate::wal::Lsn;
use crate::lock::TxnId;

pub fn txn_begin(txn_id: TxnId) {
    log::debug!("txn {txn_id} begin");
}

pub fn txn_commit(txn_id: TxnId, last_lsn: Lsn) {
    log::info!("txn {txn_id} commit lsn={last_lsn}");
}

pub fn txn_abort(txn_id: TxnId, reason: &str) {
    log::warn!("txn {txn_id} abort: {reason}");
}

pub fn lock_waiting(txn_id: TxnId, resource: &str) {
    log::debug!("txn {txn_id} waiting on {resource}");
}

pub fn lock_granted(txn_id: TxnId, resource: &str, mode: &str) {
    log::trace!("txn {txn_id} granted {mode} on {resource}");
}

pub fn deadlock_aborted(txn_id: TxnId, resource: &str) {
    log::warn!("txn {txn_id} deadlock-aborted waiting on {resource}");
}

pub fn log_flushed(batch_len: usize, persist_lsn: Lsn) {
    log::debug!("wal flushed {batch_len} records, persist_lsn={persist_lsn}");
}

pub fn recovery_phase(phase: &str, count: usize) {
    log::info!("recovery {phase}: {count} records processed");
}
