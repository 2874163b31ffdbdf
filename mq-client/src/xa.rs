//! `XaResource`: the transaction-manager-facing XA interface (spec ss6),
//! bridging a single `Session`'s transaction bookkeeping to
//! `xa_open/close/start/end/prepare/commit/rollback/recover/forget/complete`.
//! Grounded in `iMQConnectionShim.cpp`'s XA delegate, which drives the same
//! engine verbs against a thread-local current transaction id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use mq_protocol::{MqError, Result};

use crate::engine::TransactionScope;
use crate::session::Session;
use crate::xid::Xid;

pub const TMNOFLAGS: i32 = 0x0000_0000;
pub const TMONEPHASE: i32 = 0x4000_0000;
pub const TMFAIL: i32 = 0x2000_0000;
pub const TMRESUME: i32 = 0x0800_0000;
pub const TMSUCCESS: i32 = 0x0400_0000;
pub const TMSUSPEND: i32 = 0x0200_0000;
pub const TMSTARTRSCAN: i32 = 0x0100_0000;
pub const TMENDRSCAN: i32 = 0x0080_0000;
pub const TMJOIN: i32 = 0x0020_0000;

struct RecoverCursor {
    xids: Vec<Xid>,
    position: usize,
}

/// Bound to exactly one XA-enabled `Session`. Not `Sync` with itself across
/// transaction managers that drive different branches concurrently on the
/// same session — the underlying protocol allows only one in-flight
/// transaction per session at a time (spec ss4.6), same as the non-XA path.
pub struct XaResource {
    session: Arc<Session>,
    transactions: Mutex<HashMap<Xid, u64>>,
    recover_cursor: Mutex<Option<RecoverCursor>>,
    open: AtomicBool,
}

impl XaResource {
    pub fn new(session: Arc<Session>) -> Self {
        XaResource {
            session,
            transactions: Mutex::new(HashMap::new()),
            recover_cursor: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    pub fn xa_open(&self) -> Result<()> {
        self.session.set_xa(true);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn xa_close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.session.set_xa(false);
        Ok(())
    }

    /// Starts (or, under `TMJOIN`/`TMRESUME`, rejoins) the branch identified
    /// by `xid` and points the session's current transaction at it so
    /// ordinary `send`/`acknowledge`/`commit` calls issued while this
    /// resource holds the session land under the right transaction id.
    pub fn xa_start(&self, xid: Xid, flags: i32) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(MqError::NotXaConnection);
        }
        let transaction_id = if flags & (TMJOIN | TMRESUME) != 0 {
            *self
                .transactions
                .lock()
                .get(&xid)
                .ok_or(MqError::InvalidTransactionId)?
        } else {
            let id = self
                .session
                .engine()
                .start_transaction(&TransactionScope::Xa(xid.clone(), flags))?;
            self.transactions.lock().insert(xid.clone(), id);
            id
        };
        self.session.set_current_transaction_id(Some(transaction_id));
        Ok(())
    }

    pub fn xa_end(&self, xid: Xid, flags: i32) -> Result<()> {
        let transaction_id = self.lookup(&xid)?;
        self.session.engine().end_transaction(transaction_id, Some(&xid), flags)?;
        if flags & TMSUSPEND == 0 {
            self.session.set_current_transaction_id(None);
        }
        Ok(())
    }

    pub fn xa_prepare(&self, xid: Xid) -> Result<()> {
        let transaction_id = self.lookup(&xid)?;
        self.session.engine().prepare_transaction(transaction_id, Some(&xid))
    }

    pub fn xa_commit(&self, xid: Xid, one_phase: bool) -> Result<()> {
        let transaction_id = self.lookup(&xid)?;
        self.session
            .engine()
            .commit_transaction(transaction_id, Some(&xid), one_phase)?;
        self.transactions.lock().remove(&xid);
        Ok(())
    }

    pub fn xa_rollback(&self, xid: Xid) -> Result<()> {
        let transaction_id = self.lookup(&xid)?;
        self.session.engine().rollback_transaction(transaction_id, Some(&xid))?;
        self.transactions.lock().remove(&xid);
        Ok(())
    }

    pub fn xa_forget(&self, xid: Xid) -> Result<()> {
        self.transactions.lock().remove(&xid);
        Ok(())
    }

    pub fn xa_complete(&self) -> Result<()> {
        self.session.set_current_transaction_id(None);
        Ok(())
    }

    /// Honors `TMSTARTRSCAN`/`TMENDRSCAN`: a scan opens by fetching the
    /// broker's full in-doubt-xid list into a cursor and closes by dropping
    /// it; an unflagged call just drains whatever the cursor has left.
    pub fn xa_recover(&self, flags: i32) -> Result<Vec<Xid>> {
        let mut cursor = self.recover_cursor.lock();
        if flags & TMSTARTRSCAN != 0 || cursor.is_none() {
            let xids = self.session.engine().recover_transaction(flags)?;
            *cursor = Some(RecoverCursor { xids, position: 0 });
        }
        let batch = match cursor.as_mut() {
            Some(c) => {
                let batch = c.xids[c.position..].to_vec();
                c.position = c.xids.len();
                batch
            }
            None => Vec::new(),
        };
        if flags & TMENDRSCAN != 0 {
            *cursor = None;
        }
        Ok(batch)
    }

    fn lookup(&self, xid: &Xid) -> Result<u64> {
        self.transactions
            .lock()
            .get(xid)
            .copied()
            .ok_or(MqError::InvalidTransactionId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recover_scan_start_flag_replaces_cursor() {
        // xa_recover without a live session is only exercised at the
        // flag-arithmetic level here; engine-backed behavior is covered by
        // the connection integration tests.
        assert_eq!(TMSTARTRSCAN & TMENDRSCAN, 0);
        assert_ne!(TMJOIN, TMRESUME);
    }
}
