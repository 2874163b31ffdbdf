//! Connection-wide and per-producer flow control (spec ss4.8). Grounded in
//! `FlowControl.cpp`/`.hpp`: the broker paces delivery to the client and
//! the client paces sends to the broker, both by an explicit credit
//! exchange over `RESUME_FLOW`.

use parking_lot::{Condvar, Mutex};

use mq_protocol::{MqError, Result};

use crate::config::ConnectionConfig;

/// Connection-wide inbound flow control: tracks how many delivered-but-
/// unprocessed messages are outstanding and asks the broker to resume when
/// it falls back under the water mark.
pub struct FlowController {
    limit_enabled: bool,
    water_mark: i32,
    chunk_count: i32,
    state: Mutex<FlowState>,
}

struct FlowState {
    undelivered_count: i32,
    resume_requested: bool,
}

/// Callback the controller uses to actually emit `RESUME_FLOW`; kept
/// decoupled from `ProtocolEngine` so this module has no write-side
/// dependency of its own.
pub trait ResumeFlowSender: Send + Sync {
    fn send_resume_flow(&self, chunk_count: i32) -> Result<()>;
}

impl FlowController {
    pub fn new(config: &ConnectionConfig) -> Self {
        FlowController {
            limit_enabled: config.connection_flow_limit_enabled,
            water_mark: config.connection_flow_limit,
            chunk_count: config.connection_flow_count,
            state: Mutex::new(FlowState {
                undelivered_count: 0,
                resume_requested: false,
            }),
        }
    }

    pub fn message_arrived(&self, sender: &dyn ResumeFlowSender) {
        let mut state = self.state.lock();
        state.undelivered_count += 1;
        self.try_resume(&mut state, sender);
    }

    pub fn message_delivered(&self, sender: &dyn ResumeFlowSender) {
        let mut state = self.state.lock();
        state.undelivered_count -= 1;
        self.try_resume(&mut state, sender);
    }

    /// Called when an inbound packet carries the `FlowPaused` flag (spec
    /// ss4.8).
    pub fn flow_paused_signalled(&self, sender: &dyn ResumeFlowSender) {
        let mut state = self.state.lock();
        state.resume_requested = true;
        self.try_resume(&mut state, sender);
    }

    fn try_resume(&self, state: &mut FlowState, sender: &dyn ResumeFlowSender) {
        let should_resume =
            !self.limit_enabled || state.undelivered_count < self.water_mark;
        if !should_resume {
            return;
        }
        if sender.send_resume_flow(self.chunk_count).is_ok() {
            state.resume_requested = false;
        }
    }
}

/// Per-producer credit, replenished by `RESUME_FLOW` frames carrying the
/// producer id (spec ss4.8, ss8 scenario 6).
pub struct ProducerFlow {
    state: Mutex<ProducerFlowState>,
    credit_available: Condvar,
}

struct ProducerFlowState {
    chunk_size: i32,
    chunk_bytes: i32,
    closed: Option<MqError>,
}

impl ProducerFlow {
    pub fn new(chunk_size: i32, chunk_bytes: i32) -> Self {
        ProducerFlow {
            state: Mutex::new(ProducerFlowState {
                chunk_size,
                chunk_bytes,
                closed: None,
            }),
            credit_available: Condvar::new(),
        }
    }

    /// Blocks until credit for one message of `message_len` bytes is
    /// available, then consumes it. Negative `chunk_size`/`chunk_bytes`
    /// disables that dimension of flow control (spec ss4.8).
    pub fn check_flow_control(&self, message_len: i32) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if let Some(err) = &state.closed {
                return Err(err.clone());
            }
            let unlimited = state.chunk_size < 0 && state.chunk_bytes < 0;
            if unlimited {
                return Ok(());
            }
            let size_ok = state.chunk_size < 0 || state.chunk_size > 0;
            let bytes_ok = state.chunk_bytes < 0 || state.chunk_bytes >= message_len;
            if size_ok && bytes_ok {
                if state.chunk_size > 0 {
                    state.chunk_size -= 1;
                }
                if state.chunk_bytes > 0 {
                    state.chunk_bytes -= message_len;
                }
                return Ok(());
            }
            self.credit_available.wait(&mut state);
        }
    }

    /// Handler for an inbound `RESUME_FLOW` carrying this producer's id:
    /// replenishes credit and wakes blocked senders (spec ss4.8).
    pub fn resume_flow(&self, bytes: i32, size: i32) {
        let mut state = self.state.lock();
        state.chunk_size = size;
        state.chunk_bytes = bytes;
        self.credit_available.notify_all();
    }

    /// Wakes every blocked sender with `reason`, e.g. `ProducerClosed` (spec
    /// ss8 scenario 6).
    pub fn close(&self, reason: MqError) {
        let mut state = self.state.lock();
        state.closed = Some(reason);
        self.credit_available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    struct CountingSender(AtomicUsize);

    impl ResumeFlowSender for CountingSender {
        fn send_resume_flow(&self, _chunk_count: i32) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn connection_flow_sends_resume_when_limit_disabled() {
        let cfg = ConnectionConfig::new("localhost", 7676);
        let controller = FlowController::new(&cfg);
        let sender = CountingSender(AtomicUsize::new(0));
        controller.message_arrived(&sender);
        assert_eq!(sender.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connection_flow_withholds_resume_above_water_mark() {
        let mut cfg = ConnectionConfig::new("localhost", 7676);
        cfg.connection_flow_limit_enabled = true;
        cfg.connection_flow_limit = 2;
        let controller = FlowController::new(&cfg);
        let sender = CountingSender(AtomicUsize::new(0));
        controller.message_arrived(&sender); // count=1, resumes (1<2)
        controller.message_arrived(&sender); // count=2, withheld (2<2 false)
        assert_eq!(sender.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn producer_flow_blocks_then_unblocks_on_resume() {
        let flow = Arc::new(ProducerFlow::new(1, -1));
        flow.check_flow_control(10).unwrap(); // consumes the one credit

        let flow2 = flow.clone();
        let handle = thread::spawn(move || flow2.check_flow_control(10));

        thread::sleep(Duration::from_millis(50));
        flow.resume_flow(-1, 2);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn producer_flow_close_wakes_blocked_sender_with_error() {
        let flow = Arc::new(ProducerFlow::new(0, -1));
        let flow2 = flow.clone();
        let handle = thread::spawn(move || flow2.check_flow_control(10));
        thread::sleep(Duration::from_millis(50));
        flow.close(MqError::ProducerClosed);
        assert_eq!(handle.join().unwrap(), Err(MqError::ProducerClosed));
    }
}
