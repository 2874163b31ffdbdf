//! The keep-alive ping thread (spec ss4.9). Grounded in `PingTimer.cpp`'s
//! monitor-driven wait loop, with the activity check the spec adds on top:
//! a tick that saw no read or write skips sending `PING` at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

/// Shared activity flag: the engine sets it on every successful read or
/// write; the ping timer clears it after each tick (spec ss4.9).
#[derive(Default)]
pub struct ActivityFlag(AtomicBool);

impl ActivityFlag {
    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Sends one unacked `PING`; implemented by `ProtocolEngine`.
pub trait Pinger: Send + Sync {
    fn ping(&self) -> mq_protocol::Result<()>;
}

struct ExitState {
    exit: bool,
}

pub struct PingTimer {
    exit_state: Arc<(Mutex<ExitState>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl PingTimer {
    pub fn start(
        interval: Duration,
        activity: Arc<ActivityFlag>,
        pinger: Arc<dyn Pinger>,
    ) -> Self {
        let exit_state = Arc::new((Mutex::new(ExitState { exit: false }), Condvar::new()));
        let thread_exit_state = exit_state.clone();

        let handle = std::thread::spawn(move || {
            let (lock, cvar) = &*thread_exit_state;
            let mut state = lock.lock();
            loop {
                let timed_out = cvar.wait_for(&mut state, interval).timed_out();
                if state.exit {
                    break;
                }
                if timed_out && activity.take() {
                    // Activity since the last tick: no ping needed this round.
                    continue;
                }
                if timed_out {
                    if let Err(e) = pinger.ping() {
                        warn!("ping send failed, leaving detection to the reader: {e}");
                    } else {
                        debug!("ping sent");
                    }
                }
            }
        });

        PingTimer {
            exit_state,
            handle: Some(handle),
        }
    }

    pub fn terminate(&mut self) {
        {
            let (lock, cvar) = &*self.exit_state;
            let mut state = lock.lock();
            state.exit = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PingTimer {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingPinger(AtomicUsize);

    impl Pinger for CountingPinger {
        fn ping(&self) -> mq_protocol::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn pings_after_idle_interval() {
        let activity = Arc::new(ActivityFlag::default());
        let pinger = Arc::new(CountingPinger(AtomicUsize::new(0)));
        let mut timer = PingTimer::start(Duration::from_millis(20), activity, pinger.clone());
        std::thread::sleep(Duration::from_millis(120));
        timer.terminate();
        assert!(pinger.0.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn activity_suppresses_a_tick() {
        let activity = Arc::new(ActivityFlag::default());
        let pinger = Arc::new(CountingPinger(AtomicUsize::new(0)));
        activity.mark();
        let mut timer = PingTimer::start(Duration::from_millis(200), activity.clone(), pinger.clone());
        std::thread::sleep(Duration::from_millis(260));
        timer.terminate();
        // The first tick saw marked activity and skipped sending.
        assert_eq!(pinger.0.load(Ordering::SeqCst), 0);
    }
}
