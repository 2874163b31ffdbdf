//! The thread-safe FIFO queues used throughout the runtime (spec ss3,
//! ss4.6, ss4.7): one per sync consumer, one per async session, and one per
//! in-flight ack-id waiting on a reply. Grounded in `ReceiveQueue.cpp`'s
//! monitor-guarded deque.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use mq_protocol::Packet;

/// `None` represents the close sentinel pushed by `close()`.
type Slot = Option<Packet>;

struct Inner {
    queue: VecDeque<Slot>,
    is_closed: bool,
    is_stopped: bool,
    receive_in_progress: bool,
    /// Threads currently blocked inside `dequeue_wait`.
    waiters: usize,
}

/// A thread-safe FIFO of packets, matching `ReceiveQueue` (spec ss3).
pub struct ReceiveQueue {
    state: Mutex<Inner>,
    not_empty: Condvar,
    drained: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    NoWait,
    Wait(Duration),
    Forever,
}

impl ReceiveQueue {
    pub fn new() -> Self {
        ReceiveQueue {
            state: Mutex::new(Inner {
                queue: VecDeque::new(),
                is_closed: false,
                is_stopped: false,
                receive_in_progress: false,
                waiters: 0,
            }),
            not_empty: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    /// Starts the session/consumer accepting delivery. A no-op if already
    /// started.
    pub fn start(&self) {
        let mut state = self.state.lock();
        state.is_stopped = false;
        self.not_empty.notify_all();
    }

    /// Stops delivery, waiting for any in-flight `receive_in_progress` to
    /// clear before returning (spec ss4.7).
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.is_stopped = true;
        while state.receive_in_progress {
            self.drained.wait(&mut state);
        }
    }

    pub fn enqueue(&self, packet: Packet) {
        let mut state = self.state.lock();
        state.queue.push_back(Some(packet));
        self.not_empty.notify_one();
    }

    /// Wakes every waiter and marks the queue closed; further `dequeue_wait`
    /// calls return `None` immediately. Enqueuing the sentinel itself is
    /// still permitted after close (spec ss3).
    pub fn close(&self, wait: bool) {
        {
            let mut state = self.state.lock();
            state.is_closed = true;
            state.is_stopped = false;
            state.queue.push_back(None);
            self.not_empty.notify_all();
        }
        if wait {
            let mut state = self.state.lock();
            while state.waiters > 0 {
                self.drained.wait(&mut state);
            }
        }
    }

    /// Blocks until a packet is available, the queue closes, or `timeout`
    /// elapses. Returns `None` on close or timeout (spec ss3, ss4.7).
    pub fn dequeue_wait(&self, timeout: Timeout) -> Option<Packet> {
        let mut state = self.state.lock();
        if state.is_closed {
            return self.pop_front(&mut state);
        }
        state.waiters += 1;
        let deadline = match timeout {
            Timeout::Wait(d) => Some(Instant::now() + d),
            _ => None,
        };

        loop {
            if !state.queue.is_empty() && !state.is_stopped {
                break;
            }
            if state.is_closed {
                break;
            }
            match timeout {
                Timeout::NoWait => break,
                Timeout::Forever => {
                    self.not_empty.wait(&mut state);
                }
                Timeout::Wait(_) => {
                    let remaining = match deadline.unwrap().checked_duration_since(Instant::now())
                    {
                        Some(r) if !r.is_zero() => r,
                        _ => break,
                    };
                    let result = self.not_empty.wait_for(&mut state, remaining);
                    if result.timed_out() {
                        break;
                    }
                }
            }
        }

        let result = if state.is_stopped {
            None
        } else {
            self.pop_front(&mut state)
        };
        state.waiters -= 1;
        if state.waiters == 0 {
            self.drained.notify_all();
        }
        result
    }

    fn pop_front(&self, state: &mut Inner) -> Option<Packet> {
        if state.is_stopped {
            return None;
        }
        match state.queue.pop_front() {
            Some(Some(packet)) => {
                state.receive_in_progress = true;
                Some(packet)
            }
            Some(None) => {
                // The close sentinel: put it back so other waiters see it too.
                state.queue.push_front(None);
                None
            }
            None => None,
        }
    }

    /// Clears `receive_in_progress`, unblocking a concurrent `stop()` (spec
    /// ss4.6).
    pub fn receive_done(&self) {
        let mut state = self.state.lock();
        state.receive_in_progress = false;
        self.drained.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().is_closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for ReceiveQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mq_protocol::PacketType;
    use std::sync::Arc;
    use std::thread;

    fn packet() -> Packet {
        Packet::new(PacketType::DataMessage)
    }

    #[test]
    fn fifo_ordering_is_preserved() {
        let q = ReceiveQueue::new();
        for i in 0..5u64 {
            let mut p = packet();
            p.consumer_id = i;
            q.enqueue(p);
        }
        for i in 0..5u64 {
            let p = q.dequeue_wait(Timeout::NoWait).unwrap();
            assert_eq!(p.consumer_id, i);
            q.receive_done();
        }
        assert!(q.dequeue_wait(Timeout::NoWait).is_none());
    }

    #[test]
    fn close_wakes_blocked_waiter_with_none() {
        let q = Arc::new(ReceiveQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.dequeue_wait(Timeout::Forever));
        thread::sleep(Duration::from_millis(50));
        q.close(true);
        assert!(handle.join().unwrap().is_none());
        assert!(q.is_closed());
    }

    #[test]
    fn stop_blocks_new_receives_until_started_again() {
        let q = ReceiveQueue::new();
        q.enqueue(packet());
        q.stop();
        assert!(q.dequeue_wait(Timeout::NoWait).is_none());
        q.start();
        assert!(q.dequeue_wait(Timeout::NoWait).is_some());
    }

    #[test]
    fn no_wait_returns_immediately_when_empty() {
        let q = ReceiveQueue::new();
        assert!(q.dequeue_wait(Timeout::NoWait).is_none());
    }
}
