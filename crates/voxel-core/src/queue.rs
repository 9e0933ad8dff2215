//! The cross-front-end command queue.
//!
//! Front ends submit commands here; a worker thread drains them into the
//! registry bus. Completions are delivered exactly once, either through the
//! callback registered with the command or to a waiter parked in
//! [`CommandQueue::wait_for`].

use crate::object::{ObjectId, Options, Status};
use crate::registry::Registry;
use crate::CoreError;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

/// Invoked once when a command completes.
pub type CompletionCallback = Box<dyn FnOnce(u64, i32, Option<Status>) + Send>;

/// A queued bus command.
pub struct Command {
    pub id: u64,
    pub object: ObjectId,
    pub cmd: u32,
    pub opts: Options,
}

/// A stored completion for a poll-style waiter.
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: u64,
    pub status: i32,
    pub data: Option<Status>,
}

struct Inner {
    fifo: VecDeque<Command>,
    in_flight: HashMap<u64, Option<CompletionCallback>>,
    done: HashMap<u64, Completion>,
    next_id: u64,
    open: bool,
}

/// Thread-safe bounded command FIFO with exactly-once completion fan-out.
pub struct CommandQueue {
    inner: Mutex<Inner>,
    cmd_ready: Condvar,
    completed: Condvar,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        CommandQueue {
            inner: Mutex::new(Inner {
                fifo: VecDeque::new(),
                in_flight: HashMap::new(),
                done: HashMap::new(),
                next_id: 1,
                open: true,
            }),
            cmd_ready: Condvar::new(),
            completed: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Submits a command. Non-blocking; fails with `QueueFull` at capacity.
    ///
    /// The command is tracked as in-flight from this point on, so a
    /// completion arriving immediately after dispatch always finds its
    /// entry.
    pub fn queue_command(
        &self,
        object: ObjectId,
        cmd: u32,
        opts: Options,
        callback: Option<CompletionCallback>,
    ) -> Result<u64, CoreError> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(CoreError::QueueClosed);
        }
        if inner.fifo.len() >= self.capacity {
            return Err(CoreError::QueueFull);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.in_flight.insert(id, callback);
        inner.fifo.push_back(Command {
            id,
            object,
            cmd,
            opts,
        });
        debug!(id, object, cmd, "command queued");
        drop(inner);
        self.cmd_ready.notify_one();
        Ok(id)
    }

    /// Blocks up to `timeout` for the next command; used by the worker
    /// thread.
    pub fn pop(&self, timeout: Duration) -> Option<Command> {
        let mut inner = self.inner.lock();
        if inner.fifo.is_empty() && inner.open {
            self.cmd_ready.wait_for(&mut inner, timeout);
        }
        inner.fifo.pop_front()
    }

    /// Delivers a command's completion exactly once.
    pub fn complete(&self, id: u64, status: i32, data: Option<Status>) {
        let mut inner = self.inner.lock();
        let Some(callback) = inner.in_flight.remove(&id) else {
            warn!(id, "completion for unknown or already-completed command");
            return;
        };
        match callback {
            Some(callback) => {
                drop(inner);
                callback(id, status, data);
            }
            None => {
                inner.done.insert(id, Completion { id, status, data });
                drop(inner);
                self.completed.notify_all();
            }
        }
    }

    /// Blocks until at least one of `ids` has a stored completion, then
    /// drains and returns all of them that are ready.
    pub fn wait_for(&self, ids: &[u64]) -> Vec<Completion> {
        let mut inner = self.inner.lock();
        loop {
            let ready: Vec<u64> = ids
                .iter()
                .copied()
                .filter(|id| inner.done.contains_key(id))
                .collect();
            if !ready.is_empty() {
                return ready
                    .into_iter()
                    .filter_map(|id| inner.done.remove(&id))
                    .collect();
            }
            if !inner.open {
                return Vec::new();
            }
            self.completed.wait(&mut inner);
        }
    }

    /// Cancels all pending commands (completing them with `-1`) and closes
    /// the queue.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.open = false;
        let pending: Vec<u64> = inner.fifo.drain(..).map(|cmd| cmd.id).collect();
        let callbacks: Vec<(u64, Option<CompletionCallback>)> = pending
            .iter()
            .filter_map(|id| inner.in_flight.remove(id).map(|cb| (*id, cb)))
            .collect();
        drop(inner);
        for (id, callback) in callbacks {
            if let Some(callback) = callback {
                callback(id, -1, None);
            }
        }
        self.cmd_ready.notify_all();
        self.completed.notify_all();
    }
}

/// One iteration of the queue worker: pop a command (waiting up to
/// `timeout`), dispatch it into the registry bus, and deliver its
/// completion. Returns false when no command arrived.
pub fn drain_one(queue: &CommandQueue, registry: &Registry, timeout: Duration) -> bool {
    let Some(cmd) = queue.pop(timeout) else {
        return false;
    };
    match registry.exec(cmd.object, cmd.cmd, &cmd.opts) {
        Ok(result) => queue.complete(cmd.id, result.status, result.data),
        Err(err) => {
            warn!(%err, id = cmd.id, object = cmd.object, "bus command failed");
            queue.complete(cmd.id, -err.status_code(), None);
        }
    }
    true
}
