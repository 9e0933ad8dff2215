//! # Voxel Core
//!
//! The heart of the voxel MCU emulator: a virtual-time tick engine with a
//! priority-queue timer scheduler, the peripheral object registry and
//! command bus, the cross-front-end command queue, and the lock-free pin
//! words shared between peripherals.
//!
//! ## Architecture
//!
//! Peripherals are pure callback state machines driven by the
//! [`timers::Scheduler`]; there are no per-peripheral threads. The
//! [`registry::Registry`] maps stable object ids to peripheral state and
//! dispatches commands submitted through the [`queue::CommandQueue`].
//! Time is the 32-bit [`clock::Clock`] tick counter, always compared with
//! the wrap-safe predicates.

pub mod atomic;
pub mod board;
pub mod clock;
pub mod object;
pub mod objects;
pub mod queue;
pub mod registry;
pub mod timers;

use object::ObjectId;
use thiserror::Error;

/// errno-style status codes carried by command completions.
pub mod status_code {
    pub const OK: i32 = 0;
    pub const ENOENT: i32 = 2;
    pub const EBUSY: i32 = 16;
    pub const EINVAL: i32 = 22;
}

/// Errors surfaced by the core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("object {0} not found")]
    NotFound(ObjectId),
    #[error("unknown object '{0}:{1}'")]
    UnknownObject(String, String),
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("object is busy")]
    Busy,
    #[error("unknown pin '{0}'")]
    UnknownPin(String),
    #[error("pin '{0}' is already claimed by object {1}")]
    PinClaimed(String, ObjectId),
    #[error("object limit for class '{0}' exceeded")]
    ClassLimit(&'static str),
    #[error("duplicate object '{0}'")]
    Duplicate(String),
    #[error("command queue is full")]
    QueueFull,
    #[error("command queue is closed")]
    QueueClosed,
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// The errno-style code carried in a command completion for this
    /// error.
    pub fn status_code(&self) -> i32 {
        match self {
            CoreError::NotFound(_) | CoreError::UnknownObject(_, _) | CoreError::UnknownPin(_) => {
                status_code::ENOENT
            }
            CoreError::Busy => status_code::EBUSY,
            _ => status_code::EINVAL,
        }
    }
}
