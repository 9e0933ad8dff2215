//! # Voxel Klipper Front End
//!
//! The Klipper binary-protocol front end of the voxel MCU emulator. An
//! unmodified host print controller connects over a serial-style link and
//! talks to this crate exactly as it would to real MCU firmware.
//!
//! ## Key Components
//!
//! - **[`session::Session`]**: the per-connection frame loop: sequence
//!   numbering, ACK/NACK, shutdown gating, and command dispatch.
//! - **[`frontend::Frontend`]**: shared services behind the session - the
//!   identity dictionary, the framed response writer, the shutdown path,
//!   and access to the core's scheduler, registry, and command bus.
//! - **[`helpers`]**: the OID-bound peripheral wrappers (stepper pulse
//!   engine, digital/PWM outputs, ADC sampler, endstop homing, TRSync,
//!   neopixel, SPI, buttons), implemented as timer-callback state
//!   machines.
//! - **[`proto_defs`]**: the command dictionary and static shutdown
//!   strings.

pub mod frontend;
pub mod helpers;
pub mod move_queue;
pub mod proto_defs;
pub mod session;

pub use frontend::Frontend;
pub use session::Session;
