//! Core surface for the textual debug command channel.
//!
//! The line-oriented front end itself lives outside the emulator; the core
//! exposes command submission by `(class, object, command)` names with
//! `k=v,k=v` option strings, and the `#$ ... $#` response framing the
//! channel wraps results in.

use voxel_core::object::Options;
use voxel_core::queue::CommandQueue;
use voxel_core::registry::Registry;
use voxel_core::CoreError;

/// Submits a named command to the bus; returns the command id whose
/// completion the caller can wait on.
pub fn queue_command(
    registry: &Registry,
    bus: &CommandQueue,
    class: &str,
    object_name: &str,
    cmd_name: &str,
    opts_str: &str,
) -> Result<u64, CoreError> {
    let (object, cmd) = registry.resolve_command(class, object_name, cmd_name)?;
    let opts = Options::parse_pairs(opts_str)?;
    bus.queue_command(object, cmd, opts, None)
}

/// Wraps a response value in the channel's framing.
pub fn frame_response(value: &serde_json::Value) -> String {
    format!("#$ {value} $#")
}
