//! Emulator assembly: configuration loading, the host link, the
//! supervisor lifecycle, and the textual command-channel surface. The
//! `voxel-emu` binary is a thin CLI over these modules.

pub mod config;
pub mod direct;
pub mod link;
pub mod supervisor;
