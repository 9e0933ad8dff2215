//! OID-bound peripheral wrappers.
//!
//! Each wrapper binds a host-allocated OID to one backing registry object
//! and owns the timers that drive its behavior. All wrapper state mutates
//! either on the protocol thread (host commands) or inside scheduler
//! callbacks; never hold a wrapper lock while resolving another OID.

pub mod analog;
pub mod buttons;
pub mod digital;
pub mod endstop;
pub mod neopixel;
pub mod pwm;
pub mod spi;
pub mod stepper;
pub mod trsync;

pub use analog::AnalogPin;
pub use buttons::ButtonBank;
pub use digital::{DigitalOut, PinSink};
pub use endstop::EndstopSampler;
pub use neopixel::NeopixelChain;
pub use pwm::PwmOut;
pub use spi::SpiTarget;
pub use stepper::StepperPulse;
pub use trsync::TrSync;

use std::sync::Arc;
use voxel_core::timers::Scheduler;

/// A configured OID slot in the session's map.
#[derive(Clone)]
pub enum OidWrapper {
    Analog(Arc<AnalogPin>),
    Digital(Arc<DigitalOut>),
    Stepper(Arc<StepperPulse>),
    Endstop(Arc<EndstopSampler>),
    TrSync(Arc<TrSync>),
    Pwm(Arc<PwmOut>),
    Neopixel(Arc<NeopixelChain>),
    Spi(Arc<SpiTarget>),
    Buttons(Arc<ButtonBank>),
}

impl OidWrapper {
    /// Unregisters every timer the wrapper owns. Explicit teardown; never
    /// rely on drop order for timer cleanup.
    pub fn teardown(&self, sched: &Scheduler) {
        match self {
            OidWrapper::Analog(w) => sched.unregister(w.timer()),
            OidWrapper::Digital(w) => sched.unregister(w.timer()),
            OidWrapper::Stepper(w) => sched.unregister(w.timer()),
            OidWrapper::Endstop(w) => sched.unregister(w.timer()),
            OidWrapper::TrSync(w) => {
                sched.unregister(w.report_timer());
                sched.unregister(w.expire_timer());
            }
            OidWrapper::Pwm(w) => sched.unregister(w.timer()),
            OidWrapper::Buttons(w) => sched.unregister(w.timer()),
            OidWrapper::Neopixel(_) | OidWrapper::Spi(_) => {}
        }
    }
}
