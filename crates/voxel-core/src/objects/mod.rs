//! Backing peripheral objects.
//!
//! These are the simulation-side state holders behind the registry: the
//! protocol session's OID wrappers drive them through the bus and read
//! them through status queries. The physics of each device (thermal
//! models, kinematics) lives outside the core; these objects hold the
//! values such collaborators write.

pub mod digital_pin;
pub mod display;
pub mod encoder;
pub mod endstop;
pub mod fan;
pub mod heater;
pub mod neopixel;
pub mod pwm;
pub mod stepper;
pub mod thermistor;

use crate::board::Board;
use crate::object::{ObjectClass, ObjectId, Options, SimObject};
use crate::CoreError;
use std::sync::Arc;

/// Creates a peripheral of the given class from its configuration section.
pub fn create_object(
    class: ObjectClass,
    id: ObjectId,
    name: &str,
    opts: &Options,
    board: &Board,
) -> Result<Arc<dyn SimObject>, CoreError> {
    Ok(match class {
        ObjectClass::Stepper => Arc::new(stepper::StepperObject::from_options(id, name, opts)?),
        ObjectClass::Endstop | ObjectClass::Probe => {
            Arc::new(endstop::EndstopObject::from_options(class, id, name, opts)?)
        }
        ObjectClass::Thermistor => Arc::new(thermistor::ThermistorObject::from_options(
            id,
            name,
            opts,
            board.adc_max,
        )?),
        ObjectClass::Heater => Arc::new(heater::HeaterObject::from_options(id, name, opts)?),
        ObjectClass::Pwm => {
            Arc::new(pwm::PwmObject::from_options(id, name, opts, board.pwm_max)?)
        }
        ObjectClass::Fan => Arc::new(fan::FanObject::from_options(id, name, opts, board.pwm_max)?),
        ObjectClass::DigitalPin => {
            Arc::new(digital_pin::DigitalPinObject::from_options(id, name, opts)?)
        }
        ObjectClass::Display => Arc::new(display::DisplayObject::from_options(id, name, opts)?),
        ObjectClass::Encoder => Arc::new(encoder::EncoderObject::from_options(id, name, opts)?),
        ObjectClass::Neopixel => Arc::new(neopixel::NeopixelObject::from_options(id, name, opts)?),
        _ => {
            return Err(CoreError::Config(format!(
                "class '{class}' has no peripheral definition"
            )))
        }
    })
}
