//! The Klipper protocol command dictionary.
//!
//! Each entry pairs a command format string with its response format (when
//! one exists) and the handler flags. The session registers these in the
//! identity dictionary at startup, gated on the hardware the registry
//! actually contains.

/// No special handling.
pub const HF_NONE: u8 = 0;
/// Command stays executable after a shutdown.
pub const HF_IN_SHUTDOWN: u8 = 1;

/// One protocol command (or response-only message) definition.
#[derive(Debug)]
pub struct CmdDef {
    pub command: Option<&'static str>,
    pub response: Option<&'static str>,
    pub flags: u8,
}

impl CmdDef {
    /// The dispatch name: the first word of the command format string.
    pub fn name(&self) -> Option<&'static str> {
        self.command.map(|c| c.split_ascii_whitespace().next().unwrap_or(c))
    }
}

/// Shutdown reasons, indexed by static-string id.
pub static STATIC_STRINGS: &[&str] = &[
    "ADC out of range",
    "Unsupported command",
    "Command failure",
    "Command request",
    "Invalid count parameter",
    "Timer too close",
    "Stepper initialization failure",
    "Missed scheduling of next digital out event",
    "Scheduled digital out event will exceed max duration",
    "Failed to set PWM duty cycle",
    "PWM move exceeds max duration",
    "Missed scheduling of next PWM out event",
];

// basecmd
pub static ALLOCATE_OIDS: CmdDef = CmdDef { command: Some("allocate_oids count=%c"), response: None, flags: HF_NONE };
pub static GET_CONFIG: CmdDef = CmdDef { command: Some("get_config"), response: Some("config is_config=%c crc=%u is_shutdown=%c move_count=%hu"), flags: HF_IN_SHUTDOWN };
pub static FINALIZE_CONFIG: CmdDef = CmdDef { command: Some("finalize_config crc=%u"), response: None, flags: HF_NONE };
pub static GET_CLOCK: CmdDef = CmdDef { command: Some("get_clock"), response: Some("clock clock=%u"), flags: HF_IN_SHUTDOWN };
pub static GET_UPTIME: CmdDef = CmdDef { command: Some("get_uptime"), response: Some("uptime high=%u clock=%u"), flags: HF_IN_SHUTDOWN };
pub static EMERGENCY_STOP: CmdDef = CmdDef { command: Some("emergency_stop"), response: None, flags: HF_IN_SHUTDOWN };
pub static CLEAR_SHUTDOWN: CmdDef = CmdDef { command: Some("clear_shutdown"), response: None, flags: HF_IN_SHUTDOWN };
pub static IDENTIFY: CmdDef = CmdDef { command: Some("identify offset=%u count=%c"), response: Some("identify_response offset=%u data=%.*s"), flags: HF_IN_SHUTDOWN };
pub static RESET: CmdDef = CmdDef { command: Some("reset"), response: None, flags: HF_IN_SHUTDOWN };
pub static CONFIG_RESET: CmdDef = CmdDef { command: Some("config_reset"), response: None, flags: HF_IN_SHUTDOWN };

pub static BASECMD: &[&CmdDef] = &[
    &ALLOCATE_OIDS,
    &GET_CONFIG,
    &FINALIZE_CONFIG,
    &GET_CLOCK,
    &GET_UPTIME,
    &EMERGENCY_STOP,
    &CLEAR_SHUTDOWN,
    &RESET,
    &CONFIG_RESET,
];

// sched (response-only)
pub static SHUTDOWN: CmdDef = CmdDef { command: None, response: Some("shutdown clock=%u static_string_id=%hu"), flags: HF_NONE };
pub static IS_SHUTDOWN: CmdDef = CmdDef { command: None, response: Some("is_shutdown static_string_id=%hu"), flags: HF_NONE };
pub static STATS: CmdDef = CmdDef { command: None, response: Some("stats count=%u sum=%u sumsq=%u"), flags: HF_NONE };

pub static SCHED: &[&CmdDef] = &[&SHUTDOWN, &IS_SHUTDOWN, &STATS];

// debugcmds
pub static DEBUG_PING: CmdDef = CmdDef { command: Some("debug_ping data=%*s"), response: Some("pong data=%*s"), flags: HF_IN_SHUTDOWN };
pub static DEBUG_NOP: CmdDef = CmdDef { command: Some("debug_nop"), response: None, flags: HF_IN_SHUTDOWN };

pub static DEBUGCMDS: &[&CmdDef] = &[&DEBUG_PING, &DEBUG_NOP];

// gpiocmds
pub static CONFIG_DIGITAL_OUT: CmdDef = CmdDef { command: Some("config_digital_out oid=%c pin=%u value=%c default_value=%c max_duration=%u"), response: None, flags: HF_NONE };
pub static SET_DIGITAL_OUT_PWM_CYCLE: CmdDef = CmdDef { command: Some("set_digital_out_pwm_cycle oid=%c cycle_ticks=%u"), response: None, flags: HF_NONE };
pub static QUEUE_DIGITAL_OUT: CmdDef = CmdDef { command: Some("queue_digital_out oid=%c clock=%u on_ticks=%u"), response: None, flags: HF_NONE };
pub static UPDATE_DIGITAL_OUT: CmdDef = CmdDef { command: Some("update_digital_out oid=%c value=%c"), response: None, flags: HF_NONE };
pub static SET_DIGITAL_OUT: CmdDef = CmdDef { command: Some("set_digital_out pin=%u value=%c"), response: None, flags: HF_NONE };

pub static GPIOCMDS: &[&CmdDef] = &[
    &CONFIG_DIGITAL_OUT,
    &SET_DIGITAL_OUT_PWM_CYCLE,
    &QUEUE_DIGITAL_OUT,
    &UPDATE_DIGITAL_OUT,
    &SET_DIGITAL_OUT,
];

// stepper
pub static CONFIG_STEPPER: CmdDef = CmdDef { command: Some("config_stepper oid=%c step_pin=%c dir_pin=%c invert_step=%c step_pulse_ticks=%u"), response: None, flags: HF_NONE };
pub static QUEUE_STEP: CmdDef = CmdDef { command: Some("queue_step oid=%c interval=%u count=%hu add=%hi"), response: None, flags: HF_NONE };
pub static SET_NEXT_STEP_DIR: CmdDef = CmdDef { command: Some("set_next_step_dir oid=%c dir=%c"), response: None, flags: HF_NONE };
pub static RESET_STEP_CLOCK: CmdDef = CmdDef { command: Some("reset_step_clock oid=%c clock=%u"), response: None, flags: HF_NONE };
pub static STEPPER_GET_POSITION: CmdDef = CmdDef { command: Some("stepper_get_position oid=%c"), response: Some("stepper_position oid=%c pos=%i"), flags: HF_NONE };
pub static STEPPER_STOP_ON_TRIGGER: CmdDef = CmdDef { command: Some("stepper_stop_on_trigger oid=%c trsync_oid=%c"), response: None, flags: HF_NONE };

pub static STEPPER: &[&CmdDef] = &[
    &CONFIG_STEPPER,
    &QUEUE_STEP,
    &SET_NEXT_STEP_DIR,
    &RESET_STEP_CLOCK,
    &STEPPER_GET_POSITION,
    &STEPPER_STOP_ON_TRIGGER,
];

// trsync
pub static CONFIG_TRSYNC: CmdDef = CmdDef { command: Some("config_trsync oid=%c"), response: None, flags: HF_NONE };
pub static TRSYNC_START: CmdDef = CmdDef { command: Some("trsync_start oid=%c report_clock=%u report_ticks=%u expire_reason=%c"), response: None, flags: HF_NONE };
pub static TRSYNC_SET_TIMEOUT: CmdDef = CmdDef { command: Some("trsync_set_timeout oid=%c clock=%u"), response: None, flags: HF_NONE };
pub static TRSYNC_TRIGGER: CmdDef = CmdDef { command: Some("trsync_trigger oid=%c reason=%c"), response: None, flags: HF_NONE };
pub static TRSYNC_STATE: CmdDef = CmdDef { command: None, response: Some("trsync_state oid=%c can_trigger=%c trigger_reason=%c clock=%u"), flags: HF_NONE };

pub static TRSYNC: &[&CmdDef] = &[
    &CONFIG_TRSYNC,
    &TRSYNC_START,
    &TRSYNC_SET_TIMEOUT,
    &TRSYNC_TRIGGER,
    &TRSYNC_STATE,
];

// endstop
pub static CONFIG_ENDSTOP: CmdDef = CmdDef { command: Some("config_endstop oid=%c pin=%c pull_up=%c"), response: None, flags: HF_NONE };
pub static ENDSTOP_HOME: CmdDef = CmdDef { command: Some("endstop_home oid=%c clock=%u sample_ticks=%u sample_count=%c rest_ticks=%u pin_value=%c trsync_oid=%c trigger_reason=%c"), response: None, flags: HF_NONE };
pub static ENDSTOP_QUERY_STATE: CmdDef = CmdDef { command: Some("endstop_query_state oid=%c"), response: Some("endstop_state oid=%c homing=%c next_clock=%u pin_value=%c"), flags: HF_NONE };

pub static ENDSTOP: &[&CmdDef] = &[&CONFIG_ENDSTOP, &ENDSTOP_HOME, &ENDSTOP_QUERY_STATE];

// adccmds
pub static CONFIG_ANALOG_IN: CmdDef = CmdDef { command: Some("config_analog_in oid=%c pin=%u"), response: None, flags: HF_NONE };
pub static QUERY_ANALOG_IN: CmdDef = CmdDef { command: Some("query_analog_in oid=%c clock=%u sample_ticks=%u sample_count=%c rest_ticks=%u min_value=%hu max_value=%hu range_check_count=%c"), response: Some("analog_in_state oid=%c next_clock=%u value=%hu"), flags: HF_NONE };

pub static ADCCMDS: &[&CmdDef] = &[&CONFIG_ANALOG_IN, &QUERY_ANALOG_IN];

// pwmcmds
pub static CONFIG_PWM_OUT: CmdDef = CmdDef { command: Some("config_pwm_out oid=%c pin=%u cycle_ticks=%u value=%hu default_value=%hu max_duration=%u"), response: None, flags: HF_NONE };
pub static QUEUE_PWM_OUT: CmdDef = CmdDef { command: Some("queue_pwm_out oid=%c clock=%u value=%hu"), response: None, flags: HF_NONE };
pub static SET_PWM_OUT: CmdDef = CmdDef { command: Some("set_pwm_out pin=%u cycle_ticks=%u value=%hu"), response: None, flags: HF_NONE };

pub static PWMCMDS: &[&CmdDef] = &[&CONFIG_PWM_OUT, &QUEUE_PWM_OUT, &SET_PWM_OUT];

// spicmds
pub static CONFIG_SPI: CmdDef = CmdDef { command: Some("config_spi oid=%c pin=%u cs_active_high=%c"), response: None, flags: HF_NONE };
pub static SPI_SET_BUS: CmdDef = CmdDef { command: Some("spi_set_bus oid=%c spi_bus=%u mode=%u rate=%u"), response: None, flags: HF_NONE };
pub static SPI_SET_SOFTWARE_BUS: CmdDef = CmdDef { command: Some("spi_set_software_bus oid=%c miso_pin=%u mosi_pin=%u sclk_pin=%u mode=%u rate=%u"), response: None, flags: HF_NONE };
pub static SPI_TRANSFER: CmdDef = CmdDef { command: Some("spi_transfer oid=%c data=%*s"), response: Some("spi_transfer_response oid=%c response=%*s"), flags: HF_NONE };
pub static SPI_SEND: CmdDef = CmdDef { command: Some("spi_send oid=%c data=%*s"), response: None, flags: HF_NONE };

pub static SPICMDS: &[&CmdDef] = &[
    &CONFIG_SPI,
    &SPI_SET_BUS,
    &SPI_SET_SOFTWARE_BUS,
    &SPI_TRANSFER,
    &SPI_SEND,
];

// neopixel
pub static CONFIG_NEOPIXEL: CmdDef = CmdDef { command: Some("config_neopixel oid=%c pin=%u data_size=%hu bit_max_ticks=%u reset_min_ticks=%u"), response: None, flags: HF_NONE };
pub static NEOPIXEL_UPDATE: CmdDef = CmdDef { command: Some("neopixel_update oid=%c pos=%hu data=%*s"), response: None, flags: HF_NONE };
pub static NEOPIXEL_SEND: CmdDef = CmdDef { command: Some("neopixel_send oid=%c"), response: Some("neopixel_result oid=%c success=%c"), flags: HF_NONE };

pub static NEOPIXEL: &[&CmdDef] = &[&CONFIG_NEOPIXEL, &NEOPIXEL_UPDATE, &NEOPIXEL_SEND];

// buttons
pub static CONFIG_BUTTONS: CmdDef = CmdDef { command: Some("config_buttons oid=%c button_count=%c"), response: None, flags: HF_NONE };
pub static BUTTONS_ADD: CmdDef = CmdDef { command: Some("buttons_add oid=%c pos=%c pin=%u pull_up=%c"), response: None, flags: HF_NONE };
pub static BUTTONS_QUERY: CmdDef = CmdDef { command: Some("buttons_query oid=%c clock=%u rest_ticks=%u retransmit_count=%c invert=%c"), response: Some("buttons_state oid=%c ack_count=%c state=%*s"), flags: HF_NONE };
pub static BUTTONS_ACK: CmdDef = CmdDef { command: Some("buttons_ack oid=%c count=%c"), response: None, flags: HF_NONE };

pub static BUTTONS: &[&CmdDef] = &[&CONFIG_BUTTONS, &BUTTONS_ADD, &BUTTONS_QUERY, &BUTTONS_ACK];

/// Protocol version string advertised in the identity dictionary.
pub const PROTOCOL_VERSION: &str = "voxel-mcu-1.0";

/// Stats accumulation scale divisor.
pub const STATS_SUMSQ_BASE: u32 = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_names() {
        assert_eq!(ALLOCATE_OIDS.name(), Some("allocate_oids"));
        assert_eq!(GET_CONFIG.name(), Some("get_config"));
        assert_eq!(SHUTDOWN.name(), None);
    }

    #[test]
    fn test_static_string_table_is_stable() {
        // Host-side caches resolve ids against this exact order.
        assert_eq!(STATIC_STRINGS[0], "ADC out of range");
        assert_eq!(STATIC_STRINGS[2], "Command failure");
        assert_eq!(STATIC_STRINGS[4], "Invalid count parameter");
        assert_eq!(STATIC_STRINGS[5], "Timer too close");
        assert_eq!(STATIC_STRINGS.len(), 12);
    }
}
