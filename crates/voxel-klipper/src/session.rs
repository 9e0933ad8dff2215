//! The protocol session: frame processing and command dispatch.
//!
//! The session slides the streaming packet checker across inbound bytes,
//! enforces sequence numbering, gates commands during shutdown, and routes
//! each message to its handler. One ACK is emitted per accepted frame;
//! rejected or resynced input earns a NACK (an empty frame carrying the
//! unchanged expected sequence).

use crate::frontend::Frontend;
use crate::helpers::{
    AnalogPin, ButtonBank, DigitalOut, EndstopSampler, NeopixelChain, OidWrapper, PinSink, PwmOut,
    SpiTarget, StepperPulse, TrSync,
};
use crate::proto_defs::{self, CmdDef, HF_IN_SHUTDOWN};
use bytes::{Buf, BytesMut};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use voxel_core::object::{ObjectClass, ObjectId, OptValue, Options};
use voxel_proto::framing::{
    check_packet, MESSAGE_HEADER_SIZE, MESSAGE_POS_SEQ, MESSAGE_SEQ_MASK, MESSAGE_TRAILER_SIZE,
};
use voxel_proto::message::{MessageSchema, ParamValue};

/// Marker for any handler failure; the session elevates it to a
/// "Command failure" shutdown, since the host's view of MCU state would
/// otherwise desync.
pub struct HandlerFailure;

type HandlerResult = Result<(), HandlerFailure>;

/// Positional parameter access for one decoded message.
struct Params<'a> {
    schema: &'a MessageSchema,
    values: &'a [ParamValue],
}

impl Params<'_> {
    fn get(&self, name: &str) -> Result<&ParamValue, HandlerFailure> {
        self.schema
            .params
            .iter()
            .position(|p| p.name == name)
            .and_then(|i| self.values.get(i))
            .ok_or(HandlerFailure)
    }

    fn u32(&self, name: &str) -> Result<u32, HandlerFailure> {
        match self.get(name)? {
            ParamValue::Uint(v) => Ok(*v),
            ParamValue::Int(v) if *v >= 0 => Ok(*v as u32),
            _ => Err(HandlerFailure),
        }
    }

    fn i32(&self, name: &str) -> Result<i32, HandlerFailure> {
        match self.get(name)? {
            ParamValue::Int(v) => Ok(*v),
            ParamValue::Uint(v) if *v <= i32::MAX as u32 => Ok(*v as i32),
            _ => Err(HandlerFailure),
        }
    }

    fn u16(&self, name: &str) -> Result<u16, HandlerFailure> {
        u16::try_from(self.u32(name)?).map_err(|_| HandlerFailure)
    }

    fn u8(&self, name: &str) -> Result<u8, HandlerFailure> {
        u8::try_from(self.u32(name)?).map_err(|_| HandlerFailure)
    }

    fn i16(&self, name: &str) -> Result<i16, HandlerFailure> {
        i16::try_from(self.i32(name)?).map_err(|_| HandlerFailure)
    }

    fn bytes(&self, name: &str) -> Result<&[u8], HandlerFailure> {
        match self.get(name)? {
            ParamValue::Bytes(b) => Ok(b),
            _ => Err(HandlerFailure),
        }
    }
}

/// One host connection's protocol state machine.
pub struct Session {
    front: Arc<Frontend>,
    buffer: BytesMut,
}

impl Session {
    pub fn new(front: Arc<Frontend>) -> Self {
        front.start_tasks();
        Session {
            front,
            buffer: BytesMut::new(),
        }
    }

    pub fn frontend(&self) -> &Arc<Frontend> {
        &self.front
    }

    /// Blocking read loop; used by the supervisor's protocol thread.
    pub fn run(&mut self, reader: &mut dyn Read, running: &AtomicBool) {
        let mut chunk = [0u8; 256];
        while running.load(Ordering::SeqCst) {
            match reader.read(&mut chunk) {
                Ok(0) => {
                    info!("host link closed");
                    break;
                }
                Ok(n) => self.process_bytes(&chunk[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                Err(err) => {
                    warn!(%err, "host link read failed");
                    break;
                }
            }
        }
        self.front.reset_oids();
    }

    /// Feeds raw bytes from the host link into the parser.
    pub fn process_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        loop {
            let verdict = check_packet(&self.buffer);
            if verdict == 0 {
                return;
            }
            if verdict < 0 {
                // Garbled input: drop it and NACK so the host retransmits.
                let skip = (-verdict) as usize;
                trace!(skip, "parser resync");
                self.buffer.advance(skip.min(self.buffer.len()));
                self.front.send_ack();
                continue;
            }
            let len = verdict as usize;
            let block = self.buffer.split_to(len);
            self.process_block(&block);
        }
    }

    /// Handles one complete, CRC-valid block.
    fn process_block(&mut self, block: &[u8]) {
        let sequence = block[MESSAGE_POS_SEQ] & MESSAGE_SEQ_MASK;
        if sequence != self.front.sequence() & MESSAGE_SEQ_MASK {
            debug!(
                got = sequence,
                want = self.front.sequence(),
                "sequence mismatch"
            );
            self.front.send_ack();
            return;
        }
        // Advance before dispatch so every response from the handlers (and
        // the final ACK) carries the new expected sequence.
        self.front
            .set_sequence((sequence + 1) & MESSAGE_SEQ_MASK);

        let payload = &block[MESSAGE_HEADER_SIZE..block.len() - MESSAGE_TRAILER_SIZE];
        let mut pos = 0;
        while pos < payload.len() {
            let (schema, values) = match self.front.msgs().decode_next(payload, &mut pos) {
                Ok(decoded) => decoded,
                Err(err) => {
                    debug!(%err, "undecodable message");
                    self.front.shutdown("Unsupported command");
                    break;
                }
            };
            let Some(def) = self.front.command_def(&schema.name) else {
                self.front.shutdown("Unsupported command");
                break;
            };
            if self.front.is_shutdown() && def.flags & HF_IN_SHUTDOWN == 0 {
                let reason = self.front.state().shutdown_reason;
                self.front.respond(
                    &proto_defs::IS_SHUTDOWN,
                    &[("static_string_id", ParamValue::Uint(reason as u32))],
                );
                break;
            }
            trace!(name = %schema.name, "dispatch");
            let params = Params {
                schema: &schema,
                values: &values,
            };
            if self.dispatch(def, &schema.name, &params).is_err() {
                self.front.shutdown("Command failure");
                break;
            }
        }
        self.front.send_ack();
    }

    fn dispatch(&mut self, def: &'static CmdDef, name: &str, p: &Params) -> HandlerResult {
        match name {
            "identify" => self.cmd_identify(def, p),
            "allocate_oids" => self.cmd_allocate_oids(p),
            "get_config" => self.cmd_get_config(def),
            "finalize_config" => self.cmd_finalize_config(p),
            "get_clock" => self.cmd_get_clock(def),
            "get_uptime" => self.cmd_get_uptime(def),
            "emergency_stop" => {
                self.front.shutdown("Command request");
                Ok(())
            }
            "clear_shutdown" => self.cmd_clear_shutdown(),
            "reset" | "config_reset" => self.cmd_reset(),
            "debug_ping" => self.cmd_debug_ping(def, p),
            "debug_nop" => Ok(()),
            "config_analog_in" => self.cmd_config_analog_in(p),
            "query_analog_in" => self.cmd_query_analog_in(p),
            "config_digital_out" => self.cmd_config_digital_out(p),
            "set_digital_out_pwm_cycle" => {
                let pin = self.digital(p.u8("oid")?)?;
                pin.set_cycle_ticks(p.u32("cycle_ticks")?);
                Ok(())
            }
            "queue_digital_out" => {
                let pin = self.digital(p.u8("oid")?)?;
                pin.schedule_cycle(p.u32("clock")?, p.u32("on_ticks")?);
                Ok(())
            }
            "update_digital_out" => {
                let pin = self.digital(p.u8("oid")?)?;
                pin.update(p.u8("value")? != 0);
                Ok(())
            }
            "set_digital_out" => self.cmd_set_digital_out(p),
            "config_stepper" => self.cmd_config_stepper(p),
            "queue_step" => {
                let stepper = self.stepper(p.u8("oid")?)?;
                stepper.queue_move(p.u32("interval")?, p.u16("count")?, p.i16("add")?);
                Ok(())
            }
            "set_next_step_dir" => {
                let stepper = self.stepper(p.u8("oid")?)?;
                stepper.set_next_dir(p.u8("dir")?);
                Ok(())
            }
            "reset_step_clock" => {
                let stepper = self.stepper(p.u8("oid")?)?;
                stepper.reset_clock(p.u32("clock")?);
                Ok(())
            }
            "stepper_get_position" => self.cmd_stepper_get_position(def, p),
            "stepper_stop_on_trigger" => self.cmd_stepper_stop_on_trigger(p),
            "config_endstop" => self.cmd_config_endstop(p),
            "endstop_home" => self.cmd_endstop_home(p),
            "endstop_query_state" => self.cmd_endstop_query_state(def, p),
            "config_trsync" => {
                let oid = p.u8("oid")?;
                let trsync = TrSync::new(&self.front, oid);
                self.insert_oid(oid, OidWrapper::TrSync(trsync))
            }
            "trsync_start" => {
                let trsync = self.trsync(p.u8("oid")?)?;
                trsync.start(
                    p.u32("report_clock")?,
                    p.u32("report_ticks")?,
                    p.u8("expire_reason")?,
                );
                Ok(())
            }
            "trsync_set_timeout" => {
                let trsync = self.trsync(p.u8("oid")?)?;
                trsync.set_timeout(p.u32("clock")?);
                Ok(())
            }
            "trsync_trigger" => {
                let trsync = self.trsync(p.u8("oid")?)?;
                trsync.trigger(p.u8("reason")?);
                trsync.report(0, None);
                Ok(())
            }
            "config_pwm_out" => self.cmd_config_pwm_out(p),
            "queue_pwm_out" => {
                let pwm = self.pwm(p.u8("oid")?)?;
                if !pwm.queue(p.u32("clock")?, p.u16("value")?) {
                    return Err(HandlerFailure);
                }
                Ok(())
            }
            "set_pwm_out" => self.cmd_set_pwm_out(p),
            "config_spi" => self.cmd_config_spi(p),
            "spi_set_bus" => {
                let spi = self.spi(p.u8("oid")?)?;
                if !spi.set_bus(p.u32("spi_bus")?, p.u32("mode")?, p.u32("rate")?) {
                    return Err(HandlerFailure);
                }
                Ok(())
            }
            "spi_set_software_bus" => self.cmd_spi_set_software_bus(p),
            "spi_send" => {
                let spi = self.spi(p.u8("oid")?)?;
                spi.transfer(p.bytes("data")?, false).ok_or(HandlerFailure)?;
                Ok(())
            }
            "spi_transfer" => self.cmd_spi_transfer(def, p),
            "config_neopixel" => self.cmd_config_neopixel(p),
            "neopixel_update" => {
                let strip = self.neopixel(p.u8("oid")?)?;
                if !strip.update(p.u16("pos")?, p.bytes("data")?) {
                    return Err(HandlerFailure);
                }
                Ok(())
            }
            "neopixel_send" => {
                let strip = self.neopixel(p.u8("oid")?)?;
                strip.send();
                Ok(())
            }
            "config_buttons" => {
                let oid = p.u8("oid")?;
                let bank =
                    ButtonBank::new(&self.front, oid, p.u8("button_count")?).ok_or(HandlerFailure)?;
                self.insert_oid(oid, OidWrapper::Buttons(bank))
            }
            "buttons_add" => self.cmd_buttons_add(p),
            "buttons_query" => {
                let bank = self.buttons(p.u8("oid")?)?;
                bank.query(
                    p.u32("clock")?,
                    p.u32("rest_ticks")?,
                    p.u8("retransmit_count")?,
                    p.u8("invert")?,
                );
                Ok(())
            }
            "buttons_ack" => {
                let bank = self.buttons(p.u8("oid")?)?;
                bank.ack(p.u8("count")?);
                Ok(())
            }
            _ => {
                warn!(name, "command registered without a handler");
                Err(HandlerFailure)
            }
        }
    }

    // --- base commands ---

    fn cmd_identify(&self, def: &'static CmdDef, p: &Params) -> HandlerResult {
        let offset = p.u32("offset")?;
        let count = p.u8("count")?;
        let data = self.front.identity_chunk(offset, count).to_vec();
        self.front.respond(
            def,
            &[
                ("offset", ParamValue::Uint(offset)),
                ("data", ParamValue::Bytes(data)),
            ],
        );
        Ok(())
    }

    fn cmd_allocate_oids(&self, p: &Params) -> HandlerResult {
        let count = p.u8("count")?;
        self.front.reset_oids();
        self.front.state().oid_count = count;
        Ok(())
    }

    fn cmd_get_config(&self, def: &'static CmdDef) -> HandlerResult {
        let (config_crc, is_shutdown, oid_count) = {
            let state = self.front.state();
            (state.config_crc, state.shutdown, state.oid_count)
        };
        // A config only counts once oids were allocated and finalized.
        let move_count = if config_crc != 0 && oid_count > 0 {
            self.front.moves().capacity() as u32
        } else {
            0
        };
        self.front.respond(
            def,
            &[
                ("is_config", ParamValue::Uint((move_count != 0) as u32)),
                ("crc", ParamValue::Uint(config_crc)),
                ("is_shutdown", ParamValue::Uint(is_shutdown as u32)),
                ("move_count", ParamValue::Uint(move_count)),
            ],
        );
        Ok(())
    }

    fn cmd_finalize_config(&self, p: &Params) -> HandlerResult {
        self.front.state().config_crc = p.u32("crc")?;
        Ok(())
    }

    fn cmd_get_clock(&self, def: &'static CmdDef) -> HandlerResult {
        self.front
            .respond(def, &[("clock", ParamValue::Uint(self.front.now()))]);
        Ok(())
    }

    fn cmd_get_uptime(&self, def: &'static CmdDef) -> HandlerResult {
        let runtime = self.front.now();
        self.front.respond(
            def,
            &[
                ("high", ParamValue::Uint(self.front.uptime_high(runtime))),
                ("clock", ParamValue::Uint(runtime)),
            ],
        );
        Ok(())
    }

    fn cmd_clear_shutdown(&self) -> HandlerResult {
        let mut state = self.front.state();
        state.shutdown = false;
        state.shutdown_reason = 0;
        Ok(())
    }

    fn cmd_reset(&self) -> HandlerResult {
        self.front.reset_oids();
        {
            let mut state = self.front.state();
            state.config_crc = 0;
            state.shutdown = false;
            state.shutdown_reason = 0;
        }
        self.front.registry().reset_all();
        Ok(())
    }

    fn cmd_debug_ping(&self, def: &'static CmdDef, p: &Params) -> HandlerResult {
        let data = p.bytes("data")?.to_vec();
        self.front.respond(def, &[("data", ParamValue::Bytes(data))]);
        Ok(())
    }

    // --- analog in ---

    fn cmd_config_analog_in(&self, p: &Params) -> HandlerResult {
        let oid = p.u8("oid")?;
        let (object, _) = self.object_from_pin_id(p.u32("pin")?, &[ObjectClass::Thermistor])?;
        let pin = AnalogPin::new(&self.front, oid, object);
        self.insert_oid(oid, OidWrapper::Analog(pin))
    }

    fn cmd_query_analog_in(&self, p: &Params) -> HandlerResult {
        let pin = self.analog(p.u8("oid")?)?;
        pin.schedule_query(
            p.u32("clock")?,
            p.u32("sample_ticks")?,
            p.u8("sample_count")?,
            p.u32("rest_ticks")?,
            p.u32("min_value")?,
            p.u32("max_value")?,
            p.u8("range_check_count")?,
        );
        Ok(())
    }

    // --- digital out ---

    fn cmd_config_digital_out(&self, p: &Params) -> HandlerResult {
        let oid = p.u8("oid")?;
        let (object, class) = self.object_from_pin_id(p.u32("pin")?, &[])?;
        let sink = match class {
            ObjectClass::DigitalPin => PinSink::Bus { object },
            ObjectClass::Heater => {
                let done = self
                    .front
                    .exec_sync(object, "use_pins", enable_opts(true))
                    .ok_or(HandlerFailure)?;
                if done.status < 0 {
                    return Err(HandlerFailure);
                }
                let word = self
                    .front
                    .registry()
                    .object(object)
                    .map_err(|_| HandlerFailure)?
                    .pin_word()
                    .ok_or(HandlerFailure)?;
                PinSink::Level(word)
            }
            ObjectClass::Stepper => {
                // Only the enable pin of an already-configured stepper may
                // be claimed as a digital out.
                let pin_name = self
                    .front
                    .registry()
                    .board()
                    .pin_name(p.u32("pin")?)
                    .ok_or(HandlerFailure)?;
                let stepper = self.stepper_by_object(object)?;
                let obj = self
                    .front
                    .registry()
                    .object(object)
                    .map_err(|_| HandlerFailure)?;
                let role = obj
                    .pins()
                    .into_iter()
                    .find(|(_, pin)| *pin == pin_name)
                    .map(|(role, _)| role)
                    .ok_or(HandlerFailure)?;
                if role != "enable_pin" {
                    return Err(HandlerFailure);
                }
                PinSink::EnableBit(stepper.pin_word().clone())
            }
            _ => return Err(HandlerFailure),
        };
        let pin = DigitalOut::new(&self.front, oid, sink);
        pin.set_initial_value(p.u8("value")? != 0, p.u8("default_value")? != 0);
        pin.set_max_duration(p.u32("max_duration")?);
        self.insert_oid(oid, OidWrapper::Digital(pin))
    }

    fn cmd_set_digital_out(&self, p: &Params) -> HandlerResult {
        let (object, _) = self.object_from_pin_id(p.u32("pin")?, &[ObjectClass::DigitalPin])?;
        let mut opts = Options::new();
        opts.set("state", OptValue::Int((p.u8("value")? != 0) as i64));
        self.front.submit(object, "set", opts);
        Ok(())
    }

    // --- stepper ---

    fn cmd_config_stepper(&self, p: &Params) -> HandlerResult {
        let oid = p.u8("oid")?;
        let (object, _) = self.object_from_pin_id(p.u32("step_pin")?, &[ObjectClass::Stepper])?;
        let granted = self
            .front
            .exec_sync(object, "use_pins", enable_opts(true))
            .ok_or(HandlerFailure)?;
        if granted.status < 0 {
            self.front.shutdown("Stepper initialization failure");
            return Ok(());
        }
        let word = self
            .front
            .registry()
            .object(object)
            .map_err(|_| HandlerFailure)?
            .pin_word()
            .ok_or(HandlerFailure)?;
        let stepper = StepperPulse::new(
            &self.front,
            oid,
            object,
            word,
            p.u8("invert_step")?,
            p.u32("step_pulse_ticks")?,
        );
        self.insert_oid(oid, OidWrapper::Stepper(stepper))
    }

    fn cmd_stepper_get_position(&self, def: &'static CmdDef, p: &Params) -> HandlerResult {
        let oid = p.u8("oid")?;
        let stepper = self.stepper(oid)?;
        self.front.respond(
            def,
            &[
                ("oid", ParamValue::Uint(oid as u32)),
                ("pos", ParamValue::Int(stepper.position())),
            ],
        );
        Ok(())
    }

    fn cmd_stepper_stop_on_trigger(&self, p: &Params) -> HandlerResult {
        let stepper = self.stepper(p.u8("oid")?)?;
        let trsync = self.trsync(p.u8("trsync_oid")?)?;
        trsync.add_signal(stepper.stop_signal());
        Ok(())
    }

    // --- endstop ---

    fn cmd_config_endstop(&self, p: &Params) -> HandlerResult {
        let oid = p.u8("oid")?;
        let (object, _) = self.object_from_pin_id(
            p.u32("pin")?,
            &[ObjectClass::Endstop, ObjectClass::Probe],
        )?;
        let word = self
            .front
            .registry()
            .object(object)
            .map_err(|_| HandlerFailure)?
            .pin_word()
            .ok_or(HandlerFailure)?;
        let sampler = EndstopSampler::new(&self.front, oid, word);
        self.insert_oid(oid, OidWrapper::Endstop(sampler))
    }

    fn cmd_endstop_home(&self, p: &Params) -> HandlerResult {
        let endstop = self.endstop(p.u8("oid")?)?;
        let sample_count = p.u8("sample_count")?;
        let trsync = if sample_count != 0 {
            Some(self.trsync(p.u8("trsync_oid")?)?)
        } else {
            None
        };
        endstop.home(
            p.u32("clock")?,
            p.u32("sample_ticks")?,
            sample_count,
            p.u32("rest_ticks")?,
            p.u8("pin_value")?,
            trsync,
            p.u8("trigger_reason")?,
        );
        Ok(())
    }

    fn cmd_endstop_query_state(&self, def: &'static CmdDef, p: &Params) -> HandlerResult {
        let oid = p.u8("oid")?;
        let endstop = self.endstop(oid)?;
        let (homing, next_clock, pin_value) = endstop.query_state();
        self.front.respond(
            def,
            &[
                ("oid", ParamValue::Uint(oid as u32)),
                ("homing", ParamValue::Uint(homing as u32)),
                ("next_clock", ParamValue::Uint(next_clock)),
                ("pin_value", ParamValue::Uint(pin_value as u32)),
            ],
        );
        Ok(())
    }

    // --- pwm ---

    fn cmd_config_pwm_out(&self, p: &Params) -> HandlerResult {
        let oid = p.u8("oid")?;
        let (object, _) = self.object_from_pin_id(p.u32("pin")?, &[ObjectClass::Pwm])?;
        let pwm = PwmOut::new(&self.front, oid, object);
        if !pwm.set_params(
            p.u32("cycle_ticks")?,
            p.u16("value")?,
            p.u16("default_value")?,
            p.u32("max_duration")?,
        ) {
            self.front.sched().unregister(pwm.timer());
            return Err(HandlerFailure);
        }
        self.insert_oid(oid, OidWrapper::Pwm(pwm))
    }

    fn cmd_set_pwm_out(&self, p: &Params) -> HandlerResult {
        let (object, _) = self.object_from_pin_id(p.u32("pin")?, &[ObjectClass::Pwm])?;
        let value = p.u16("value")?;
        let pwm_max = self.front.registry().board().pwm_max;
        if p.u32("cycle_ticks")? == 0 || value > pwm_max {
            return Err(HandlerFailure);
        }
        let mut opts = Options::new();
        opts.set(
            "cycle",
            OptValue::Float(value as f64 * 100.0 / pwm_max as f64),
        );
        self.front.submit(object, "set_cycle", opts);
        Ok(())
    }

    // --- spi ---

    fn cmd_config_spi(&self, p: &Params) -> HandlerResult {
        let oid = p.u8("oid")?;
        let (object, _) = self.object_from_pin_id(p.u32("pin")?, &[])?;
        let spi = SpiTarget::new(&self.front, oid, object, p.u8("cs_active_high")? != 0);
        self.insert_oid(oid, OidWrapper::Spi(spi))
    }

    fn cmd_spi_set_software_bus(&self, p: &Params) -> HandlerResult {
        let spi = self.spi(p.u8("oid")?)?;
        let board = self.front.registry().board();
        let miso = board.pin_name(p.u32("miso_pin")?).ok_or(HandlerFailure)?;
        let mosi = board.pin_name(p.u32("mosi_pin")?).ok_or(HandlerFailure)?;
        let sclk = board.pin_name(p.u32("sclk_pin")?).ok_or(HandlerFailure)?;
        if !spi.set_software_bus(miso, mosi, sclk, p.u32("mode")?, p.u32("rate")?) {
            return Err(HandlerFailure);
        }
        Ok(())
    }

    fn cmd_spi_transfer(&self, def: &'static CmdDef, p: &Params) -> HandlerResult {
        let oid = p.u8("oid")?;
        let spi = self.spi(oid)?;
        let response = spi.transfer(p.bytes("data")?, true).ok_or(HandlerFailure)?;
        self.front.respond(
            def,
            &[
                ("oid", ParamValue::Uint(oid as u32)),
                ("response", ParamValue::Bytes(response)),
            ],
        );
        Ok(())
    }

    // --- neopixel ---

    fn cmd_config_neopixel(&self, p: &Params) -> HandlerResult {
        let oid = p.u8("oid")?;
        let (object, _) = self.object_from_pin_id(p.u32("pin")?, &[ObjectClass::Neopixel])?;
        let strip = NeopixelChain::new(&self.front, oid, object, p.u16("data_size")?)
            .ok_or(HandlerFailure)?;
        self.insert_oid(oid, OidWrapper::Neopixel(strip))
    }

    // --- buttons ---

    fn cmd_buttons_add(&self, p: &Params) -> HandlerResult {
        let bank = self.buttons(p.u8("oid")?)?;
        let pin_id = p.u32("pin")?;
        let (object, _) = self.object_from_pin_id(
            pin_id,
            &[ObjectClass::DigitalPin, ObjectClass::Encoder],
        )?;
        let pin_name = self
            .front
            .registry()
            .board()
            .pin_name(pin_id)
            .ok_or(HandlerFailure)?;
        if !bank.add_button(p.u8("pos")?, object, pin_name) {
            return Err(HandlerFailure);
        }
        Ok(())
    }

    // --- oid plumbing ---

    /// Resolves a wire pin id to the object owning that pin.
    fn object_from_pin_id(
        &self,
        pin_id: u32,
        classes: &[ObjectClass],
    ) -> Result<(ObjectId, ObjectClass), HandlerFailure> {
        let pin_name = self
            .front
            .registry()
            .board()
            .pin_name(pin_id)
            .ok_or(HandlerFailure)?;
        self.front
            .registry()
            .find_object_from_pin(&pin_name, classes)
            .ok_or(HandlerFailure)
    }

    /// Binds a wrapper to an OID slot; fails when the slot is outside the
    /// allocated range.
    fn insert_oid(&self, oid: u8, wrapper: OidWrapper) -> HandlerResult {
        let old = {
            let mut state = self.front.state();
            if oid >= state.oid_count {
                debug!(oid, count = state.oid_count, "oid outside allocated range");
                drop(state);
                wrapper.teardown(self.front.sched());
                return Err(HandlerFailure);
            }
            state.oids.insert(oid, wrapper)
        };
        if let Some(old) = old {
            old.teardown(self.front.sched());
        }
        Ok(())
    }

    fn wrapper(&self, oid: u8) -> Result<OidWrapper, HandlerFailure> {
        self.front
            .state()
            .oids
            .get(&oid)
            .cloned()
            .ok_or(HandlerFailure)
    }

    fn analog(&self, oid: u8) -> Result<Arc<AnalogPin>, HandlerFailure> {
        match self.wrapper(oid)? {
            OidWrapper::Analog(w) => Ok(w),
            _ => Err(HandlerFailure),
        }
    }

    fn digital(&self, oid: u8) -> Result<Arc<DigitalOut>, HandlerFailure> {
        match self.wrapper(oid)? {
            OidWrapper::Digital(w) => Ok(w),
            _ => Err(HandlerFailure),
        }
    }

    fn stepper(&self, oid: u8) -> Result<Arc<StepperPulse>, HandlerFailure> {
        match self.wrapper(oid)? {
            OidWrapper::Stepper(w) => Ok(w),
            _ => Err(HandlerFailure),
        }
    }

    fn stepper_by_object(&self, object: ObjectId) -> Result<Arc<StepperPulse>, HandlerFailure> {
        let state = self.front.state();
        state
            .oids
            .values()
            .find_map(|wrapper| match wrapper {
                OidWrapper::Stepper(w) if w.object() == object => Some(w.clone()),
                _ => None,
            })
            .ok_or(HandlerFailure)
    }

    fn endstop(&self, oid: u8) -> Result<Arc<EndstopSampler>, HandlerFailure> {
        match self.wrapper(oid)? {
            OidWrapper::Endstop(w) => Ok(w),
            _ => Err(HandlerFailure),
        }
    }

    fn trsync(&self, oid: u8) -> Result<Arc<TrSync>, HandlerFailure> {
        match self.wrapper(oid)? {
            OidWrapper::TrSync(w) => Ok(w),
            _ => Err(HandlerFailure),
        }
    }

    fn pwm(&self, oid: u8) -> Result<Arc<PwmOut>, HandlerFailure> {
        match self.wrapper(oid)? {
            OidWrapper::Pwm(w) => Ok(w),
            _ => Err(HandlerFailure),
        }
    }

    fn spi(&self, oid: u8) -> Result<Arc<SpiTarget>, HandlerFailure> {
        match self.wrapper(oid)? {
            OidWrapper::Spi(w) => Ok(w),
            _ => Err(HandlerFailure),
        }
    }

    fn neopixel(&self, oid: u8) -> Result<Arc<NeopixelChain>, HandlerFailure> {
        match self.wrapper(oid)? {
            OidWrapper::Neopixel(w) => Ok(w),
            _ => Err(HandlerFailure),
        }
    }

    fn buttons(&self, oid: u8) -> Result<Arc<ButtonBank>, HandlerFailure> {
        match self.wrapper(oid)? {
            OidWrapper::Buttons(w) => Ok(w),
            _ => Err(HandlerFailure),
        }
    }
}

fn enable_opts(enable: bool) -> Options {
    let mut opts = Options::new();
    opts.set("enable", OptValue::Bool(enable));
    opts
}
