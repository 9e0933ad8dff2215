//! Shared front-end services.
//!
//! The [`Frontend`] bundles everything both the protocol session and the
//! timer-driven OID wrappers need: the message dictionary, the framed
//! response writer, the shutdown path, the object bus, and the shared move
//! queue. Wrappers hold it by `Weak` reference so tearing a session down
//! releases them.

use crate::helpers::OidWrapper;
use crate::move_queue::MoveQueue;
use crate::proto_defs::{self, CmdDef, STATIC_STRINGS, STATS_SUMSQ_BASE};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};
use voxel_core::clock::{tick_before, Clock};
use voxel_core::object::{ObjectId, Options, Status};
use voxel_core::queue::{Completion, CommandQueue};
use voxel_core::registry::Registry;
use voxel_core::timers::Scheduler;
use voxel_proto::framing::{build_frame, MESSAGE_PAYLOAD_MAX};
use voxel_proto::identity::{
    ConfigValue, EnumValue, Identity, IDENTIFY_FORMAT, IDENTIFY_RESPONSE_FORMAT,
    IDENTIFY_RESPONSE_TAG, IDENTIFY_TAG, TAG_BASE,
};
use voxel_proto::message::{MessageRegistry, ParamValue};
use voxel_proto::Error as ProtoError;

/// Capacity of the shared move queue, reported as `move_count`.
pub const MOVE_QUEUE_SIZE: usize = 1024;

/// Session-wide mutable protocol state.
pub struct SessionState {
    pub shutdown: bool,
    pub shutdown_reason: u16,
    pub config_crc: u32,
    pub oid_count: u8,
    pub oids: HashMap<u8, OidWrapper>,
    pub clock_high: u32,
    pub stats: Stats,
}

/// Accumulators for the periodic `stats` report.
#[derive(Default)]
pub struct Stats {
    pub count: u32,
    pub sum: u32,
    pub sumsq: u32,
    pub sent_tick: u32,
    pub last_tick: u32,
}

/// Shared services for one protocol session.
pub struct Frontend {
    registry: Arc<Registry>,
    sched: Arc<Scheduler>,
    clock: Arc<Clock>,
    bus: Arc<CommandQueue>,
    moves: MoveQueue,
    msgs: MessageRegistry,
    identity_blob: Vec<u8>,
    commands: HashMap<&'static str, &'static CmdDef>,
    string_ids: HashMap<&'static str, u16>,
    writer: Mutex<Box<dyn Write + Send>>,
    sequence: AtomicU8,
    state: Mutex<SessionState>,
}

impl Frontend {
    /// Builds the front end: enumerates the registry's hardware, constructs
    /// the identity dictionary and message registry, and caches the
    /// compressed identity blob.
    pub fn new(
        registry: Arc<Registry>,
        sched: Arc<Scheduler>,
        bus: Arc<CommandQueue>,
        writer: Box<dyn Write + Send>,
    ) -> Result<Arc<Self>, ProtoError> {
        use voxel_core::object::ObjectClass as C;

        let clock = sched.clock().clone();
        let mut identity = Identity::new(proto_defs::PROTOCOL_VERSION);
        let mut msgs = MessageRegistry::new();
        msgs.insert(IDENTIFY_RESPONSE_FORMAT, IDENTIFY_RESPONSE_TAG)?;
        msgs.insert(IDENTIFY_FORMAT, IDENTIFY_TAG)?;
        let mut commands: HashMap<&'static str, &'static CmdDef> = HashMap::new();
        commands.insert("identify", &proto_defs::IDENTIFY);

        let mut next_tag = TAG_BASE;
        let mut add_group = |group: &[&'static CmdDef],
                             identity: &mut Identity,
                             msgs: &mut MessageRegistry,
                             commands: &mut HashMap<&'static str, &'static CmdDef>|
         -> Result<(), ProtoError> {
            for def in group {
                if let Some(format) = def.command {
                    identity.commands.insert(format.to_string(), next_tag);
                    msgs.insert(format, next_tag)?;
                    if let Some(name) = def.name() {
                        commands.insert(name, *def);
                    }
                    next_tag += 1;
                }
                if let Some(format) = def.response {
                    identity.responses.insert(format.to_string(), next_tag);
                    msgs.insert(format, next_tag)?;
                    next_tag += 1;
                }
            }
            Ok(())
        };

        add_group(proto_defs::BASECMD, &mut identity, &mut msgs, &mut commands)?;
        add_group(proto_defs::SCHED, &mut identity, &mut msgs, &mut commands)?;
        add_group(proto_defs::DEBUGCMDS, &mut identity, &mut msgs, &mut commands)?;
        if registry.count(C::Stepper) > 0 {
            add_group(proto_defs::STEPPER, &mut identity, &mut msgs, &mut commands)?;
            add_group(proto_defs::TRSYNC, &mut identity, &mut msgs, &mut commands)?;
        }
        let gpio_objects = registry.count(C::DigitalPin)
            + registry.count(C::Endstop)
            + registry.count(C::Probe)
            + registry.count(C::Heater)
            + registry.count(C::Stepper)
            + registry.count(C::Fan);
        if gpio_objects > 0 {
            add_group(proto_defs::GPIOCMDS, &mut identity, &mut msgs, &mut commands)?;
            add_group(proto_defs::ENDSTOP, &mut identity, &mut msgs, &mut commands)?;
        }
        if registry.count(C::Thermistor) > 0 {
            add_group(proto_defs::ADCCMDS, &mut identity, &mut msgs, &mut commands)?;
            identity.config.insert(
                "ADC_MAX".to_string(),
                ConfigValue::Uint(registry.board().adc_max as u64),
            );
        }
        if registry.count(C::Heater) + registry.count(C::Pwm) + registry.count(C::Fan) > 0 {
            add_group(proto_defs::PWMCMDS, &mut identity, &mut msgs, &mut commands)?;
            identity.config.insert(
                "PWM_MAX".to_string(),
                ConfigValue::Uint(registry.board().pwm_max as u64),
            );
        }
        if !registry.board().spi_buses.is_empty() {
            add_group(proto_defs::SPICMDS, &mut identity, &mut msgs, &mut commands)?;
        }
        if registry.count(C::Display) > 0 {
            add_group(proto_defs::BUTTONS, &mut identity, &mut msgs, &mut commands)?;
        }
        if registry.count(C::Neopixel) > 0 {
            add_group(proto_defs::NEOPIXEL, &mut identity, &mut msgs, &mut commands)?;
        }

        // Pin banks become `[base, count]` enumeration ranges.
        let mut pins = std::collections::BTreeMap::new();
        for (label, base, count) in registry.board().pin_enumeration() {
            pins.insert(label, EnumValue::Range([base, count]));
        }
        identity.enumerations.insert("pin".to_string(), pins);

        let mut string_ids = HashMap::new();
        let mut strings = std::collections::BTreeMap::new();
        for (id, text) in STATIC_STRINGS.iter().enumerate() {
            string_ids.insert(*text, id as u16);
            strings.insert(text.to_string(), EnumValue::Id(id as u32));
        }
        identity
            .enumerations
            .insert("static_string_id".to_string(), strings);

        identity.config.insert(
            "CLOCK_FREQ".to_string(),
            ConfigValue::Uint(clock.frequency() as u64),
        );
        identity.config.insert(
            "STATS_SUMSQ_BASE".to_string(),
            ConfigValue::Uint(STATS_SUMSQ_BASE as u64),
        );

        let identity_blob = identity.compress()?;
        info!(
            commands = identity.commands.len(),
            responses = identity.responses.len(),
            blob = identity_blob.len(),
            "identity dictionary built"
        );

        Ok(Arc::new(Frontend {
            registry,
            sched,
            clock,
            bus,
            moves: MoveQueue::new(MOVE_QUEUE_SIZE),
            msgs,
            identity_blob,
            commands,
            string_ids,
            writer: Mutex::new(writer),
            sequence: AtomicU8::new(1),
            state: Mutex::new(SessionState {
                shutdown: false,
                shutdown_reason: 0,
                config_crc: 0,
                oid_count: 0,
                oids: HashMap::new(),
                clock_high: 0,
                stats: Stats::default(),
            }),
        }))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn sched(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn moves(&self) -> &MoveQueue {
        &self.moves
    }

    pub fn msgs(&self) -> &MessageRegistry {
        &self.msgs
    }

    /// The handler definition for a command name, if registered.
    pub fn command_def(&self, name: &str) -> Option<&'static CmdDef> {
        self.commands.get(name).copied()
    }

    pub fn now(&self) -> u32 {
        self.clock.now()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    /// A slice of the compressed identity blob.
    pub fn identity_chunk(&self, offset: u32, count: u8) -> &[u8] {
        let start = (offset as usize).min(self.identity_blob.len());
        let end = (start + count as usize).min(self.identity_blob.len());
        &self.identity_blob[start..end]
    }

    /// Resolves a shutdown reason to its static-string id.
    pub fn string_id(&self, reason: &str) -> u16 {
        match self.string_ids.get(reason) {
            Some(id) => *id,
            None => {
                warn!(reason, "unknown static string");
                0
            }
        }
    }

    /// The sequence number stamped on the next outbound frame.
    pub fn sequence(&self) -> u8 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn set_sequence(&self, sequence: u8) {
        self.sequence.store(sequence, Ordering::SeqCst);
    }

    /// Emits a framed response for `def`, silently doing nothing when the
    /// definition has no response message.
    pub fn respond(&self, def: &CmdDef, params: &[(&str, ParamValue)]) {
        let Some(format) = def.response else {
            return;
        };
        let name = format.split_ascii_whitespace().next().unwrap_or(format);
        match self.msgs.encode_by_name(name, params) {
            Ok(payload) => self.send_payload(&payload),
            Err(err) => error!(%err, name, "response encode failed"),
        }
    }

    /// Emits an empty frame carrying the current expected sequence number.
    /// Serves as both ACK (matching sequence) and NACK (after a reject).
    pub fn send_ack(&self) {
        self.send_payload(&[]);
    }

    fn send_payload(&self, payload: &[u8]) {
        if payload.len() > MESSAGE_PAYLOAD_MAX {
            error!(len = payload.len(), "response payload exceeds frame limit");
            return;
        }
        let frame = build_frame(self.sequence(), payload);
        let mut writer = self.writer.lock();
        if let Err(err) = writer.write_all(&frame).and_then(|_| writer.flush()) {
            debug!(%err, "host link write failed");
        }
    }

    /// Protocol-fatal shutdown: records the reason, tears down all OID
    /// wrappers, and reports `shutdown` to the host. Callable from timer
    /// callbacks.
    pub fn shutdown(&self, reason: &str) {
        warn!(reason, "protocol shutdown");
        let string_id = self.string_id(reason);
        let torn_down = {
            let mut state = self.state.lock();
            state.shutdown = true;
            state.shutdown_reason = string_id;
            state.oid_count = 0;
            std::mem::take(&mut state.oids)
        };
        for wrapper in torn_down.values() {
            wrapper.teardown(&self.sched);
        }
        self.moves.clear_all();
        self.respond(
            &proto_defs::SHUTDOWN,
            &[
                ("clock", ParamValue::Uint(self.now())),
                ("static_string_id", ParamValue::Uint(string_id as u32)),
            ],
        );
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Drops every OID wrapper and its timers. Used by `allocate_oids`,
    /// `reset`, and session teardown.
    pub fn reset_oids(&self) {
        let torn_down = {
            let mut state = self.state.lock();
            state.oid_count = 0;
            std::mem::take(&mut state.oids)
        };
        for wrapper in torn_down.values() {
            wrapper.teardown(&self.sched);
        }
        self.moves.clear_all();
    }

    /// Submits a command to an object through the bus, fire-and-forget.
    pub fn submit(&self, object: ObjectId, cmd_name: &str, opts: Options) {
        match self.resolve_cmd(object, cmd_name) {
            Ok(cmd) => {
                if let Err(err) = self.bus.queue_command(object, cmd, opts, None) {
                    warn!(%err, object, cmd_name, "bus submit failed");
                }
            }
            Err(err) => warn!(%err, object, cmd_name, "bus resolve failed"),
        }
    }

    /// Submits a command with a completion callback. The callback runs on
    /// the queue worker thread exactly once.
    pub fn resolve_and_queue<F>(
        &self,
        object: ObjectId,
        cmd_name: &str,
        opts: Options,
        callback: F,
    ) -> Result<(), ()>
    where
        F: FnOnce(u64, i32, Option<Status>) + Send + 'static,
    {
        let cmd = self.resolve_cmd(object, cmd_name).map_err(|err| {
            warn!(%err, object, cmd_name, "bus resolve failed");
        })?;
        self.bus
            .queue_command(object, cmd, opts, Some(Box::new(callback)))
            .map(|_| ())
            .map_err(|err| {
                warn!(%err, object, cmd_name, "bus submit failed");
            })
    }

    /// Submits a command and blocks for its completion. Only legal on the
    /// protocol thread; the queue worker delivers the completion.
    pub fn exec_sync(&self, object: ObjectId, cmd_name: &str, opts: Options) -> Option<Completion> {
        let cmd = match self.resolve_cmd(object, cmd_name) {
            Ok(cmd) => cmd,
            Err(err) => {
                warn!(%err, object, cmd_name, "bus resolve failed");
                return None;
            }
        };
        let id = match self.bus.queue_command(object, cmd, opts, None) {
            Ok(id) => id,
            Err(err) => {
                warn!(%err, object, cmd_name, "bus submit failed");
                return None;
            }
        };
        self.bus.wait_for(&[id]).into_iter().next()
    }

    fn resolve_cmd(&self, object: ObjectId, cmd_name: &str) -> Result<u32, voxel_core::CoreError> {
        let obj = self.registry.object(object)?;
        obj.commands()
            .iter()
            .find(|spec| spec.name == cmd_name)
            .map(|spec| spec.id)
            .ok_or_else(|| {
                voxel_core::CoreError::InvalidArg(format!("no command '{cmd_name}'"))
            })
    }

    /// One object's frozen status snapshot.
    pub fn query_one(&self, id: ObjectId) -> Option<Status> {
        self.registry.query(&[id]).remove(&id)
    }

    /// Arms the periodic stats task and wires scheduler faults into the
    /// shutdown path. Called once when the session starts.
    pub fn start_tasks(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.sched.set_fault_hook(Box::new(move |reason| {
            if let Some(front) = weak.upgrade() {
                front.shutdown(reason);
            }
        }));

        let now = self.now();
        {
            let mut state = self.state.lock();
            state.stats.last_tick = now;
            state.stats.sent_tick = now;
        }
        let weak = Arc::downgrade(self);
        let first = now.wrapping_add(self.clock.ticks_from_us(100_000));
        self.sched.register(
            Box::new(move |ticks| match weak.upgrade() {
                Some(front) => front.stats_tick(ticks),
                None => 0,
            }),
            first,
        );
    }

    /// The stats accumulator task: runs every ~100ms of virtual time and
    /// reports every ~5s, detecting 32-bit clock wrap along the way.
    fn stats_tick(&self, ticks: u32) -> u32 {
        let cadence = self.clock.ticks_from_us(100_000).max(1);
        let period = self.clock.ticks_from_us(5_000_000);
        let mut report = None;
        {
            let mut state = self.state.lock();
            let stats = &mut state.stats;
            let diff = ticks.wrapping_sub(stats.last_tick);
            stats.last_tick = ticks;
            stats.sum = stats.sum.wrapping_add(diff);
            stats.count = stats.count.wrapping_add(1);
            let nextsumsq = if diff <= 0xffff {
                stats
                    .sumsq
                    .saturating_add(div_round_up(diff as u64 * diff as u64, STATS_SUMSQ_BASE as u64))
            } else if diff <= 0xfffff {
                stats
                    .sumsq
                    .saturating_add(div_round_up(diff as u64, STATS_SUMSQ_BASE as u64).saturating_mul(diff))
            } else {
                u32::MAX
            };
            stats.sumsq = nextsumsq;
            if !tick_before(ticks, stats.sent_tick.wrapping_add(period)) {
                report = Some((stats.count, stats.sum, stats.sumsq));
                if ticks < stats.sent_tick {
                    state.clock_high = state.clock_high.wrapping_add(1);
                }
                let stats = &mut state.stats;
                stats.sent_tick = ticks;
                stats.count = 0;
                stats.sum = 0;
                stats.sumsq = 0;
            }
        }
        if let Some((count, sum, sumsq)) = report {
            self.respond(
                &proto_defs::STATS,
                &[
                    ("count", ParamValue::Uint(count)),
                    ("sum", ParamValue::Uint(sum)),
                    ("sumsq", ParamValue::Uint(sumsq)),
                ],
            );
        }
        ticks.wrapping_add(cadence)
    }

    /// The `high` word reported by `get_uptime`, including the correction
    /// for a wrap that has happened since the last stats report.
    pub fn uptime_high(&self, runtime: u32) -> u32 {
        let state = self.state.lock();
        state
            .clock_high
            .wrapping_add((runtime < state.stats.sent_tick) as u32)
    }
}

fn div_round_up(x: u64, y: u64) -> u32 {
    ((x + y - 1) / y).min(u32::MAX as u64) as u32
}
