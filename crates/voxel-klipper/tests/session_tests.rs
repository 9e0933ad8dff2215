//! End-to-end protocol session tests.
//!
//! Each test drives a full stack (registry, scheduler, bus worker,
//! session) over an in-memory link: host frames go in through
//! `Session::process_bytes`, MCU frames come back out of a captured
//! writer, and virtual time is advanced by hand.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use voxel_core::board::Board;
use voxel_core::clock::Clock;
use voxel_core::object::{ObjectClass, Options, OptValue};
use voxel_core::objects::create_object;
use voxel_core::queue::{drain_one, CommandQueue};
use voxel_core::registry::{Registry, RegistryBuilder};
use voxel_core::timers::Scheduler;
use voxel_klipper::{Frontend, Session};
use voxel_proto::framing::{
    build_frame, check_packet, MESSAGE_HEADER_SIZE, MESSAGE_TRAILER_SIZE,
};
use voxel_proto::message::ParamValue;

#[derive(Clone, Default)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Harness {
    clock: Arc<Clock>,
    sched: Arc<Scheduler>,
    registry: Arc<Registry>,
    session: Session,
    captured: CaptureWriter,
    host_seq: u8,
    worker_stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl Harness {
    fn new() -> Harness {
        let mut builder = RegistryBuilder::new(Board::generic(1_000_000));
        let specs: &[(ObjectClass, &str, &[(&str, &str)])] = &[
            (
                ObjectClass::Stepper,
                "stepper_x",
                &[("step_pin", "PA1"), ("dir_pin", "PA2"), ("enable_pin", "PA3")],
            ),
            (ObjectClass::Endstop, "endstop_x", &[("pin", "PA4")]),
            (ObjectClass::Thermistor, "hotend_sensor", &[("pin", "PC0")]),
            (ObjectClass::Heater, "hotend", &[("pin", "PC8")]),
            (ObjectClass::DigitalPin, "led", &[("pin", "PC7")]),
            (ObjectClass::Pwm, "part_fan", &[("pin", "PC9")]),
            (ObjectClass::Neopixel, "chamber_leds", &[("pin", "PB0")]),
            (
                ObjectClass::Display,
                "lcd",
                &[("cs_pin", "PD10"), ("sclk_pin", "PD11"), ("data_pin", "PD12")],
            ),
        ];
        for (class, name, options) in specs {
            let mut opts = Options::new();
            for (key, value) in *options {
                opts.set(key, OptValue::Str(value.to_string()));
            }
            let object =
                create_object(*class, builder.next_id(), name, &opts, builder.board()).unwrap();
            builder.register(object).unwrap();
        }
        let registry = builder.build();

        let clock = Arc::new(Clock::new(1_000_000));
        let sched = Scheduler::new(clock.clone());
        let bus = Arc::new(CommandQueue::new(64));
        let captured = CaptureWriter::default();
        let front = Frontend::new(
            registry.clone(),
            sched.clone(),
            bus.clone(),
            Box::new(captured.clone()),
        )
        .unwrap();
        let session = Session::new(front);

        let worker_stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let bus = bus.clone();
            let registry = registry.clone();
            let stop = worker_stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    drain_one(&bus, &registry, Duration::from_millis(5));
                }
            })
        };

        Harness {
            clock,
            sched,
            registry,
            session,
            captured,
            host_seq: 1,
            worker_stop,
            worker: Some(worker),
        }
    }

    /// Encodes and feeds one host command frame.
    fn send(&mut self, name: &str, params: &[(&str, ParamValue)]) {
        let payload = self
            .session
            .frontend()
            .msgs()
            .encode_by_name(name, params)
            .unwrap();
        let frame = build_frame(self.host_seq, &payload);
        self.host_seq = (self.host_seq + 1) & 0x0f;
        self.session.process_bytes(&frame);
    }

    /// Advances virtual time and dispatches all due timers.
    fn run_until(&self, tick: u32) {
        let now = self.clock.now();
        assert!(tick >= now, "cannot run backwards");
        // Step in small increments so interleaved deadlines fire in order.
        let mut at = now;
        while at < tick {
            at = (at + 10).min(tick);
            self.clock.advance(at - self.clock.now());
            self.sched.run_pending();
        }
        self.sched.run_pending();
    }

    /// Decodes every complete captured MCU frame into (name, params)
    /// pairs, dropping empty ACK/NACK frames.
    fn take_responses(&self) -> Vec<(String, Vec<ParamValue>)> {
        let mut buf = self.captured.0.lock();
        let data = buf.clone();
        let mut out = Vec::new();
        let mut start = 0;
        while start < data.len() {
            let n = check_packet(&data[start..]);
            if n == 0 {
                break;
            }
            if n < 0 {
                start += (-n) as usize;
                continue;
            }
            let frame = &data[start..start + n as usize];
            start += n as usize;
            let payload = &frame[MESSAGE_HEADER_SIZE..frame.len() - MESSAGE_TRAILER_SIZE];
            let mut pos = 0;
            while pos < payload.len() {
                let (schema, values) = self
                    .session
                    .frontend()
                    .msgs()
                    .decode_next(payload, &mut pos)
                    .unwrap();
                out.push((schema.name.clone(), values));
            }
        }
        buf.drain(..start);
        out
    }

    fn find_response<'a>(
        responses: &'a [(String, Vec<ParamValue>)],
        name: &str,
    ) -> Option<&'a Vec<ParamValue>> {
        responses
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values)
    }

    fn pin_id(&self, pin: &str) -> u32 {
        self.registry.board().pin_id(pin).unwrap()
    }

    /// Sets a backing object's bus-visible state synchronously.
    fn object_command(&self, class: ObjectClass, name: &str, cmd: &str, opts: Options) {
        let id = self.registry.lookup(class, name).unwrap();
        let (_, cmd_id) = self
            .registry
            .resolve_command(class.as_str(), name, cmd)
            .unwrap();
        let result = self.registry.exec(id, cmd_id, &opts).unwrap();
        assert_eq!(result.status, 0);
    }

    /// Polls a predicate until it holds or a wall-clock deadline passes;
    /// covers effects routed through the worker thread.
    fn wait_until(&self, what: &str, predicate: impl Fn(&Self) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if predicate(self) {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("timed out waiting for {what}");
    }

    fn led_state(&self) -> bool {
        let id = self
            .registry
            .lookup(ObjectClass::DigitalPin, "led")
            .unwrap();
        self.registry.query(&[id])[&id]["state"]
            .as_bool()
            .unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.worker_stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn uint(values: &[ParamValue], index: usize) -> u32 {
    match values[index] {
        ParamValue::Uint(v) => v,
        ParamValue::Int(v) => v as u32,
        _ => panic!("parameter {index} is not numeric"),
    }
}

#[test]
fn allocate_and_finalize_config_ordering() {
    let mut h = Harness::new();
    // finalize without allocate: crc echoes back but no config.
    h.send("finalize_config", &[("crc", ParamValue::Uint(0xdead))]);
    h.send("get_config", &[]);
    let responses = h.take_responses();
    let config = Harness::find_response(&responses, "config").unwrap();
    assert_eq!(uint(config, 0), 0); // is_config
    assert_eq!(uint(config, 1), 0xdead); // crc
    assert_eq!(uint(config, 3), 0); // move_count

    h.send("allocate_oids", &[("count", ParamValue::Uint(8))]);
    h.send("finalize_config", &[("crc", ParamValue::Uint(0xbeef))]);
    h.send("get_config", &[]);
    let responses = h.take_responses();
    let config = Harness::find_response(&responses, "config").unwrap();
    assert_eq!(uint(config, 0), 1);
    assert_eq!(uint(config, 1), 0xbeef);
    assert_eq!(uint(config, 3), 1024);
}

#[test]
fn config_with_oid_out_of_range_shuts_down() {
    let mut h = Harness::new();
    h.send("allocate_oids", &[("count", ParamValue::Uint(2))]);
    h.send(
        "config_trsync",
        &[("oid", ParamValue::Uint(5))], // >= allocated count
    );
    let responses = h.take_responses();
    let shutdown = Harness::find_response(&responses, "shutdown").unwrap();
    assert_eq!(uint(shutdown, 1), 2); // "Command failure"
}

#[test]
fn digital_out_update_safety_reverts_without_shutdown() {
    let mut h = Harness::new();
    h.send("allocate_oids", &[("count", ParamValue::Uint(4))]);
    h.send(
        "config_digital_out",
        &[
            ("oid", ParamValue::Uint(0)),
            ("pin", ParamValue::Uint(h.pin_id("PC7"))),
            ("value", ParamValue::Uint(0)),
            ("default_value", ParamValue::Uint(0)),
            ("max_duration", ParamValue::Uint(1000)),
        ],
    );
    h.run_until(100);
    h.send("update_digital_out", &[("oid", ParamValue::Uint(0)), ("value", ParamValue::Uint(1))]);
    h.wait_until("led on", |h| h.led_state());

    // At the end of max_duration the level reverts; no shutdown.
    h.run_until(1100);
    h.wait_until("led reverted", |h| !h.led_state());
    let responses = h.take_responses();
    assert!(Harness::find_response(&responses, "shutdown").is_none());

    // A scheduled event past the safety deadline is fatal.
    h.run_until(1200);
    h.send("update_digital_out", &[("oid", ParamValue::Uint(0)), ("value", ParamValue::Uint(1))]);
    h.send(
        "queue_digital_out",
        &[
            ("oid", ParamValue::Uint(0)),
            ("clock", ParamValue::Uint(3000)),
            ("on_ticks", ParamValue::Uint(0)),
        ],
    );
    let responses = h.take_responses();
    let shutdown = Harness::find_response(&responses, "shutdown").unwrap();
    // "Scheduled digital out event will exceed max duration"
    assert_eq!(uint(shutdown, 1), 8);
}

#[test]
fn stepper_ramp_produces_expected_pulse_times() {
    let mut h = Harness::new();
    h.send("allocate_oids", &[("count", ParamValue::Uint(4))]);
    h.send(
        "config_stepper",
        &[
            ("oid", ParamValue::Uint(0)),
            ("step_pin", ParamValue::Uint(h.pin_id("PA1"))),
            ("dir_pin", ParamValue::Uint(h.pin_id("PA2"))),
            ("invert_step", ParamValue::Uint(0)),
            ("step_pulse_ticks", ParamValue::Uint(10)),
        ],
    );
    h.send("set_next_step_dir", &[("oid", ParamValue::Uint(0)), ("dir", ParamValue::Uint(1))]);
    h.send("reset_step_clock", &[("oid", ParamValue::Uint(0)), ("clock", ParamValue::Uint(1000))]);
    h.send(
        "queue_step",
        &[
            ("oid", ParamValue::Uint(0)),
            ("interval", ParamValue::Uint(100)),
            ("count", ParamValue::Uint(5)),
            ("add", ParamValue::Int(10)),
        ],
    );

    let stepper_id = h.registry.lookup(ObjectClass::Stepper, "stepper_x").unwrap();
    let steps = |h: &Harness| {
        h.registry.query(&[stepper_id])[&stepper_id]["steps"]
            .as_u32()
            .unwrap()
    };

    // Ramped pulse times: 1100, 1210, 1330, 1460, 1600.
    for (expect, tick) in [(0, 1099), (1, 1100), (1, 1209), (2, 1210), (3, 1330), (4, 1460), (5, 1600)] {
        h.run_until(tick);
        assert_eq!(steps(&h), expect, "step count at tick {tick}");
    }

    h.send("stepper_get_position", &[("oid", ParamValue::Uint(0))]);
    let responses = h.take_responses();
    let position = Harness::find_response(&responses, "stepper_position").unwrap();
    assert_eq!(position[1], ParamValue::Int(5));
}

#[test]
fn queue_step_with_zero_count_is_fatal() {
    let mut h = Harness::new();
    h.send("allocate_oids", &[("count", ParamValue::Uint(4))]);
    h.send(
        "config_stepper",
        &[
            ("oid", ParamValue::Uint(0)),
            ("step_pin", ParamValue::Uint(h.pin_id("PA1"))),
            ("dir_pin", ParamValue::Uint(h.pin_id("PA2"))),
            ("invert_step", ParamValue::Uint(0)),
            ("step_pulse_ticks", ParamValue::Uint(10)),
        ],
    );
    h.send(
        "queue_step",
        &[
            ("oid", ParamValue::Uint(0)),
            ("interval", ParamValue::Uint(100)),
            ("count", ParamValue::Uint(0)),
            ("add", ParamValue::Int(0)),
        ],
    );
    let responses = h.take_responses();
    let shutdown = Harness::find_response(&responses, "shutdown").unwrap();
    assert_eq!(uint(shutdown, 1), 4); // "Invalid count parameter"
}

#[test]
fn endstop_homing_triggers_trsync_once() {
    let mut h = Harness::new();
    h.send("allocate_oids", &[("count", ParamValue::Uint(4))]);
    h.send("config_trsync", &[("oid", ParamValue::Uint(1))]);
    h.send(
        "config_endstop",
        &[
            ("oid", ParamValue::Uint(0)),
            ("pin", ParamValue::Uint(h.pin_id("PA4"))),
            ("pull_up", ParamValue::Uint(0)),
        ],
    );
    h.send(
        "trsync_start",
        &[
            ("oid", ParamValue::Uint(1)),
            ("report_clock", ParamValue::Uint(0)),
            ("report_ticks", ParamValue::Uint(0)),
            ("expire_reason", ParamValue::Uint(4)),
        ],
    );
    h.send(
        "endstop_home",
        &[
            ("oid", ParamValue::Uint(0)),
            ("clock", ParamValue::Uint(500)),
            ("sample_ticks", ParamValue::Uint(10)),
            ("sample_count", ParamValue::Uint(4)),
            ("rest_ticks", ParamValue::Uint(50)),
            ("pin_value", ParamValue::Uint(1)),
            ("trsync_oid", ParamValue::Uint(1)),
            ("trigger_reason", ParamValue::Uint(7)),
        ],
    );
    h.take_responses();

    // First sample at 500 sees the pin low; it reads high from 550 on.
    h.run_until(540);
    let mut opts = Options::new();
    opts.set("state", OptValue::Int(1));
    h.object_command(ObjectClass::Endstop, "endstop_x", "set", opts);

    // Four consecutive confirmations at 550, 560, 570, 580.
    h.run_until(1000);
    let responses = h.take_responses();
    let reports: Vec<_> = responses
        .iter()
        .filter(|(name, _)| name == "trsync_state")
        .collect();
    assert_eq!(reports.len(), 1, "trigger fires exactly once");
    let report = &reports[0].1;
    assert_eq!(uint(report, 1), 0); // can_trigger cleared
    assert_eq!(uint(report, 2), 7); // trigger_reason
    assert_eq!(uint(report, 3), 580); // trigger clock

    // The endstop reports idle afterwards.
    h.send("endstop_query_state", &[("oid", ParamValue::Uint(0))]);
    let responses = h.take_responses();
    let state = Harness::find_response(&responses, "endstop_state").unwrap();
    assert_eq!(uint(state, 1), 0); // homing done
    assert_eq!(uint(state, 3), 1); // pin still high
}

#[test]
fn trsync_timeout_fires_expire_reason() {
    let mut h = Harness::new();
    h.send("allocate_oids", &[("count", ParamValue::Uint(2))]);
    h.send("config_trsync", &[("oid", ParamValue::Uint(0))]);
    h.send(
        "trsync_start",
        &[
            ("oid", ParamValue::Uint(0)),
            ("report_clock", ParamValue::Uint(0)),
            ("report_ticks", ParamValue::Uint(0)),
            ("expire_reason", ParamValue::Uint(4)),
        ],
    );
    h.send(
        "trsync_set_timeout",
        &[("oid", ParamValue::Uint(0)), ("clock", ParamValue::Uint(800))],
    );
    h.take_responses();
    h.run_until(900);
    let responses = h.take_responses();
    let state = Harness::find_response(&responses, "trsync_state").unwrap();
    assert_eq!(uint(state, 1), 0);
    assert_eq!(uint(state, 2), 4); // expire reason
}

#[test]
fn shutdown_gates_commands_until_cleared() {
    let mut h = Harness::new();
    h.send("allocate_oids", &[("count", ParamValue::Uint(4))]);
    h.send("emergency_stop", &[]);
    let responses = h.take_responses();
    let shutdown = Harness::find_response(&responses, "shutdown").unwrap();
    assert_eq!(uint(shutdown, 1), 3); // "Command request"

    // Flagged commands still run during shutdown.
    h.send("get_clock", &[]);
    let responses = h.take_responses();
    assert!(Harness::find_response(&responses, "clock").is_some());

    // Unflagged commands are rejected with is_shutdown.
    h.send("allocate_oids", &[("count", ParamValue::Uint(4))]);
    let responses = h.take_responses();
    let gated = Harness::find_response(&responses, "is_shutdown").unwrap();
    assert_eq!(uint(gated, 0), 3);

    h.send("clear_shutdown", &[]);
    h.send("allocate_oids", &[("count", ParamValue::Uint(4))]);
    let responses = h.take_responses();
    assert!(Harness::find_response(&responses, "is_shutdown").is_none());
}

#[test]
fn sequence_numbers_advance_only_for_accepted_frames() {
    let mut h = Harness::new();
    let payload = h
        .session
        .frontend()
        .msgs()
        .encode_by_name("debug_nop", &[])
        .unwrap();

    // In-order frame: accepted, ACK carries the next sequence.
    let frame = build_frame(1, &payload);
    h.session.process_bytes(&frame);
    assert_eq!(h.session.frontend().sequence(), 2);

    // Out-of-order frame: NACKed, expected sequence does not advance.
    let frame = build_frame(9, &payload);
    h.session.process_bytes(&frame);
    assert_eq!(h.session.frontend().sequence(), 2);

    // The retransmission with the right sequence is accepted.
    let frame = build_frame(2, &payload);
    h.session.process_bytes(&frame);
    assert_eq!(h.session.frontend().sequence(), 3);
}

#[test]
fn identify_serves_the_compressed_dictionary_in_chunks() {
    use std::io::Read;

    let mut h = Harness::new();
    let mut blob = Vec::new();
    let mut offset = 0u32;
    loop {
        h.send(
            "identify",
            &[
                ("offset", ParamValue::Uint(offset)),
                ("count", ParamValue::Uint(40)),
            ],
        );
        let responses = h.take_responses();
        let reply = Harness::find_response(&responses, "identify_response").unwrap();
        assert_eq!(uint(reply, 0), offset);
        let ParamValue::Bytes(chunk) = &reply[1] else {
            panic!("identify data is not a byte slice");
        };
        if chunk.is_empty() {
            break;
        }
        blob.extend_from_slice(chunk);
        offset += chunk.len() as u32;
    }

    let mut json = String::new();
    flate2::read::ZlibDecoder::new(&blob[..])
        .read_to_string(&mut json)
        .unwrap();
    let identity: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(identity["commands"]
        .as_object()
        .unwrap()
        .keys()
        .any(|k| k.starts_with("queue_step ")));
    assert_eq!(identity["config"]["CLOCK_FREQ"], 1_000_000);
    assert_eq!(
        identity["enumerations"]["static_string_id"]["Timer too close"],
        5
    );
    assert_eq!(identity["enumerations"]["pin"]["PA0"][0], 0);
}

#[test]
fn analog_sampler_reports_and_range_checks() {
    let mut h = Harness::new();
    let mut opts = Options::new();
    opts.set("value", OptValue::Int(500));
    h.object_command(ObjectClass::Thermistor, "hotend_sensor", "set_adc", opts);

    h.send("allocate_oids", &[("count", ParamValue::Uint(4))]);
    h.send(
        "config_analog_in",
        &[
            ("oid", ParamValue::Uint(0)),
            ("pin", ParamValue::Uint(h.pin_id("PC0"))),
        ],
    );
    h.send(
        "query_analog_in",
        &[
            ("oid", ParamValue::Uint(0)),
            ("clock", ParamValue::Uint(100)),
            ("sample_ticks", ParamValue::Uint(10)),
            ("sample_count", ParamValue::Uint(2)),
            ("rest_ticks", ParamValue::Uint(1000)),
            ("min_value", ParamValue::Uint(100)),
            ("max_value", ParamValue::Uint(2000)),
            ("range_check_count", ParamValue::Uint(2)),
        ],
    );
    h.take_responses();

    // Two samples of 500 sum to 1000, inside the window.
    h.run_until(150);
    let responses = h.take_responses();
    let state = Harness::find_response(&responses, "analog_in_state").unwrap();
    assert_eq!(uint(state, 1), 1100); // next_clock = query_time + rest
    assert_eq!(uint(state, 2), 1000);

    // Force the reading out of range: two bad batches reach the check
    // count and shut down.
    let mut opts = Options::new();
    opts.set("value", OptValue::Int(4000));
    h.object_command(ObjectClass::Thermistor, "hotend_sensor", "set_adc", opts);
    h.run_until(3500);
    let responses = h.take_responses();
    let shutdown = Harness::find_response(&responses, "shutdown").unwrap();
    assert_eq!(uint(shutdown, 1), 0); // "ADC out of range"
}

#[test]
fn stats_wrap_increments_uptime_high() {
    let mut h = Harness::new();

    // Walk the clock all the way around its 32-bit range in stats-cadence
    // steps so the stats task keeps pace, as it would in real time.
    let mut prev = h.clock.now();
    let mut wrapped = false;
    while !wrapped {
        h.clock.advance(100_000);
        h.sched.run_pending();
        let now = h.clock.now();
        wrapped = now < prev;
        prev = now;
    }

    // Stats reports arrived all along the way (one per ~5s of MCU time).
    let responses = h.take_responses();
    let stats = responses.iter().filter(|(name, _)| name == "stats").count();
    assert!(stats > 800, "expected steady stats reports, saw {stats}");

    // Immediately after the wrap the pending-wrap correction kicks in.
    h.send("get_uptime", &[]);
    let responses = h.take_responses();
    let uptime = Harness::find_response(&responses, "uptime").unwrap();
    assert_eq!(uint(uptime, 0), 1);

    // Once the next report lands the wrap is latched into clock_high.
    for _ in 0..52 {
        h.clock.advance(100_000);
        h.sched.run_pending();
    }
    h.send("get_uptime", &[]);
    let responses = h.take_responses();
    let uptime = Harness::find_response(&responses, "uptime").unwrap();
    assert_eq!(uint(uptime, 0), 1);

    // Wrap-safe ordering still holds just past the boundary.
    let now = h.clock.now();
    assert!(!voxel_core::clock::tick_before(now, now.wrapping_sub(10)));
}

#[test]
fn pwm_config_validates_parameters() {
    let mut h = Harness::new();
    h.send("allocate_oids", &[("count", ParamValue::Uint(4))]);
    h.send(
        "config_pwm_out",
        &[
            ("oid", ParamValue::Uint(0)),
            ("pin", ParamValue::Uint(h.pin_id("PC9"))),
            ("cycle_ticks", ParamValue::Uint(0)), // invalid
            ("value", ParamValue::Uint(0)),
            ("default_value", ParamValue::Uint(0)),
            ("max_duration", ParamValue::Uint(0)),
        ],
    );
    let responses = h.take_responses();
    let shutdown = Harness::find_response(&responses, "shutdown").unwrap();
    assert_eq!(uint(shutdown, 1), 2); // "Command failure"
}

#[test]
fn neopixel_update_and_send() {
    let mut h = Harness::new();
    h.send("allocate_oids", &[("count", ParamValue::Uint(4))]);
    h.send(
        "config_neopixel",
        &[
            ("oid", ParamValue::Uint(0)),
            ("pin", ParamValue::Uint(h.pin_id("PB0"))),
            ("data_size", ParamValue::Uint(12)),
            ("bit_max_ticks", ParamValue::Uint(100)),
            ("reset_min_ticks", ParamValue::Uint(1000)),
        ],
    );
    h.send(
        "neopixel_update",
        &[
            ("oid", ParamValue::Uint(0)),
            ("pos", ParamValue::Uint(0)),
            ("data", ParamValue::Bytes(vec![0xff, 0x10, 0x20])),
        ],
    );
    h.send("neopixel_send", &[("oid", ParamValue::Uint(0))]);
    let responses = h.take_responses();
    let result = Harness::find_response(&responses, "neopixel_result").unwrap();
    assert_eq!(uint(result, 1), 1);

    // Out-of-bounds update is a command failure.
    h.send(
        "neopixel_update",
        &[
            ("oid", ParamValue::Uint(0)),
            ("pos", ParamValue::Uint(11)),
            ("data", ParamValue::Bytes(vec![1, 2, 3])),
        ],
    );
    let responses = h.take_responses();
    assert!(Harness::find_response(&responses, "shutdown").is_some());
}

#[test]
fn spi_transfer_returns_read_back() {
    let mut h = Harness::new();
    h.send("allocate_oids", &[("count", ParamValue::Uint(4))]);
    h.send(
        "config_spi",
        &[
            ("oid", ParamValue::Uint(0)),
            ("pin", ParamValue::Uint(h.pin_id("PD10"))),
            ("cs_active_high", ParamValue::Uint(0)),
        ],
    );
    h.send(
        "spi_set_software_bus",
        &[
            ("oid", ParamValue::Uint(0)),
            ("miso_pin", ParamValue::Uint(h.pin_id("PE13"))),
            ("mosi_pin", ParamValue::Uint(h.pin_id("PE14"))),
            ("sclk_pin", ParamValue::Uint(h.pin_id("PE12"))),
            ("mode", ParamValue::Uint(0)),
            ("rate", ParamValue::Uint(4_000_000)),
        ],
    );
    h.send(
        "spi_transfer",
        &[
            ("oid", ParamValue::Uint(0)),
            ("data", ParamValue::Bytes(vec![0xa5, 0x5a])),
        ],
    );
    let responses = h.take_responses();
    let reply = Harness::find_response(&responses, "spi_transfer_response").unwrap();
    assert_eq!(reply[1], ParamValue::Bytes(vec![0, 0]));
}
