//! The emulator supervisor.
//!
//! Owns the four long-lived threads: the ticker advancing the virtual
//! clock, the scheduler dispatching timer callbacks, the protocol thread
//! reading the host link, and the command-queue worker. Starts components
//! in dependency order (registry -> scheduler -> session -> queues) and
//! stops them in reverse.

use crate::link::HostLink;
use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use voxel_core::clock::Clock;
use voxel_core::queue::{drain_one, CommandQueue};
use voxel_core::registry::Registry;
use voxel_core::timers::Scheduler;
use voxel_klipper::{Frontend, Session};

/// Supervisor tuning knobs.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Cadence of clock updates, in updates per second of wall time.
    pub process_frequency: u32,
    /// Attempt to raise the scheduler thread to a real-time-ish priority.
    pub realtime: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        SupervisorOptions {
            process_frequency: 5_000,
            realtime: false,
        }
    }
}

/// Handle to a running emulator.
pub struct Supervisor {
    running: Arc<AtomicBool>,
    sched: Arc<Scheduler>,
    bus: Arc<CommandQueue>,
    ticker_stop: Sender<()>,
    threads: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Brings the emulator up and returns once all threads are running.
    pub fn start(
        registry: Arc<Registry>,
        link: HostLink,
        options: SupervisorOptions,
    ) -> Result<Supervisor> {
        let frequency = registry.board().frequency;
        let clock = Arc::new(Clock::new(frequency));
        let sched = Scheduler::new(clock.clone());
        let bus = Arc::new(CommandQueue::new(1024));

        log_startup_summary(&clock, options.process_frequency);

        let running = Arc::new(AtomicBool::new(true));
        let mut threads = Vec::new();

        // Scheduler thread: sole dispatcher of timer callbacks.
        {
            let sched = sched.clone();
            let realtime = options.realtime;
            threads.push(std::thread::spawn(move || {
                if realtime {
                    raise_thread_priority();
                }
                sched.run();
            }));
        }

        // Ticker thread: advances virtual time from wall time and wakes
        // the scheduler. Timing is best-effort on a general-purpose host.
        let (ticker_stop, ticker_rx): (Sender<()>, Receiver<()>) = bounded(0);
        {
            let clock = clock.clone();
            let sched = sched.clone();
            let cadence = Duration::from_nanos(
                1_000_000_000 / options.process_frequency.max(1) as u64,
            );
            threads.push(std::thread::spawn(move || {
                let mut last = Instant::now();
                let mut remainder_ns: u64 = 0;
                loop {
                    match ticker_rx.recv_timeout(cadence) {
                        Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    }
                    let now = Instant::now();
                    let elapsed_ns =
                        now.duration_since(last).as_nanos() as u64 + remainder_ns;
                    last = now;
                    let ticks = elapsed_ns * clock.frequency() as u64 / 1_000_000_000;
                    remainder_ns =
                        elapsed_ns - ticks * 1_000_000_000 / clock.frequency() as u64;
                    if ticks > 0 {
                        clock.advance(ticks as u32);
                        sched.kick();
                    }
                }
            }));
        }

        // Protocol thread: owns the host link reader.
        let front = Frontend::new(registry.clone(), sched.clone(), bus.clone(), link.writer)?;
        {
            let running = running.clone();
            let mut reader = link.reader;
            let guard = link.guard;
            threads.push(std::thread::spawn(move || {
                let mut session = Session::new(front);
                session.run(&mut reader, &running);
                drop(guard);
            }));
        }

        // Queue worker thread: drains the cross-front-end command queue
        // into the object bus.
        {
            let bus = bus.clone();
            let registry = registry.clone();
            let running = running.clone();
            threads.push(std::thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    drain_one(&bus, &registry, Duration::from_millis(20));
                }
            }));
        }

        Ok(Supervisor {
            running,
            sched,
            bus,
            ticker_stop,
            threads,
        })
    }

    /// Stops all threads in reverse start order and joins them.
    pub fn stop(mut self) {
        info!("stopping emulator");
        self.bus.close();
        self.running.store(false, Ordering::SeqCst);
        let _ = self.ticker_stop.send(());
        self.sched.stop();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!("emulator thread panicked during shutdown");
            }
        }
    }
}

fn log_startup_summary(clock: &Clock, process_frequency: u32) {
    info!(
        frequency = clock.frequency(),
        tick_ns = format!("{:.3}", clock.tick_ns()),
        "controller clock"
    );
    if let Some(cpu_hz) = host_cpu_frequency() {
        info!(cpu_hz, "host CPU frequency");
    }
    info!(process_frequency, "emulation update cadence");
    if tracing::enabled!(tracing::Level::DEBUG) {
        warn!("debug logging is enabled; controller timing will be imprecise");
    }
    if clock.frequency() < 1_000_000 {
        warn!("clock frequencies below 1MHz may trip host timing checks");
    }
}

/// Best-effort read of the current CPU frequency in Hz.
fn host_cpu_frequency() -> Option<u64> {
    if let Ok(khz) =
        std::fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq")
    {
        if let Ok(khz) = khz.trim().parse::<u64>() {
            return Some(khz * 1_000);
        }
    }
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    let line = cpuinfo.lines().find(|l| l.starts_with("cpu MHz"))?;
    let mhz: f64 = line.split(':').next_back()?.trim().parse().ok()?;
    Some((mhz * 1e6) as u64)
}

/// Requests SCHED_FIFO for the calling thread; logs and continues when the
/// host refuses (usually for lack of privileges).
fn raise_thread_priority() {
    let param = libc::sched_param { sched_priority: 10 };
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        warn!(rc, "could not raise scheduler thread priority");
    } else {
        info!("scheduler thread running at real-time priority");
    }
}
