//! # Bridge Orchestrator
//!
//! Moves CRSF frames between the half-duplex serial line and the UDP peer.
//!
//! Activities, all sharing one [`CancellationToken`]:
//! - serial receive: a blocking poll loop on its own thread
//! - UDP receive: a tokio task racing the socket against cancellation
//! - timers: UDP heartbeat with liveness tracking, serial keep-alive, stats
//!
//! A fatal error in any activity cancels the token; [`Bridge::run`] then
//! joins everything and reports the first failure.

pub mod relay;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{BridgeConfig, KeepaliveMode};
use crate::crsf::encoder::{encode_frame, heartbeat_frame, ping_frame};
use crate::crsf::protocol::address;
use crate::error::{is_transient_io, BridgeError, Result};
use crate::serial::HalfDuplexTransceiver;
use crate::telemetry::TelemetrySnapshot;
use crate::udp::envelope::PacketType;
use crate::udp::link_monitor::LinkReport;
use crate::udp::{UdpTransport, MAX_DATAGRAM_SIZE};
use relay::{FrameRelay, RelayStats};

/// Largest read taken from the serial line in one poll
const SERIAL_READ_SIZE: usize = 256;

/// Everything the stats timer reports
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub uptime_s: u64,
    pub serial_to_udp: RelayStats,
    pub udp_to_serial: RelayStats,
    pub link: LinkReport,
    pub telemetry: TelemetrySnapshot,
}

/// State read by the timers while the receive activities write it
#[derive(Debug, Default)]
struct Shared {
    telemetry: Mutex<TelemetrySnapshot>,
    serial_to_udp: Mutex<RelayStats>,
    udp_to_serial: Mutex<RelayStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serial <-> UDP CRSF bridge
#[derive(Debug)]
pub struct Bridge {
    transceiver: Arc<HalfDuplexTransceiver>,
    transport: Arc<UdpTransport>,
    config: BridgeConfig,
    poll_interval: Duration,
    shared: Arc<Shared>,
    started: Instant,
}

impl Bridge {
    pub fn new(
        transceiver: HalfDuplexTransceiver,
        transport: UdpTransport,
        config: BridgeConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            transceiver: Arc::new(transceiver),
            transport: Arc::new(transport),
            config,
            poll_interval,
            shared: Arc::new(Shared::default()),
            started: Instant::now(),
        }
    }

    /// Current counters, link state and telemetry
    pub fn status(&self) -> BridgeStatus {
        build_status(&self.shared, &self.transport, self.started)
    }

    /// Run until `cancel` fires or an activity fails fatally
    ///
    /// Must be called on a multi-threaded runtime: serial writes from async
    /// tasks go through `block_in_place`.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error raised by any activity.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!(
            "Bridge running: serial <-> {} (keep-alive: {:?})",
            self.transport.remote_addr(),
            self.config.keepalive
        );

        let mut tasks: Vec<(&'static str, JoinHandle<Result<()>>)> = Vec::new();

        {
            let transceiver = Arc::clone(&self.transceiver);
            let transport = Arc::clone(&self.transport);
            let shared = Arc::clone(&self.shared);
            let cancel = cancel.clone();
            let poll_interval = self.poll_interval;
            let runtime = Handle::current();
            tasks.push((
                "serial receive",
                tokio::task::spawn_blocking(move || {
                    serial_rx_loop(
                        &runtime,
                        &transceiver,
                        &transport,
                        &shared,
                        &cancel,
                        poll_interval,
                    )
                }),
            ));
        }

        tasks.push((
            "udp receive",
            tokio::spawn(udp_rx_task(
                Arc::clone(&self.transceiver),
                Arc::clone(&self.transport),
                Arc::clone(&self.shared),
                cancel.clone(),
            )),
        ));

        tasks.push((
            "heartbeat",
            tokio::spawn(heartbeat_task(
                Arc::clone(&self.transport),
                self.config.heartbeat_interval(),
                cancel.clone(),
            )),
        ));

        if self.config.keepalive != KeepaliveMode::Off {
            tasks.push((
                "keep-alive",
                tokio::spawn(keepalive_task(
                    Arc::clone(&self.transceiver),
                    self.config.keepalive,
                    self.config.keepalive_interval(),
                    cancel.clone(),
                )),
            ));
        }

        tasks.push((
            "stats",
            tokio::spawn(stats_task(
                Arc::clone(&self.transport),
                Arc::clone(&self.shared),
                self.started,
                self.config.stats_interval(),
                cancel.clone(),
            )),
        ));

        // Joined in completion order so a panic anywhere cancels at once
        let mut running = JoinSet::new();
        for (name, handle) in tasks {
            running.spawn(async move {
                let outcome = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(BridgeError::Task(format!(
                        "{} activity ended abnormally: {}",
                        name, e
                    ))),
                };
                (name, outcome)
            });
        }

        let mut first_error = None;
        while let Some(joined) = running.join_next().await {
            let (name, outcome) = match joined {
                Ok(done) => done,
                Err(e) => ("supervisor", Err(BridgeError::Task(e.to_string()))),
            };
            match outcome {
                Ok(()) => debug!("{} activity stopped", name),
                Err(e) => {
                    error!("{} activity failed: {}", name, e);
                    cancel.cancel();
                    first_error.get_or_insert(e);
                }
            }
        }

        let status = self.status();
        info!(
            "Bridge stopped after {}s: {} frames serial->udp, {} frames udp->serial",
            status.uptime_s, status.serial_to_udp.frames_out, status.udp_to_serial.frames_out
        );

        first_error.map_or(Ok(()), Err)
    }
}

fn build_status(shared: &Shared, transport: &UdpTransport, started: Instant) -> BridgeStatus {
    let now = Instant::now();
    BridgeStatus {
        uptime_s: now.duration_since(started).as_secs(),
        serial_to_udp: lock(&shared.serial_to_udp).clone(),
        udp_to_serial: lock(&shared.udp_to_serial).clone(),
        link: LinkReport::from_stats(&transport.monitor().stats(), now),
        telemetry: lock(&shared.telemetry).clone(),
    }
}

/// Sort a failure into "log and continue" or "stop the bridge"
fn check_fatal(context: &str, err: BridgeError, cancel: &CancellationToken) -> Result<()> {
    match &err {
        BridgeError::Io(io) if is_transient_io(io) => {
            warn!("{}: {}", context, err);
            Ok(())
        }
        _ => {
            error!("{}: {}", context, err);
            cancel.cancel();
            Err(err)
        }
    }
}

/// Blocking poll loop feeding serial bytes to the UDP peer
///
/// UDP sends are driven to completion on `runtime` from this thread.
fn serial_rx_loop(
    runtime: &Handle,
    transceiver: &HalfDuplexTransceiver,
    transport: &UdpTransport,
    shared: &Shared,
    cancel: &CancellationToken,
    poll_interval: Duration,
) -> Result<()> {
    info!("Serial receive started");
    let mut relay = FrameRelay::new("serial->udp");
    let mut buf = [0u8; SERIAL_READ_SIZE];

    while !cancel.is_cancelled() {
        let n = match transceiver.poll_receive(&mut buf) {
            Ok(0) => {
                std::thread::sleep(poll_interval);
                continue;
            }
            Ok(n) => n,
            Err(e) => {
                check_fatal("Serial receive failed", e, cancel)?;
                std::thread::sleep(poll_interval);
                continue;
            }
        };

        let batch = relay.process(&buf[..n]);
        if batch.is_empty() {
            continue;
        }

        {
            let mut telemetry = lock(&shared.telemetry);
            for frame in &batch.frames {
                telemetry.apply(frame);
            }
        }

        for payload in batch.payloads() {
            let ok = runtime.block_on(transport.send_crsf_data(&payload));
            relay.record_sent(payload.len(), ok);
        }

        *lock(&shared.serial_to_udp) = relay.stats().clone();
    }

    info!(
        "Serial receive stopped ({}: {} frames forwarded)",
        relay.name(),
        relay.stats().frames_out
    );
    Ok(())
}

/// Write to the serial line from an async task
fn send_serial(
    transceiver: &HalfDuplexTransceiver,
    data: &[u8],
    cancel: &CancellationToken,
) -> Result<bool> {
    match tokio::task::block_in_place(|| transceiver.send(data)) {
        Ok(()) => Ok(true),
        Err(e) => check_fatal("Serial send failed", e, cancel).map(|()| false),
    }
}

/// Feed CRSF_DATA envelopes from the peer into the serial line
async fn udp_rx_task(
    transceiver: Arc<HalfDuplexTransceiver>,
    transport: Arc<UdpTransport>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> Result<()> {
    info!("UDP receive started");
    let mut relay = FrameRelay::new("udp->serial");
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = transport.recv(&mut buf) => received,
        };

        let envelope = match received {
            Ok(Some(envelope)) if envelope.packet_type == PacketType::CrsfData => envelope,
            Ok(_) => continue,
            Err(e) => {
                // Includes ICMP port-unreachable reports while the peer is down
                debug!("UDP receive error: {}", e);
                continue;
            }
        };

        let batch = relay.process(&envelope.payload);
        for payload in batch.payloads() {
            let ok = send_serial(&transceiver, &payload, &cancel)?;
            relay.record_sent(payload.len(), ok);
        }

        *lock(&shared.udp_to_serial) = relay.stats().clone();
    }

    info!(
        "UDP receive stopped ({}: {} frames forwarded)",
        relay.name(),
        relay.stats().frames_out
    );
    Ok(())
}

/// Ping the peer and report liveness transitions
async fn heartbeat_task(
    transport: Arc<UdpTransport>,
    period: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let monitor = transport.monitor();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut was_active = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        transport.send_heartbeat().await;

        let active = monitor.is_active();
        if active != was_active {
            if active {
                info!("Peer link up ({})", transport.remote_addr());
            } else {
                warn!("Peer link lost ({})", transport.remote_addr());
            }
            was_active = active;
        }
    }

    Ok(())
}

/// Periodically poke the radio module over the serial line
async fn keepalive_task(
    transceiver: Arc<HalfDuplexTransceiver>,
    mode: KeepaliveMode,
    period: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let frame = match mode {
        KeepaliveMode::Heartbeat => heartbeat_frame(address::FLIGHT_CONTROLLER),
        KeepaliveMode::Ping => ping_frame(address::BROADCAST, address::FLIGHT_CONTROLLER),
        KeepaliveMode::Off => return Ok(()),
    };
    let bytes = encode_frame(&frame);

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; start one period in
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if send_serial(&transceiver, &bytes, &cancel)? {
            debug!("Sent keep-alive {}", frame);
        }
    }

    Ok(())
}

/// Log counters and publish them to the peer
async fn stats_task(
    transport: Arc<UdpTransport>,
    shared: Arc<Shared>,
    started: Instant,
    period: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let status = build_status(&shared, &transport, started);
        info!(
            "Stats: serial->udp {} frames/{} bytes ({} raw), udp->serial {} frames/{} bytes, \
             link {} (tx {} rx {} malformed {})",
            status.serial_to_udp.frames_out,
            status.serial_to_udp.bytes_out,
            status.serial_to_udp.raw_fallbacks,
            status.udp_to_serial.frames_out,
            status.udp_to_serial.bytes_out,
            if status.link.connection_active { "up" } else { "down" },
            status.link.tx_packets,
            status.link.rx_packets,
            status.link.rx_malformed,
        );

        transport.send_status(&status).await;
    }

    Ok(())
}
