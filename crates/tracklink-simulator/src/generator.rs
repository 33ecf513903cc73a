//! Traffic generator: one simulated terminal against a JT/T808 server.
//!
//! After the register → authenticate handshake three loops share the link:
//!
//! - location: drift the vehicle every tick, report only when the dual gate
//!   passes (or buffer the report in batch mode)
//! - heartbeat: 0x0002 every period, ungated
//! - status: 0x0200 with the current position every period, ungated
//!
//! All three hang off one cancellation token. A transport failure in any
//! loop cancels the others and the generator reconnects with capped
//! exponential backoff. On shutdown the generator waits for the loops,
//! sends a logout and closes the socket; nothing is sent after `run`
//! returns.

use crate::backoff::Backoff;
use crate::config::{GeneratorConfig, Timing};
use crate::error::{GeneratorError, Result};
use crate::gate;
use crate::kinematics::KinematicState;
use crate::link::DeviceLink;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use tracklink_core::{BcdTimestamp, PhoneId};
use tracklink_protocol::{BatchLocationUpload, Body, LocationReport, RegistrationRequest};

/// Counters since the generator was created.
#[derive(Debug, Default)]
pub struct GeneratorStats {
    locations_sent: AtomicU64,
    batches_sent: AtomicU64,
    suppressed: AtomicU64,
    heartbeats_sent: AtomicU64,
    status_sent: AtomicU64,
    reconnects: AtomicU64,
}

impl GeneratorStats {
    pub fn locations_sent(&self) -> u64 {
        self.locations_sent.load(Ordering::Relaxed)
    }

    pub fn batches_sent(&self) -> u64 {
        self.batches_sent.load(Ordering::Relaxed)
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    pub fn status_sent(&self) -> u64 {
        self.status_sent.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

/// Kinematics plus reports waiting for a batch upload.
struct Vehicle {
    kinematics: KinematicState,
    batch: Vec<LocationReport>,
}

impl Vehicle {
    /// Queue a report for the next upload, dropping the oldest beyond
    /// `size`. Returns true once the batch is full.
    fn buffer(&mut self, report: LocationReport, size: usize) -> bool {
        self.batch.push(report);
        if self.batch.len() > size {
            let dropped = self.batch.len() - size;
            self.batch.drain(..dropped);
            debug!(dropped, size, "Oldest buffered locations dropped");
        }
        self.batch.len() >= size
    }

    /// Transport failures keep the buffer for the next link; anything else
    /// would fail the same way again, so the batch is discarded.
    fn settle_batch(&mut self, result: &Result<()>) {
        match result {
            Ok(()) => self.batch.clear(),
            Err(e) if e.is_transport() => {}
            Err(e) => {
                warn!(items = self.batch.len(), error = %e, "Discarding undeliverable batch");
                self.batch.clear();
            }
        }
    }
}

struct Shared {
    timing: Timing,
    batch_size: Option<usize>,
    vehicle: Mutex<Vehicle>,
    stats: GeneratorStats,
}

type SharedLink = Arc<Mutex<DeviceLink>>;

pub struct TrafficGenerator {
    phone: PhoneId,
    registration: RegistrationRequest,
    server_addr: SocketAddr,
    shared: Arc<Shared>,
}

impl TrafficGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            phone: config.device.phone()?,
            registration: config.device.registration(),
            server_addr: config.server_addr()?,
            shared: Arc::new(Shared {
                timing: config.timing(),
                batch_size: config.batch_enabled.then_some(config.batch_size),
                vehicle: Mutex::new(Vehicle {
                    kinematics: KinematicState::new(&config.device),
                    batch: Vec::new(),
                }),
                stats: GeneratorStats::default(),
            }),
        })
    }

    /// Override the loop periods; used for sub-second test schedules.
    pub fn with_timing(self, timing: Timing) -> Result<Self> {
        let shared = Arc::try_unwrap(self.shared)
            .map_err(|_| GeneratorError::Config("generator already running".into()))?;
        Ok(Self {
            shared: Arc::new(Shared { timing, ..shared }),
            ..self
        })
    }

    pub fn phone(&self) -> PhoneId {
        self.phone
    }

    pub fn stats(&self) -> &GeneratorStats {
        &self.shared.stats
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let timing = self.shared.timing;
        let mut backoff = Backoff::new(timing.reconnect_initial, timing.reconnect_max);

        info!(phone = %self.phone, server = %self.server_addr, "Traffic generator starting");

        loop {
            let mut link = DeviceLink::new(self.server_addr, timing.request_timeout, self.phone);
            let opened = tokio::select! {
                _ = shutdown.cancelled() => {
                    link.close().await;
                    break;
                }
                opened = link.open(&self.registration) => opened,
            };

            if let Err(e) = opened {
                link.close().await;
                let delay = backoff.next_delay();
                warn!(
                    error = %e,
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Handshake failed, retrying"
                );
                if !sleep_or_cancel(delay, &shutdown).await {
                    break;
                }
                continue;
            }
            backoff.reset();

            let link: SharedLink = Arc::new(Mutex::new(link));
            let session = shutdown.child_token();
            let tracker = TaskTracker::new();
            tracker.spawn(location_loop(
                Arc::clone(&self.shared),
                Arc::clone(&link),
                session.clone(),
            ));
            tracker.spawn(heartbeat_loop(
                Arc::clone(&self.shared),
                Arc::clone(&link),
                session.clone(),
            ));
            tracker.spawn(status_loop(
                Arc::clone(&self.shared),
                Arc::clone(&link),
                session.clone(),
            ));
            tracker.close();

            session.cancelled().await;
            tracker.wait().await;

            let mut link = link.lock().await;
            if shutdown.is_cancelled() {
                if link.is_authenticated() {
                    info!(phone = %self.phone, "Logging out");
                    if let Err(e) = link.logout().await {
                        warn!(error = %e, "Logout failed");
                    }
                }
                link.close().await;
                break;
            }

            link.close().await;
            drop(link);
            self.shared.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            let delay = backoff.next_delay();
            warn!(delay_ms = delay.as_millis() as u64, "Link lost, reconnecting");
            if !sleep_or_cancel(delay, &shutdown).await {
                break;
            }
        }

        info!(phone = %self.phone, "Traffic generator stopped");
        Ok(())
    }
}

/// `false` if cancelled before the delay elapsed.
async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Wait for the next tick; `false` once the session is cancelled.
async fn next_tick(ticker: &mut tokio::time::Interval, session: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = session.cancelled() => false,
        _ = ticker.tick() => true,
    }
}

/// Log a failed request; transport failures end the session.
fn report_failure(what: &str, error: &GeneratorError, session: &CancellationToken) -> bool {
    if error.is_transport() {
        warn!(error = %error, "{what} failed, dropping link");
        session.cancel();
        false
    } else {
        warn!(error = %error, "{what} rejected");
        true
    }
}

async fn location_loop(shared: Arc<Shared>, link: SharedLink, session: CancellationToken) {
    let period = shared.timing.location_interval;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while next_tick(&mut ticker, &session).await {
        let now = Instant::now();
        let mut vehicle = shared.vehicle.lock().await;
        vehicle.kinematics.drift(period, &mut rand::thread_rng());

        let decision = gate::evaluate(&vehicle.kinematics, now);
        if !decision.should_publish() {
            shared.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(
                gate = decision.failed_gate().unwrap_or("unknown"),
                speed_kmh = vehicle.kinematics.speed_kmh,
                "Location suppressed"
            );
            continue;
        }

        let report = vehicle.kinematics.report(BcdTimestamp::now());
        let result = match shared.batch_size {
            None => {
                let result = link.lock().await.request(&Body::Location(report)).await;
                if result.is_ok() {
                    shared.stats.locations_sent.fetch_add(1, Ordering::Relaxed);
                }
                result
            }
            Some(size) => {
                // A buffered report counts as published.
                vehicle.kinematics.mark_published(now);
                if !vehicle.buffer(report, size) {
                    debug!(buffered = vehicle.batch.len(), size, "Location buffered");
                    continue;
                }
                let items = vehicle.batch.len();
                let upload = BatchLocationUpload::new(0, vehicle.batch.clone());
                let result = link.lock().await.request(&Body::BatchLocation(upload)).await;
                vehicle.settle_batch(&result);
                if result.is_ok() {
                    info!(items, "Batch sent");
                    shared.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
                }
                result
            }
        };

        match result {
            Ok(()) => {
                vehicle.kinematics.mark_published(now);
                debug!(
                    latitude = vehicle.kinematics.position.latitude,
                    longitude = vehicle.kinematics.position.longitude,
                    "Location published"
                );
            }
            Err(e) => {
                if !report_failure("Location report", &e, &session) {
                    break;
                }
            }
        }
    }
    debug!("Location loop stopped");
}

async fn heartbeat_loop(shared: Arc<Shared>, link: SharedLink, session: CancellationToken) {
    let period = shared.timing.heartbeat_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while next_tick(&mut ticker, &session).await {
        match link.lock().await.request(&Body::Heartbeat).await {
            Ok(()) => {
                shared.stats.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                debug!("Heartbeat acknowledged");
            }
            Err(e) => {
                if !report_failure("Heartbeat", &e, &session) {
                    break;
                }
            }
        }
    }
    debug!("Heartbeat loop stopped");
}

async fn status_loop(shared: Arc<Shared>, link: SharedLink, session: CancellationToken) {
    let period = shared.timing.status_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while next_tick(&mut ticker, &session).await {
        let report = shared
            .vehicle
            .lock()
            .await
            .kinematics
            .report(BcdTimestamp::now());
        match link.lock().await.request(&Body::Location(report)).await {
            Ok(()) => {
                shared.stats.status_sent.fetch_add(1, Ordering::Relaxed);
                debug!("Status report acknowledged");
            }
            Err(e) => {
                if !report_failure("Status report", &e, &session) {
                    break;
                }
            }
        }
    }
    debug!("Status loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tracklink_network::TcpClientError;

    fn report(speed: u16) -> LocationReport {
        let mut report = KinematicState::new(&GeneratorConfig::default().device)
            .report(BcdTimestamp::from_bcd([0; 6]));
        report.speed = speed;
        report
    }

    fn vehicle_with(items: usize) -> Vehicle {
        Vehicle {
            kinematics: KinematicState::new(&GeneratorConfig::default().device),
            batch: (0..items).map(|_| report(0)).collect(),
        }
    }

    #[test]
    fn test_buffer_keeps_newest() {
        let mut vehicle = vehicle_with(0);
        assert!(!vehicle.buffer(report(1), 3));
        assert!(!vehicle.buffer(report(2), 3));
        assert!(vehicle.buffer(report(3), 3));

        // Still full after a failed upload: the oldest item makes room.
        assert!(vehicle.buffer(report(4), 3));
        let speeds: Vec<u16> = vehicle.batch.iter().map(|r| r.speed).collect();
        assert_eq!(speeds, [2, 3, 4]);
    }

    #[rstest]
    #[case::sent(Ok(()), 0)]
    #[case::link_down(Err(GeneratorError::Transport(TcpClientError::NotConnected)), 5)]
    #[case::not_authenticated(Err(GeneratorError::NotAuthenticated), 5)]
    #[case::rejected(Err(GeneratorError::Rejected { message_id: 0x0704, result: 1 }), 0)]
    #[case::too_large(Err(GeneratorError::Protocol(tracklink_core::Error::BodyTooLarge(1203))), 0)]
    fn test_settle_batch(#[case] result: Result<()>, #[case] kept: usize) {
        let mut vehicle = vehicle_with(5);
        vehicle.settle_batch(&result);
        assert_eq!(vehicle.batch.len(), kept);
    }

    #[test]
    fn test_new_validates() {
        let mut config = GeneratorConfig::default();
        config.device.device_id = "not digits".into();
        assert!(TrafficGenerator::new(&config).is_err());
    }

    #[test]
    fn test_with_timing_overrides() {
        let generator = TrafficGenerator::new(&GeneratorConfig::default()).unwrap();
        let timing = Timing {
            location_interval: Duration::from_millis(10),
            ..generator.shared.timing
        };
        let generator = generator.with_timing(timing).unwrap();
        assert_eq!(generator.shared.timing.location_interval, Duration::from_millis(10));
        assert_eq!(generator.phone().to_string(), "123456789012");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(sleep_or_cancel(Duration::from_secs(60), &token).await);
        assert_eq!(start.elapsed(), Duration::from_secs(60));

        token.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(60), &token).await);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_run_returns_when_cancelled_without_server() {
        let config = GeneratorConfig {
            // Discard port: connection refused, generator keeps backing off.
            server_port: 9,
            reconnect_initial_ms: 10,
            reconnect_max_ms: 20,
            ..GeneratorConfig::default()
        };
        let generator = TrafficGenerator::new(&config).unwrap();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stop.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), generator.run(shutdown))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(generator.stats().locations_sent(), 0);
    }
}
