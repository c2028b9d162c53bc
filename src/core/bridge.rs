//! The observation loop.
//!
//! [`Bridge`] owns the device handle and the stabilization state and runs a
//! single sequential loop: read a frame, decode it, feed the tracker, publish
//! whatever event comes out. Nothing in the loop is fatal. A lost link is
//! closed and reopened after `reconnect_delay`; any other failed iteration is
//! logged and followed by `fault_delay`. Only cancellation ends the loop.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    device::{DeviceReader, LinkError},
    frame::FrameExtractor,
    publisher::EventPublisher,
    readiness::{Readiness, ReadinessState},
    tracker::{StabilityTracker, StableEvent, TrackerState},
};
use crate::config::{serial::ScheduleConfig, stability::StabilityConfig};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid frame pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("serial link lost: {0}")]
    Link(#[from] LinkError),

    #[error("publishing {weight} timed out after {timeout:?}")]
    PublishTimeout { weight: String, timeout: Duration },
}

/// Loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub fault_delay: Duration,
    pub publish_timeout: Duration,
}

impl From<&ScheduleConfig> for Schedule {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            fault_delay: Duration::from_millis(config.fault_delay_ms),
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::from(&ScheduleConfig::default())
    }
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Nothing pending on the link.
    Idle,
    /// A frame was handled.
    Frame,
}

pub struct Bridge {
    device: Box<dyn DeviceReader>,
    publisher: Arc<dyn EventPublisher>,
    extractor: FrameExtractor,
    tracker: StabilityTracker,
    schedule: Schedule,
    readiness: Readiness,
}

impl Bridge {
    pub fn new(
        device: Box<dyn DeviceReader>,
        publisher: Arc<dyn EventPublisher>,
        stability: &StabilityConfig,
        schedule: Schedule,
        readiness: Readiness,
    ) -> Result<Self, BridgeError> {
        Ok(Self {
            device,
            publisher,
            extractor: FrameExtractor::new()?,
            tracker: StabilityTracker::new(stability),
            schedule,
            readiness,
        })
    }

    pub fn tracker_state(&self) -> TrackerState {
        self.tracker.state()
    }

    /// Runs until `cancel` fires, then closes the device.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Observing {} ({} mode)",
            self.device.describe(),
            self.tracker.mode()
        );

        while !cancel.is_cancelled() {
            if !self.device.is_open() {
                if let Err(e) = self.device.open().await {
                    error!(
                        "Serial error: {}. Retrying in {:?}",
                        e, self.schedule.reconnect_delay
                    );
                    if !pause(self.schedule.reconnect_delay, &cancel).await {
                        break;
                    }
                    continue;
                }
            }

            let delay = match self.step().await {
                Ok(Step::Frame) => None,
                Ok(Step::Idle) => Some(self.schedule.poll_interval),
                Err(BridgeError::Link(e)) => {
                    error!(
                        "Serial link lost: {}. Reconnecting in {:?}",
                        e, self.schedule.reconnect_delay
                    );
                    self.device.close().await;
                    Some(self.schedule.reconnect_delay)
                }
                Err(e) => {
                    error!("Loop error: {}", e);
                    Some(self.schedule.fault_delay)
                }
            };

            if let Some(delay) = delay {
                if !pause(delay, &cancel).await {
                    break;
                }
            }
        }

        self.device.close().await;
        info!("Observation loop stopped");
    }

    async fn step(&mut self) -> Result<Step, BridgeError> {
        match self.device.try_read().await? {
            Some(raw) => {
                self.process(&raw).await?;
                Ok(Step::Frame)
            }
            None => Ok(Step::Idle),
        }
    }

    /// Decodes one raw frame and publishes the event it completes, if any.
    ///
    /// Undecodable frames are dropped without touching the tracker. A failed
    /// publish is logged and the event is dropped; only a publish that does
    /// not return within `publish_timeout` is an error. An event accepted
    /// while the broker is down is reported as queued.
    pub async fn process(&mut self, raw: &[u8]) -> Result<Option<StableEvent>, BridgeError> {
        let text = FrameExtractor::sanitize(raw);
        let reading = match self.extractor.parse(&text) {
            Ok(reading) => reading,
            Err(e) => {
                debug!("Discarding frame: {}", e);
                return Ok(None);
            }
        };
        trace!("Reading {} {}", reading.status, reading.weight);

        let Some(event) = self.tracker.observe(&reading) else {
            return Ok(None);
        };

        info!(
            "ACTION: {}",
            json!({ "action": event.action, "raw": text, "cnt": event.count })
        );

        let weight = event.formatted_weight();
        match timeout(self.schedule.publish_timeout, self.publisher.publish(&event)).await {
            Ok(Ok(())) => match self.readiness.current_state() {
                ReadinessState::NotReady(reason) => warn!(
                    "Queued {} weight {} while broker down ({})",
                    event.action, weight, reason
                ),
                _ => info!("Published {} weight {}", event.action, weight),
            },
            Ok(Err(e)) => warn!("Publish failed for weight {}: {}", weight, e),
            Err(_) => {
                return Err(BridgeError::PublishTimeout {
                    weight,
                    timeout: self.schedule.publish_timeout,
                })
            }
        }

        Ok(Some(event))
    }
}

/// Sleeps for `delay`; returns false if cancelled first.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use tracing_test::traced_test;

    use super::*;
    use crate::{
        config::stability::StabilityMode,
        core::{publisher::PublishError, tracker::EventAction},
    };

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        closes: AtomicUsize,
    }

    /// Replays scripted reads; an empty script reads as an idle link.
    struct ScriptedDevice {
        reads: VecDeque<Result<Option<Vec<u8>>, LinkError>>,
        open_failures: usize,
        open: bool,
        counters: Arc<Counters>,
    }

    impl ScriptedDevice {
        fn new(reads: Vec<Result<Option<Vec<u8>>, LinkError>>) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let device = Self {
                reads: reads.into(),
                open_failures: 0,
                open: false,
                counters: counters.clone(),
            };
            (device, counters)
        }

        fn frames(frames: &[&str]) -> (Self, Arc<Counters>) {
            Self::new(
                frames
                    .iter()
                    .map(|f| Ok(Some(f.as_bytes().to_vec())))
                    .collect(),
            )
        }
    }

    #[async_trait::async_trait]
    impl DeviceReader for ScriptedDevice {
        async fn open(&mut self) -> Result<(), LinkError> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            if self.open_failures > 0 {
                self.open_failures -= 1;
                return Err(LinkError::NotOpen);
            }
            self.open = true;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn try_read(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
            self.reads.pop_front().unwrap_or(Ok(None))
        }

        async fn close(&mut self) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            self.open = false;
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[derive(Clone, Copy, Default, PartialEq)]
    enum Behaviour {
        #[default]
        Accept,
        Fail,
        Hang,
    }

    #[derive(Default)]
    struct MockPublisher {
        behaviour: Behaviour,
        attempts: AtomicUsize,
        payloads: Mutex<Vec<String>>,
    }

    impl MockPublisher {
        fn with(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                ..Default::default()
            })
        }

        fn payloads(&self) -> Vec<String> {
            self.payloads.lock().unwrap().clone()
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl EventPublisher for MockPublisher {
        async fn publish(&self, event: &StableEvent) -> Result<(), PublishError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Accept => {
                    let json = serde_json::to_string(&event.payload()).unwrap();
                    self.payloads.lock().unwrap().push(json);
                    Ok(())
                }
                Behaviour::Fail => Err("broker unavailable".into()),
                Behaviour::Hang => std::future::pending().await,
            }
        }
    }

    fn bridge(device: ScriptedDevice, publisher: Arc<MockPublisher>) -> Bridge {
        bridge_with(device, publisher, StabilityConfig::default())
    }

    fn bridge_with(
        device: ScriptedDevice,
        publisher: Arc<MockPublisher>,
        stability: StabilityConfig,
    ) -> Bridge {
        Bridge::new(
            Box::new(device),
            publisher,
            &stability,
            Schedule::default(),
            Readiness::new(),
        )
        .unwrap()
    }

    /// Runs `bridge` on the paused clock for `span`, then cancels it.
    async fn run_for(bridge: Bridge, span: Duration) {
        let cancel = CancellationToken::new();
        let stopper = async {
            sleep(span).await;
            cancel.cancel();
        };
        tokio::join!(bridge.run(cancel.clone()), stopper);
    }

    #[test]
    fn test_schedule_from_config() {
        let schedule = Schedule::default();
        assert_eq!(schedule.poll_interval, Duration::from_millis(10));
        assert_eq!(schedule.reconnect_delay, Duration::from_secs(5));
        assert_eq!(schedule.fault_delay, Duration::from_secs(1));
        assert_eq!(schedule.publish_timeout, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_publishes_once_per_settlement() {
        let (device, _) = ScriptedDevice::frames(&["U 5.0", "S 5.0", "S 5.0", "S 5.0", "S 5.0"]);
        let publisher = MockPublisher::with(Behaviour::Accept);

        run_for(bridge(device, publisher.clone()), Duration::from_secs(1)).await;

        assert_eq!(publisher.payloads(), vec![r#"{"weight":"5.00"}"#.to_string()]);
        assert!(logs_contain(r#""action":"STABLE""#));
        assert!(logs_contain("Published STABLE weight 5.00"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_event_accepted_while_broker_down_is_queued() {
        let (device, _) = ScriptedDevice::frames(&[]);
        let publisher = MockPublisher::with(Behaviour::Accept);
        let readiness = Readiness::new();
        readiness.set_state(ReadinessState::NotReady("connecting".into()));
        let mut bridge = Bridge::new(
            Box::new(device),
            publisher.clone(),
            &StabilityConfig::default(),
            Schedule::default(),
            readiness.clone(),
        )
        .unwrap();

        for _ in 0..3 {
            bridge.process(b"S 7.5").await.unwrap();
        }
        assert_eq!(publisher.attempts(), 1);
        assert!(logs_contain("Queued STABLE weight 7.50 while broker down (connecting)"));

        readiness.set_state(ReadinessState::Ready);
        bridge.process(b"U 7.5").await.unwrap();
        for _ in 0..3 {
            bridge.process(b"S 8.0").await.unwrap();
        }
        assert!(logs_contain("Published STABLE weight 8.00"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_settlements_publish_twice() {
        let (device, _) = ScriptedDevice::frames(&[
            "U 5.0", "S 5.0", "S 5.0", "S 5.0", "S 5.0", "U 5.0", "S 5.0", "S 5.0", "S 5.0",
        ]);
        let publisher = MockPublisher::with(Behaviour::Accept);

        run_for(bridge(device, publisher.clone()), Duration::from_secs(1)).await;

        assert_eq!(publisher.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_garbage_frames_leave_tracker_alone() {
        let (device, _) = ScriptedDevice::frames(&["S 1.0", "S 1.0", "\x02\x03", "S ---", "S 1.0"]);
        let publisher = MockPublisher::with(Behaviour::Accept);

        run_for(bridge(device, publisher.clone()), Duration::from_secs(1)).await;

        assert_eq!(publisher.attempts(), 1);
        assert!(logs_contain("Discarding frame"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_noisy_frames_count_as_clean() {
        let (device, _) =
            ScriptedDevice::frames(&["\x02S 12.5\r\n", "\x00S\x7f 12.5", "S 12.5\x1b"]);
        let publisher = MockPublisher::with(Behaviour::Accept);

        run_for(bridge(device, publisher.clone()), Duration::from_secs(1)).await;

        assert_eq!(publisher.payloads(), vec![r#"{"weight":"12.50"}"#.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_link_loss_reopens_and_keeps_tracker_state() {
        let (device, counters) = ScriptedDevice::new(vec![
            Ok(Some(b"S 3.0".to_vec())),
            Ok(Some(b"S 3.0".to_vec())),
            Err(LinkError::Closed),
            Ok(Some(b"S 3.0".to_vec())),
        ]);
        let publisher = MockPublisher::with(Behaviour::Accept);

        run_for(bridge(device, publisher.clone()), Duration::from_secs(6)).await;

        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert!(counters.closes.load(Ordering::SeqCst) >= 2);
        assert_eq!(publisher.attempts(), 1);
        assert!(logs_contain("Serial link lost"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_waits_reconnect_delay() {
        let (device, counters) = ScriptedDevice::new(vec![Err(LinkError::Closed)]);
        let publisher = MockPublisher::with(Behaviour::Accept);

        run_for(bridge(device, publisher), Duration::from_secs(4)).await;

        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_open_failure_is_retried() {
        let (mut device, counters) = ScriptedDevice::frames(&[]);
        device.open_failures = 2;
        let publisher = MockPublisher::with(Behaviour::Accept);

        run_for(bridge(device, publisher), Duration::from_secs(11)).await;

        assert_eq!(counters.opens.load(Ordering::SeqCst), 3);
        assert!(logs_contain("Retrying in 5s"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_publish_failure_is_not_fatal() {
        let (device, _) = ScriptedDevice::frames(&[
            "S 2.0", "S 2.0", "S 2.0", "U 2.0", "S 4.0", "S 4.0", "S 4.0",
        ]);
        let publisher = MockPublisher::with(Behaviour::Fail);

        run_for(bridge(device, publisher.clone()), Duration::from_secs(1)).await;

        assert_eq!(publisher.attempts(), 2);
        assert!(logs_contain("Publish failed for weight 4.00"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_publish_timeout_is_logged() {
        let (device, _) = ScriptedDevice::frames(&["S 2.0", "S 2.0", "S 2.0"]);
        let publisher = MockPublisher::with(Behaviour::Hang);

        run_for(bridge(device, publisher.clone()), Duration::from_secs(5)).await;

        assert_eq!(publisher.attempts(), 1);
        assert!(logs_contain("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_closes_device() {
        let (device, counters) = ScriptedDevice::frames(&[]);
        let publisher = MockPublisher::with(Behaviour::Accept);

        run_for(bridge(device, publisher), Duration::from_millis(50)).await;

        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_locking_mode_through_process() {
        let (device, _) = ScriptedDevice::frames(&[]);
        let publisher = MockPublisher::with(Behaviour::Accept);
        let mut bridge = bridge_with(
            device,
            publisher.clone(),
            StabilityConfig {
                mode: StabilityMode::Locking,
                ..Default::default()
            },
        );

        for _ in 0..3 {
            assert!(bridge.process(b"S 0.01").await.unwrap().is_none());
        }
        assert!(bridge.process(b"U 0.01").await.unwrap().is_none());

        bridge.process(b"S 1.25").await.unwrap();
        bridge.process(b"S 1.25").await.unwrap();
        let locked = bridge.process(b"S 1.25").await.unwrap().unwrap();
        assert_eq!(locked.action, EventAction::Locked);
        assert!(bridge.tracker_state().locked);

        let reset = bridge.process(b"U 0.00").await.unwrap().unwrap();
        assert_eq!(reset.action, EventAction::Reset);
        assert_eq!(
            publisher.payloads(),
            vec![
                r#"{"weight":"1.25"}"#.to_string(),
                r#"{"weight":"0.00"}"#.to_string()
            ]
        );
    }
}
