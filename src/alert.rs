//! Debounced alert dispatch.
//!
//! The dispatcher owns the cooldown state and is only touched by the worker
//! thread. Time comes from an injected [`Clock`] so the debounce rule stays a
//! pure function of (cooldown end, now).

use crate::model::Label;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_derive::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    Horn,
    Emergency,
}

impl AlertKind {
    /// Only horn and siren labels raise alerts.
    pub fn from_label(label: Label) -> Option<AlertKind> {
        match label {
            Label::CarHorn => Some(AlertKind::Horn),
            Label::EmergencyVehicle => Some(AlertKind::Emergency),
            Label::Traffic | Label::Background => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::Horn => "Car Horn Alert!",
            AlertKind::Emergency => "Emergency Vehicle Alert!",
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            AlertKind::Horn => "Car horn detected nearby!",
            AlertKind::Emergency => "Emergency vehicle detected nearby!",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds on the pipeline clock.
    pub at_ms: u64,
    /// `None` when vibration is disabled.
    pub vibration: Option<Duration>,
    /// Sequence number of the chunk that raised the alert.
    pub chunk: u64,
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        ManualClock(AtomicU64::new(start_ms))
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives confirmed, debounced alerts.
pub trait AlertSink: Send {
    fn notify(&mut self, alert: &Alert);
}

/// Writes alerts to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn notify(&mut self, alert: &Alert) {
        warn!(
            "{} {} (vibrate {:?}, chunk {})",
            alert.kind.title(),
            alert.kind.body(),
            alert.vibration,
            alert.chunk
        );
    }
}

/// Forwards alerts to any number of subscribers.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: broadcast::Sender<Alert>,
}

impl ChannelSink {
    pub fn new(sender: broadcast::Sender<Alert>) -> Self {
        ChannelSink { sender }
    }
}

impl AlertSink for ChannelSink {
    fn notify(&mut self, alert: &Alert) {
        if self.sender.send(alert.clone()).is_err() {
            debug!("No alert subscribers, {:?} not delivered", alert.kind);
        }
    }
}

/// Keeps every alert; clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        match self.alerts.lock() {
            Ok(a) => a.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AlertSink for CollectingSink {
    fn notify(&mut self, alert: &Alert) {
        match self.alerts.lock() {
            Ok(mut a) => a.push(alert.clone()),
            Err(poisoned) => poisoned.into_inner().push(alert.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Cooldown { until_ms: u64 },
}

/// True when a detection at `now_ms` may alert given the current cooldown end.
pub fn cooldown_elapsed(until_ms: u64, now_ms: u64) -> bool {
    now_ms >= until_ms
}

#[derive(Debug)]
pub struct AlertDispatcher {
    state: DispatchState,
    cooldown_ms: u64,
}

impl AlertDispatcher {
    pub fn new(cooldown_ms: u64) -> Self {
        AlertDispatcher {
            state: DispatchState::Idle,
            cooldown_ms,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Returns the alert kind to raise for `label` at `now_ms`, or `None` when the
    /// label is not alertable or the detection falls inside the cooldown window.
    /// Suppressed detections are dropped, not deferred.
    pub fn dispatch(&mut self, label: Label, now_ms: u64) -> Option<AlertKind> {
        let kind = AlertKind::from_label(label)?;
        let until_ms = match self.state {
            DispatchState::Idle => 0,
            DispatchState::Cooldown { until_ms } => until_ms,
        };
        if !cooldown_elapsed(until_ms, now_ms) {
            debug!("{:?} debounced, cooldown for another {} ms", kind, until_ms - now_ms);
            return None;
        }
        self.state = DispatchState::Cooldown {
            until_ms: now_ms.saturating_add(self.cooldown_ms),
        };
        info!("Triggering {:?} alert", kind);
        Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_detection_alerts_from_idle() {
        let mut d = AlertDispatcher::new(5000);
        assert_eq!(d.dispatch(Label::CarHorn, 0), Some(AlertKind::Horn));
        assert_eq!(d.state(), DispatchState::Cooldown { until_ms: 5000 });
    }

    #[test]
    fn detections_within_window_alert_once() {
        let mut d = AlertDispatcher::new(5000);
        let alerts = [1_000, 5_999]
            .iter()
            .filter_map(|&t| d.dispatch(Label::CarHorn, t))
            .count();
        assert_eq!(alerts, 1);
    }

    #[test]
    fn detections_5001_ms_apart_alert_twice() {
        let mut d = AlertDispatcher::new(5000);
        assert!(d.dispatch(Label::EmergencyVehicle, 10_000).is_some());
        assert!(d.dispatch(Label::CarHorn, 15_001).is_some());
    }

    #[test]
    fn debounced_detection_does_not_extend_cooldown() {
        let mut d = AlertDispatcher::new(5000);
        d.dispatch(Label::CarHorn, 0);
        assert_eq!(d.dispatch(Label::CarHorn, 4000), None);
        assert_eq!(d.state(), DispatchState::Cooldown { until_ms: 5000 });
        assert_eq!(d.dispatch(Label::CarHorn, 5000), Some(AlertKind::Horn));
    }

    #[test]
    fn traffic_and_background_never_alert() {
        let mut d = AlertDispatcher::new(5000);
        assert_eq!(d.dispatch(Label::Traffic, 0), None);
        assert_eq!(d.dispatch(Label::Background, 0), None);
        assert_eq!(d.state(), DispatchState::Idle);
    }

    #[test]
    fn cooldown_rule() {
        assert!(cooldown_elapsed(0, 0));
        assert!(cooldown_elapsed(5000, 5000));
        assert!(!cooldown_elapsed(5000, 4999));
    }

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(100);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);
        clock.set(7);
        assert_eq!(clock.now_ms(), 7);
    }

    #[test]
    fn channel_sink_forwards() {
        let (tx, mut rx) = broadcast::channel(4);
        let mut sink = ChannelSink::new(tx);
        let alert = Alert {
            kind: AlertKind::Horn,
            timestamp: Utc::now(),
            at_ms: 1,
            vibration: Some(Duration::from_millis(500)),
            chunk: 0,
        };
        sink.notify(&alert);
        assert_eq!(rx.try_recv().unwrap(), alert);
    }
}
