//! Presentation side effects.
//!
//! The dispatcher never touches a page directly; it drives a [`UiSink`].
//! [`MemoryUi`] records everything for inspection, [`TracingUi`] renders to
//! the log.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use stonebeam_core::{ConnectionStatus, InboundMessage, MessageKind};

/// Badge counters a page may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Quotations,
    Orders,
    Messages,
    Notifications,
}

impl Counter {
    /// Element id of the counter on the page.
    pub fn element_id(self) -> &'static str {
        match self {
            Self::Quotations => "quotation-counter",
            Self::Orders => "order-counter",
            Self::Messages => "message-counter",
            Self::Notifications => "notification-badge",
        }
    }

    pub fn for_kind(kind: MessageKind) -> Option<Self> {
        match kind {
            MessageKind::Quotation => Some(Self::Quotations),
            MessageKind::Order => Some(Self::Orders),
            MessageKind::Message => Some(Self::Messages),
            MessageKind::Notification => Some(Self::Notifications),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
}

/// Transient on-screen notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub kind: MessageKind,
    pub level: Level,
    pub title: String,
    pub body: String,
    pub dismiss_after: Duration,
    pub closable: bool,
}

/// Page-wide banner for system notices.
#[derive(Debug, Clone, PartialEq)]
pub struct Banner {
    pub level: Level,
    pub text: String,
    pub duration: Duration,
}

/// Named event broadcast to unrelated page code.
#[derive(Debug, Clone, PartialEq)]
pub struct UiEvent {
    pub name: String,
    pub detail: InboundMessage,
}

impl UiEvent {
    /// Event named after the message kind, e.g. `orderUpdate`.
    pub fn for_message(msg: &InboundMessage) -> Self {
        Self {
            name: format!("{}Update", msg.kind()),
            detail: msg.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusColor {
    Red,
    Amber,
    Green,
}

/// The connection-status dot and its caption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusIndicator {
    pub status: ConnectionStatus,
    pub class: &'static str,
    pub color: StatusColor,
    pub text: &'static str,
}

impl From<ConnectionStatus> for StatusIndicator {
    fn from(status: ConnectionStatus) -> Self {
        let (class, color, text) = match status {
            ConnectionStatus::Disconnected => ("offline", StatusColor::Red, "Offline"),
            ConnectionStatus::Connecting => ("connecting", StatusColor::Amber, "Connecting..."),
            ConnectionStatus::Connected => ("online", StatusColor::Green, "Live"),
        };
        Self {
            status,
            class,
            color,
            text,
        }
    }
}

/// Where dispatch side effects land.
pub trait UiSink: Send + Sync {
    /// Add `delta` to a counter and return its new value, or `None` if the
    /// page has no such counter.
    fn adjust_counter(&self, counter: Counter, delta: i64) -> Option<i64>;
    fn show_toast(&self, toast: Toast);
    fn show_banner(&self, banner: Banner);
    fn emit(&self, event: UiEvent);
    fn set_status(&self, indicator: StatusIndicator);
}

#[derive(Debug, Default)]
struct Recorded {
    counters: HashMap<Counter, i64>,
    toasts: Vec<Toast>,
    banners: Vec<Banner>,
    events: Vec<UiEvent>,
    statuses: Vec<StatusIndicator>,
}

/// Sink that records every effect. Counters exist only once seeded.
#[derive(Debug, Default)]
pub struct MemoryUi {
    inner: Mutex<Recorded>,
}

impl MemoryUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a counter, as if the page rendered it with `value`.
    pub fn with_counter(self, counter: Counter, value: i64) -> Self {
        self.lock().counters.insert(counter, value);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn counter(&self, counter: Counter) -> Option<i64> {
        self.lock().counters.get(&counter).copied()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.lock().toasts.clone()
    }

    pub fn banners(&self) -> Vec<Banner> {
        self.lock().banners.clone()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.lock().events.clone()
    }

    pub fn statuses(&self) -> Vec<StatusIndicator> {
        self.lock().statuses.clone()
    }

    pub fn last_status(&self) -> Option<StatusIndicator> {
        self.lock().statuses.last().copied()
    }
}

impl UiSink for MemoryUi {
    fn adjust_counter(&self, counter: Counter, delta: i64) -> Option<i64> {
        let mut inner = self.lock();
        let value = inner.counters.get_mut(&counter)?;
        *value += delta;
        Some(*value)
    }

    fn show_toast(&self, toast: Toast) {
        self.lock().toasts.push(toast);
    }

    fn show_banner(&self, banner: Banner) {
        self.lock().banners.push(banner);
    }

    fn emit(&self, event: UiEvent) {
        self.lock().events.push(event);
    }

    fn set_status(&self, indicator: StatusIndicator) {
        self.lock().statuses.push(indicator);
    }
}

/// Sink that logs effects. Every counter is present and starts at zero.
#[derive(Debug, Default)]
pub struct TracingUi {
    counters: Mutex<HashMap<Counter, i64>>,
}

impl TracingUi {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UiSink for TracingUi {
    fn adjust_counter(&self, counter: Counter, delta: i64) -> Option<i64> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let value = counters.entry(counter).or_insert(0);
        *value += delta;
        if delta != 0 {
            tracing::info!(counter = counter.element_id(), value = *value, "counter");
        }
        Some(*value)
    }

    fn show_toast(&self, toast: Toast) {
        match toast.level {
            Level::Warning => tracing::warn!(kind = %toast.kind, "{}: {}", toast.title, toast.body),
            _ => tracing::info!(kind = %toast.kind, "{}: {}", toast.title, toast.body),
        }
    }

    fn show_banner(&self, banner: Banner) {
        match banner.level {
            Level::Warning => tracing::warn!("[banner] {}", banner.text),
            _ => tracing::info!("[banner] {}", banner.text),
        }
    }

    fn emit(&self, event: UiEvent) {
        tracing::debug!(event = %event.name, "ui event");
    }

    fn set_status(&self, indicator: StatusIndicator) {
        tracing::info!("connection {}", indicator.text);
    }
}
