//! Routing decoded messages to the page and to subscribers.

use crate::ui::{Banner, Counter, Level, Toast, UiEvent, UiSink};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use stonebeam_core::{
    Action, DirectMessage, InboundMessage, MessageBody, MessageKind, NotificationUpdate,
    OrderUpdate, QuotationUpdate, SystemNotice,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with every dispatched message of its kind.
pub type Subscriber = Arc<dyn Fn(&InboundMessage) -> Result<(), BoxError> + Send + Sync>;

/// Handle returned by [`Dispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Highest message id seen so far. Never decreases.
#[derive(Debug, Default)]
pub struct Watermark(AtomicI64);

impl Watermark {
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Raise the watermark to `id` if it is higher. Returns the new value.
    pub fn advance(&self, id: i64) -> i64 {
        self.0.fetch_max(id, Ordering::AcqRel).max(id)
    }
}

/// Subscribers per message kind, in registration order. Duplicates allowed.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: u64,
    entries: HashMap<MessageKind, Vec<(SubscriberId, Subscriber)>>,
}

impl SubscriberRegistry {
    pub fn subscribe(&mut self, kind: MessageKind, callback: Subscriber) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.entries.entry(kind).or_default().push((id, callback));
        id
    }

    pub fn unsubscribe(&mut self, kind: MessageKind, id: SubscriberId) -> bool {
        let Some(list) = self.entries.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        list.len() != before
    }

    pub fn len(&self, kind: MessageKind) -> usize {
        self.entries.get(&kind).map_or(0, Vec::len)
    }

    fn snapshot(&self, kind: MessageKind) -> Vec<Subscriber> {
        self.entries
            .get(&kind)
            .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }
}

/// Applies inbound messages to the page and fans them out to subscribers.
pub struct Dispatcher {
    ui: Arc<dyn UiSink>,
    watermark: Arc<Watermark>,
    registry: Mutex<SubscriberRegistry>,
    updates: Mutex<Vec<InboundMessage>>,
    toast_duration: Duration,
    banner_duration: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Dispatcher {
    pub fn new(ui: Arc<dyn UiSink>, toast_duration: Duration, banner_duration: Duration) -> Self {
        Self {
            ui,
            watermark: Arc::new(Watermark::default()),
            registry: Mutex::new(SubscriberRegistry::default()),
            updates: Mutex::new(Vec::new()),
            toast_duration,
            banner_duration,
        }
    }

    pub fn subscribe<F>(&self, kind: MessageKind, callback: F) -> SubscriberId
    where
        F: Fn(&InboundMessage) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        lock(&self.registry).subscribe(kind, Arc::new(callback))
    }

    pub fn unsubscribe(&self, kind: MessageKind, id: SubscriberId) -> bool {
        lock(&self.registry).unsubscribe(kind, id)
    }

    pub fn subscriber_count(&self, kind: MessageKind) -> usize {
        lock(&self.registry).len(kind)
    }

    pub fn watermark(&self) -> i64 {
        self.watermark.get()
    }

    pub(crate) fn watermark_handle(&self) -> Arc<Watermark> {
        self.watermark.clone()
    }

    /// Generic updates received so far, oldest first.
    pub fn updates(&self) -> Vec<InboundMessage> {
        lock(&self.updates).clone()
    }

    /// Handle one message: advance the watermark, update the page, then call
    /// every subscriber registered for its kind.
    pub fn dispatch(&self, msg: &InboundMessage) {
        if let Some(id) = msg.id {
            self.watermark.advance(id);
        }

        match &msg.body {
            MessageBody::Quotation(q) => self.counted(msg, quotation_toast(q)),
            MessageBody::Order(o) => self.counted(msg, order_toast(o)),
            MessageBody::Message(m) => self.counted(msg, message_toast(m)),
            MessageBody::Notification(n) => self.counted(msg, notification_toast(n)),
            MessageBody::System(notice) => self.system(notice),
            MessageBody::Heartbeat => tracing::trace!("heartbeat"),
            MessageBody::Other(_) => {
                lock(&self.updates).push(msg.clone());
                self.ui.show_toast(Toast {
                    kind: MessageKind::Other,
                    level: Level::Info,
                    title: "Update".to_string(),
                    body: "New update received".to_string(),
                    dismiss_after: self.toast_duration,
                    closable: true,
                });
            }
        }

        self.notify(msg);
    }

    fn counted(&self, msg: &InboundMessage, (level, title, body): (Level, String, String)) {
        let kind = msg.kind();
        if let Some(counter) = Counter::for_kind(kind) {
            let delta = msg.body.counter_delta();
            if delta != 0 && self.ui.adjust_counter(counter, delta).is_none() {
                tracing::trace!("no {} element on page", counter.element_id());
            }
        }
        self.ui.show_toast(Toast {
            kind,
            level,
            title,
            body,
            dismiss_after: self.toast_duration,
            closable: true,
        });
        self.ui.emit(UiEvent::for_message(msg));
    }

    fn system(&self, notice: &SystemNotice) {
        if let Some(text) = &notice.maintenance {
            self.ui.show_banner(Banner {
                level: Level::Warning,
                text: text.clone(),
                duration: self.banner_duration,
            });
        }
        if let Some(text) = &notice.announcement {
            self.ui.show_banner(Banner {
                level: Level::Info,
                text: text.clone(),
                duration: self.banner_duration,
            });
        }
    }

    fn notify(&self, msg: &InboundMessage) {
        let kind = msg.kind();
        // Cloned out so callbacks run without the registry lock held.
        let subscribers = lock(&self.registry).snapshot(kind);
        for callback in subscribers {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(msg))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("{} subscriber failed: {}", kind, e),
                Err(_) => tracing::warn!("{} subscriber panicked", kind),
            }
        }
    }
}

fn quotation_toast(q: &QuotationUpdate) -> (Level, String, String) {
    let contractor = q.contractor_name.as_deref().unwrap_or("A contractor");
    match &q.action {
        Action::New => {
            let mut body = format!("{contractor} sent a quotation");
            if let Some(price) = q.price {
                body.push_str(&format!(" of ${price:.2}"));
            }
            if let Some(project) = &q.project_title {
                body.push_str(&format!(" for {project}"));
            }
            (Level::Success, "New quotation".to_string(), body)
        }
        Action::Delete => (
            Level::Info,
            "Quotation withdrawn".to_string(),
            format!("{contractor} withdrew a quotation"),
        ),
        other => (
            Level::Info,
            "Quotation updated".to_string(),
            format!("{contractor}: {}", describe(other)),
        ),
    }
}

fn order_toast(o: &OrderUpdate) -> (Level, String, String) {
    let order = o.order_id.as_deref().unwrap_or("your order");
    match (&o.action, &o.status) {
        (Action::New, _) => (
            Level::Success,
            "New order".to_string(),
            format!("Order {order} was placed"),
        ),
        (Action::Delete, _) => (
            Level::Info,
            "Order removed".to_string(),
            format!("Order {order} was removed"),
        ),
        (_, Some(status)) => (
            Level::Info,
            "Order updated".to_string(),
            format!("Order {order} is now {status}"),
        ),
        (other, None) => (
            Level::Info,
            "Order updated".to_string(),
            format!("Order {order}: {}", describe(other)),
        ),
    }
}

fn message_toast(m: &DirectMessage) -> (Level, String, String) {
    let sender = m.sender.as_deref().unwrap_or("Someone");
    let body = match &m.preview {
        Some(preview) => format!("{sender}: {preview}"),
        None => format!("{sender} sent you a message"),
    };
    (Level::Info, "New message".to_string(), body)
}

fn notification_toast(n: &NotificationUpdate) -> (Level, String, String) {
    (
        Level::Info,
        n.title.clone().unwrap_or_else(|| "Notification".to_string()),
        n.message.clone().unwrap_or_default(),
    )
}

fn describe(action: &Action) -> String {
    match action {
        Action::Unspecified => "changed".to_string(),
        other => other.to_string(),
    }
}
