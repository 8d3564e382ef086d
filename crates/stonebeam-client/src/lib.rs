//! Client runtime for StoneBeam live updates.
//!
//! [`LiveUpdates`] negotiates one transport (socket, then push stream, then
//! polling), keeps it alive, and hands every decoded message to a
//! [`Dispatcher`], which updates the page through a [`UiSink`] and notifies
//! subscribers.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stonebeam_client::{ClientConfig, LiveUpdates, SessionStorage, TracingUi};
//! use stonebeam_core::MessageKind;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let live = LiveUpdates::create(
//!     ClientConfig::default().with_base_url("http://localhost:8080"),
//!     Arc::new(TracingUi::new()),
//!     Arc::new(SessionStorage::new()),
//! );
//! live.subscribe(MessageKind::Order, |msg| {
//!     println!("order update: {:?}", msg.body);
//!     Ok(())
//! });
//! let transport = live.connect().await?;
//! println!("connected via {transport}");
//! live.dispose().await;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod config;
mod dispatch;
mod error;
mod live;
mod session;
mod transport;
mod ui;

pub use backoff::Backoff;
pub use config::ClientConfig;
pub use dispatch::{BoxError, Dispatcher, Subscriber, SubscriberId, SubscriberRegistry, Watermark};
pub use error::{ClientError, SendError};
pub use live::{LinkEvent, LiveUpdates, PageEvent};
pub use session::{Account, CURRENT_DEALER_KEY, CURRENT_USER_KEY, CurrentUser, SessionStorage};
pub use ui::{
    Banner, Counter, Level, MemoryUi, StatusColor, StatusIndicator, Toast, TracingUi, UiEvent,
    UiSink,
};
