//! Browser driver seam.
//!
//! The runtime is agnostic to how pages are actually driven; everything
//! behind these traits is an external collaborator. All methods block and
//! are only ever called through the async bridge, so implementations may
//! take as long as the configured deadlines allow but must never touch
//! interpreter state.

use crate::runtime::error::HostError;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Size of a tab viewport in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Host-originated events a tab emits from driver-owned threads.
pub enum TabEvent {
    /// A page dialog wants an accept/dismiss decision.
    Dialog {
        kind: String,
        message: String,
        respond: oneshot::Sender<bool>,
    },
    /// A download started under the given guid.
    DownloadBegin { guid: String, filename: String },
    /// The download's file is in place.
    DownloadComplete { guid: String },
    /// A download was abandoned.
    DownloadCanceled { guid: String },
}

pub type EventSink = Box<dyn Fn(TabEvent) + Send + Sync>;

/// Factory for driven tabs.
pub trait Driver: Send + Sync + 'static {
    fn open_tab(&self) -> Result<Arc<dyn DriverTab>, HostError>;
}

/// One driven browser tab.
pub trait DriverTab: Send + Sync {
    fn navigate(&self, url: &str) -> Result<(), HostError>;
    fn back(&self) -> Result<(), HostError>;
    fn forward(&self) -> Result<(), HostError>;
    fn reload(&self) -> Result<(), HostError>;
    fn url(&self) -> Result<String, HostError>;
    fn title(&self) -> Result<String, HostError>;
    fn viewport(&self) -> Result<Viewport, HostError>;
    fn set_viewport(&self, viewport: Viewport) -> Result<(), HostError>;
    /// Capture the current page as encoded image bytes.
    fn screenshot(&self) -> Result<Vec<u8>, HostError>;
    /// Install the sink host events are delivered to. Events may fire from
    /// any driver thread.
    fn set_event_sink(&self, sink: EventSink);
    fn close(&self);
}
