//! Sync engine: polling, dedup, quarantine and dispatch
//!
//! Each account gets one [`Monitor`] wrapping one [`InboxSync`]. Dispatch
//! slots come from a [`DispatchLimiter`] shared by all accounts.

mod dedup;
mod handler;
mod inbox;
mod limiter;
mod monitor;
mod timing;

pub use dedup::DedupSet;
pub use handler::{AccountStatus, InboundHandler, StatusSink};
pub use inbox::{
    INBOX_QUERY, InboxSync, PAGE_SIZE, PassStats, attachment_dir, message_text, sanitize_path_component,
};
pub use limiter::DispatchLimiter;
pub use monitor::Monitor;
pub use timing::cooldown_elapsed;
