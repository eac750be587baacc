//! Domain models for mail entities

mod account;
mod inbound;
mod label;
mod message;
mod thread;

pub use account::{Account, Backend, ChannelDefaults, ResolvedSettings, ThreadReplyPolicy};
pub use inbound::{InboundMessage, Sender};
pub use label::{Label, LabelId, SendAs};
pub use message::{Attachment, EmailAddress, MessageId, ThreadMessage, ThreadMessageBuilder, parse_date_header};
pub use thread::{ThreadId, ThreadResponse, ThreadSummary};
