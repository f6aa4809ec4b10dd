//! Chat surface — data model, event fan-out, and the HTTP/WS routes.

pub mod fanout;
pub mod model;
pub mod ws;

pub use fanout::{BroadcastPublisher, ChatEvent, Publisher, SessionFilter};
pub use model::{ApprovalStatus, ChatScope, DeliveryKind, Message, NewMessage};
