//! Infrastructure Layer
//!
//! Database implementations and external service integrations.

pub mod delivery;
pub mod events;
pub mod memory;
pub mod postgres;

pub use delivery::{DeliveryClient, LogDelivery, WebhookDelivery};
pub use events::{ChannelEventBroadcaster, TracingEventBroadcaster};
pub use memory::InMemoryAuthRepository;
pub use postgres::PgAuthRepository;
