pub mod notifier;
pub mod publisher;

pub use notifier::{CallbackHandler, CallbackKind, Notifier};
pub use publisher::{EventPublisher, PublishError, PublishedEvent};
