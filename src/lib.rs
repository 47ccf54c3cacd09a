pub mod classify;
pub mod config;
pub mod payload;
pub mod pipeline;
pub mod provider;
pub mod return_path;
pub mod store;

pub use config::Config;
pub use payload::{EventData, PayloadError, WebhookEvent};
pub use pipeline::{EventHook, EventOutcome, EventPipeline, SkipReason};
pub use provider::{ProviderHandler, ProviderRegistry, WebApiProvider, WebhookEndpoint};
pub use return_path::ReturnPath;
pub use store::{BounceRecord, BounceType, MemoryStore};
