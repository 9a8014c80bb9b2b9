pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod locks;
pub mod retry;
pub mod store;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::EngageConfig;
pub use error::{EngageError, EngageResult};
pub use event::{BehaviorEvent, EventKind, EventPayload, PurchaseDetails};
pub use locks::KeyedLocks;
pub use retry::RetryPolicy;
pub use store::{DocumentStore, MemoryStore};
