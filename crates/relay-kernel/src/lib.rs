pub mod clock;
pub mod ids;
pub mod notify;
pub mod registry;
pub mod resolve;
pub mod scheduler;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use ids::{IdGenerator, UuidV4Ids};
pub use notify::{Change, ChangeSink, NoopSink};
pub use registry::{Created, NewRequest, Policy, Registry, RegistryError, CAPACITY, MAX_CHOICES};
pub use resolve::{resolve_action, status_for_choice};
pub use scheduler::{TickReport, TickScheduler};
