pub mod fetcher;
pub mod handle;
pub mod inbox;
pub mod monitor;
pub mod notifier;
pub mod registry;
pub mod scheduler;

pub use fetcher::{FetchReport, FetchWorker};
pub use handle::RepositoryHandle;
pub use inbox::{inbox, CallbackId, Inbox, InboxReceiver, Task};
pub use monitor::Monitor;
pub use notifier::Notifier;
pub use registry::RepositoryRegistry;
pub use scheduler::{Completion, PollScheduler, Trigger, TriggerOutcome};
