mod message_lifecycle;
mod reactions;
mod read_receipts;

pub use message_lifecycle::{MessageLifecycleCoordinator, MessageLifecycleDependencies};
pub use reactions::{ReactionDependencies, ReactionReconciler, ReactionRemoval, ReactionTransition};
pub use read_receipts::{ReadOutcome, ReadReceiptAggregator, ReadReceiptDependencies};
