//! Tracker core: pure job lifecycle state machine and view-model helpers.
mod msg;
mod sequence;
mod state;
mod store;
mod view_model;

pub use msg::Msg;
pub use sequence::SequenceClock;
pub use state::{ErrorInfo, ErrorKind, JobId, JobSnapshot, Phase, StatusReport};
pub use store::{Applied, DiscardReason, JobStateStore, Subscriber, SubscriberId};
pub use view_model::JobView;
