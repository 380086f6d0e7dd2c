//! Tracker engine: submission, status transports, polling and the job controller.
mod controller;
mod push;
mod scheduler;
mod settings;
mod status;
mod transfer;
mod types;
mod wire;

pub use controller::{JobController, Subscription};
pub use push::WebSocketStatusSource;
pub use scheduler::PollScheduler;
pub use settings::{
    EndpointError, ScheduleStrategy, StatusEndpoint, StatusTransport, TrackerSettings,
};
pub use status::{
    HttpStatusSource, PullSource, PushSource, PushSubscription, ReportGate, ReportSink,
    StatusSource,
};
pub use transfer::{ProgressSink, ReqwestTransfer, TransferChannel};
pub use types::{FailureKind, Payload, PollError, SubmitError, TransferError, TransferReceipt};
