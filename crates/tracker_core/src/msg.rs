use crate::{ErrorInfo, JobId, StatusReport};

/// Every mutation of the job record enters the store as one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Caller invoked submit; replaces any finished record with a fresh job.
    SubmitStarted,
    /// The transfer request is about to go out.
    UploadStarted,
    /// Percent of the payload handed to the transport.
    UploadProgress(u8),
    /// Transfer settled and the remote service assigned an id.
    TransferAccepted { job_id: JobId },
    /// Transfer failed before an id was assigned.
    TransferFailed(ErrorInfo),
    /// Status observation from a pull or push source.
    Report { job_id: JobId, report: StatusReport },
    /// Explicit cancel from the owner.
    Cancel,
    /// Maximum job duration elapsed.
    Expire { message: String },
}
