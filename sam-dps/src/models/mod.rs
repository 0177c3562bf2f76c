//! Data models for sam-dps

pub mod envelope;
pub mod job;
pub mod requests;
pub mod upload;

pub use envelope::{
    AuditRecord, DeferOutcome, DeferPayload, Envelope, FileJobPayload, TargetAction, TargetRpc,
    TargetService,
};
pub use job::{Job, JobStatus, JobType, NewJob};
pub use upload::{
    DataType, DeletionRecord, DeletionStatus, DeletionType, NewUpload, ScopeType, UploadRecord,
    UploadStatus,
};
