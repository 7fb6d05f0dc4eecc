pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod grants;
pub mod session;
pub mod tickets;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use domain::access::{AccessLookup, AccessSnapshot, AccessState, DownloadResult};
pub use domain::document_request::{
    ApprovalError, DocumentRequest, DocumentRequestId, RequestStatus,
};
pub use domain::property::{PropertyDocument, PropertyId, PropertySummary};
pub use domain::UserId;
pub use errors::{AccessError, InterfaceError, StoreError};
pub use grants::{
    AccessGrantWorkflow, Decision, DownloadOutcome, GrantPolicy, GrantStore,
    InMemoryGrantStore, InMemoryPropertyDirectory, PropertyDirectory,
};
pub use session::{ClientInfo, Principal, Role, Session};
pub use tickets::{DownloadTicket, TicketError, TicketSigner};
