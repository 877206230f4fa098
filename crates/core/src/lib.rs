pub mod audit;
pub mod config;
pub mod delegation;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod notify;
pub mod timeout;

pub use audit::{AuditEntry, AuditRecorder, InMemoryAuditRecorder};
pub use config::{
    AppConfig, ConfigError, ConfigOverrides, DatabaseConfig, DirectoryConfig, DirectoryUserEntry,
    LoadOptions, LogFormat, LoggingConfig, ServerConfig, SweeperConfig,
};
pub use delegation::{effective_approver, would_cycle};
pub use directory::{Directory, DirectoryError, DirectoryUser, InMemoryDirectory};
pub use domain::delegation::{Delegation, DelegationId, DelegationType};
pub use domain::flow::{ApproverMode, FlowDefinition, FlowId, Node, NodeId, NodeType};
pub use domain::request::{ApprovalRequest, RequestId, RequestStatus};
pub use domain::task::{ApprovalTask, Decision, TaskId, TaskStatus};
pub use errors::WorkflowError;
pub use notify::{InMemoryNotifier, NoopNotifier, Notification, NotificationTemplate, Notifier};
pub use timeout::{
    AutoRejectPolicy, EscalationPolicy, RemindPolicy, TimeoutAction, TimeoutPolicy,
};
