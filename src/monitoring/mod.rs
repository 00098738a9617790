//! Monitoring: health derivation, alerting, retention and reporting

pub mod log_store;
pub mod notifications;
pub mod service;
pub mod system;
pub mod types;

pub use log_store::{log_file_name, LogStore};
pub use notifications::{
    EmailChannel, EmailMessage, EmailSender, LogEmailSender, NotificationChannel, WebhookChannel,
};
pub use service::{classify_health, MonitoringService, RetentionReport, GATEWAY_SERVER_NAME};
pub use system::{snapshot, SystemSnapshot};
pub use types::{
    Alert, AlertFilter, Dashboard, DashboardOverview, ExportFormat, LogEntry, LogFilter, LogLevel,
    MetricPoint, MetricType, ServerHealth, Severity,
};
