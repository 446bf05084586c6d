pub mod notification_service;
pub mod query_service;

pub use notification_service::{NotificationService, NotificationServiceDependencies};
pub use query_service::{NotificationQueryService, NotificationQueryServiceDependencies};
