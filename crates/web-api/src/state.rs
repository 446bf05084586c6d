use std::sync::Arc;

use application::{ConnectionRegistry, NotificationQueryService, NotificationService};
use config::ConnectionConfig;

#[derive(Clone)]
pub struct AppState {
    pub notification_service: Arc<NotificationService>,
    pub query_service: Arc<NotificationQueryService>,
    pub registry: Arc<ConnectionRegistry>,
    pub connection_config: ConnectionConfig,
}

impl AppState {
    pub fn new(
        notification_service: Arc<NotificationService>,
        query_service: Arc<NotificationQueryService>,
        registry: Arc<ConnectionRegistry>,
        connection_config: ConnectionConfig,
    ) -> Self {
        Self {
            notification_service,
            query_service,
            registry,
            connection_config,
        }
    }
}
