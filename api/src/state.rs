use std::sync::Arc;

use sqlx::PgPool;

use crate::confirmation::ConfirmationStore;
use crate::delivery::DeliveryService;
use crate::message::MessageService;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub service: Arc<MessageService>,
    pub store: Arc<ConfirmationStore>,
    pub delivery: Arc<DeliveryService>,
    /// Static bearer token guarding the operational endpoints. Unset means
    /// open access (dev only).
    pub ops_token: Option<String>,
    pub delivery_max_attempts: i32,
}
