//! Notification outbox
//!
//! Notification events are written through the open unit of work so they
//! commit or roll back with the effect that produced them. Delivery (SMS,
//! email, push) is handled elsewhere; once the unit commits the queued
//! events are logged as released.

use shared::models::{NewNotification, NotificationKind};
use uuid::Uuid;

use crate::error::AppResult;
use crate::store::UnitOfWork;

/// Notifications written during one unit of work
#[derive(Debug, Default)]
pub struct NotificationOutbox {
    queued: Vec<NewNotification>,
}

impl NotificationOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a notification inside `unit` and remember it for release
    pub async fn enqueue(
        &mut self,
        unit: &mut dyn UnitOfWork,
        notification: NewNotification,
    ) -> AppResult<()> {
        unit.insert_notification(&notification).await?;
        self.queued.push(notification);
        Ok(())
    }

    /// Call only after the unit has committed
    pub fn release(self) -> Vec<NewNotification> {
        for n in &self.queued {
            tracing::info!(
                user_id = %n.user_id,
                kind = n.kind.as_str(),
                title = %n.title,
                "notification queued for delivery"
            );
        }
        self.queued
    }
}

/// Build a notification event
pub fn notification(
    user_id: Uuid,
    kind: NotificationKind,
    title: &str,
    message: String,
    data: serde_json::Value,
) -> NewNotification {
    NewNotification {
        user_id,
        title: title.to_string(),
        message,
        kind,
        data,
    }
}
