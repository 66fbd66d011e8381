//! Built-in task handlers.
//!
//! The only handler shipped with the crate is the welcome-email task; it
//! doubles as the reference implementation for writing handlers against an
//! external collaborator.

use crate::core::registry::{TaskContext, TaskHandler};
use crate::error::{MillError, MillResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Task type identifier for the welcome email task.
pub const TASK_WELCOME_EMAIL: &str = "welcome_email";

/// Payload of a welcome email task.
///
/// Field names match the producing service's wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeEmailPayload {
    /// Recipient address
    pub to: String,
    /// Recipient's first name, used in the template
    pub first_name: String,
}

/// Outbound email collaborator.
///
/// The real client lives outside this crate; handlers only see this
/// interface. A transport failure here is transient and retryable.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send the welcome email template to a recipient.
    async fn send_welcome(&self, to: &str, first_name: &str) -> MillResult<()>;
}

/// Handler for [`TASK_WELCOME_EMAIL`] tasks.
pub struct WelcomeEmailHandler {
    mailer: Arc<dyn Mailer>,
}

impl WelcomeEmailHandler {
    /// Create a handler over an email collaborator.
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl TaskHandler for WelcomeEmailHandler {
    async fn handle(&self, ctx: TaskContext, payload: &[u8]) -> MillResult<()> {
        let payload: WelcomeEmailPayload =
            serde_json::from_slice(payload).map_err(|e| MillError::PayloadDecode {
                task_type: ctx.task_type.clone(),
                source: e,
            })?;

        tracing::info!(
            task_id = %ctx.task_id,
            to = %payload.to,
            attempt = ctx.attempt,
            "processing welcome email task"
        );

        self.mailer
            .send_welcome(&payload.to, &payload.first_name)
            .await
            .map_err(|e| MillError::handler_msg(format!("welcome email send failed: {e}")))?;

        tracing::info!(task_id = %ctx.task_id, to = %payload.to, "welcome email sent");
        Ok(())
    }
}
