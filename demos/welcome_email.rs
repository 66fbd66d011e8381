//! End-to-end demo: register the welcome-email handler, submit a few
//! tasks across queue classes and drain on Ctrl+C.
//!
//! Run with: `cargo run --example welcome_email`

use std::sync::Arc;
use std::time::Duration;

use taskmill::handlers::{Mailer, WelcomeEmailHandler, WelcomeEmailPayload, TASK_WELCOME_EMAIL};
use taskmill::prelude::*;

/// Stand-in for a real email client: logs instead of sending.
struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send_welcome(&self, to: &str, first_name: &str) -> MillResult<()> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tracing::info!(to, first_name, "welcome email delivered");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> MillResult<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut handlers = RegistryBuilder::new();
    handlers.register(
        TASK_WELCOME_EMAIL,
        Arc::new(WelcomeEmailHandler::new(Arc::new(ConsoleMailer))),
    )?;

    let broker = Arc::new(InMemoryBroker::new());
    let service = MillService::new(MillConfig::development(), broker, handlers.build())?
        .with_hooks(vec![Arc::new(LogHook)]);

    service.start().await?;

    for (name, queue) in [
        ("Ada", QueueClass::Critical),
        ("Grace", QueueClass::Default),
        ("Edsger", QueueClass::Low),
    ] {
        let payload = WelcomeEmailPayload {
            to: format!("{}@example.com", name.to_lowercase()),
            first_name: name.to_string(),
        };
        let task_id = service
            .submit(TASK_WELCOME_EMAIL, &payload, queue)
            .await?;
        tracing::info!(%task_id, %queue, "submitted welcome email");
    }

    tracing::info!("press Ctrl+C to drain and stop");
    service.run_until_shutdown().await?;

    let stats = service.broker_stats().await?;
    tracing::info!(completed = stats.completed, dead = stats.dead, "final counts");
    Ok(())
}
