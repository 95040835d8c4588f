use crate::errors::Result;
use crate::models::{PointsEvent, PointsEventType, Recipient};
use async_nats::Client;
use tracing::info;

/// Subject suffix for one event class. Subscribers pick classes with
/// wildcards, e.g. `rewards.points.*`.
fn subject_suffix(event_type: PointsEventType) -> &'static str {
    match event_type {
        PointsEventType::Adjusted => "adjusted",
        PointsEventType::RuleApplied => "rule-applied",
        PointsEventType::Redeemed => "redeemed",
        PointsEventType::BalanceSet => "balance-set",
        PointsEventType::MemberAdded => "member-added",
        PointsEventType::MemberRemoved => "member-removed",
    }
}

fn recipient_label(recipient: &Recipient) -> String {
    match recipient {
        Recipient::User(id) => format!("user {}", id),
        Recipient::Organization(id) => format!("organization {}", id),
        Recipient::Users(ids) => format!("{} users", ids.len()),
        Recipient::All => "all accounts".to_string(),
    }
}

/// Fire-and-forget event publisher. Callers log and swallow failures;
/// notification delivery never gates a ledger write.
pub struct NatsProducer {
    client: Client,
    topic_prefix: String,
}

impl NatsProducer {
    pub async fn new(url: &str, topic_prefix: &str) -> Result<Self> {
        let client = async_nats::connect(url).await?;

        info!("Connected to NATS at {}", url);

        Ok(NatsProducer {
            client,
            topic_prefix: topic_prefix.to_string(),
        })
    }

    pub async fn publish_points_event(&self, event: &PointsEvent) -> Result<()> {
        let subject = format!(
            "{}.points.{}",
            self.topic_prefix,
            subject_suffix(event.event_type)
        );
        let payload = serde_json::to_vec(event)?;

        self.client.publish(subject.clone(), payload.into()).await?;

        info!(
            "Published {:?} event for user {} in org {} to {} (recipient: {})",
            event.event_type,
            event.user_id,
            event.org_id,
            subject,
            recipient_label(&event.recipient)
        );

        Ok(())
    }
}
