//! Built-in record payloads: agent runs, payments, refunds and notifications.
//!
//! Each payload is a `Task`; its JSON form is what lands in `Record::input`.
//! Requests arrive with free-form strings and are validated into these types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Record, RecordId, RecordKind, RecordStatus};
use crate::error::DispatchError;
use crate::typed::{PayloadCodec, Task};

/// Agent execution; the caller's input is stored as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentRun(pub Value);

impl Task for AgentRun {
    const TYPE: &'static str = "vagais.agent.execute.v1";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Stripe,
    Paypal,
    Upi,
}

impl PaymentProvider {
    pub const ALL: [PaymentProvider; 3] = [
        PaymentProvider::Stripe,
        PaymentProvider::Paypal,
        PaymentProvider::Upi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::Paypal => "paypal",
            PaymentProvider::Upi => "upi",
        }
    }

    /// Prefix of the provider-side transaction id.
    pub fn transaction_prefix(self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "pi_",
            PaymentProvider::Paypal => "pay_",
            PaymentProvider::Upi => "upi_",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentProvider::ALL
            .into_iter()
            .find(|p| p.as_str() == s.to_ascii_lowercase())
            .ok_or_else(|| DispatchError::Validation(format!("unsupported payment provider: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCharge {
    pub provider: PaymentProvider,
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Value,
}

impl Task for PaymentCharge {
    const TYPE: &'static str = "vagais.payment.charge.v1";
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub provider: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Value,
}

impl PaymentRequest {
    pub fn validate(self) -> Result<PaymentCharge, DispatchError> {
        let provider: PaymentProvider = self.provider.parse()?;
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(DispatchError::Validation(
                "amount must be a positive number".to_string(),
            ));
        }
        let currency = self.currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DispatchError::Validation(format!(
                "currency must be a 3 letter code: {:?}",
                self.currency
            )));
        }
        Ok(PaymentCharge {
            provider,
            amount: self.amount,
            currency,
            description: self.description,
            metadata: self.metadata,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRefund {
    pub original_payment_id: RecordId,
    pub provider: PaymentProvider,
    /// Negated amount of the original payment.
    pub amount: f64,
    pub currency: String,
    pub description: String,
    #[serde(default)]
    pub reason: String,
}

impl Task for PaymentRefund {
    const TYPE: &'static str = "vagais.payment.refund.v1";
}

impl PaymentRefund {
    /// Build the refund of a completed payment. Ownership is checked by the
    /// caller.
    pub fn for_payment(payment: &Record, reason: String) -> Result<Self, DispatchError> {
        if payment.kind != RecordKind::Payment {
            return Err(DispatchError::InvalidState(format!(
                "{} is a {}, not a payment",
                payment.id, payment.kind
            )));
        }
        if payment.status != RecordStatus::Completed {
            return Err(DispatchError::InvalidState(
                "can only refund completed payments".to_string(),
            ));
        }
        let charge: PaymentCharge = PayloadCodec::decode(payment.input.clone())
            .map_err(|e| DispatchError::InvalidState(format!("payment input unreadable: {e}")))?;
        Ok(Self {
            original_payment_id: payment.id,
            provider: charge.provider,
            amount: -charge.amount,
            currency: charge.currency,
            description: format!("Refund: {}", charge.description),
            reason,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    InApp,
}

impl NotificationChannel {
    pub const ALL: [NotificationChannel; 3] = [
        NotificationChannel::Email,
        NotificationChannel::Sms,
        NotificationChannel::InApp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
            NotificationChannel::InApp => "in_app",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationChannel {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationChannel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| DispatchError::Validation(format!("unsupported notification channel: {s}")))
    }
}

const PRIORITIES: [&str; 4] = ["low", "normal", "high", "urgent"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDelivery {
    pub channel: NotificationChannel,
    pub title: String,
    pub message: String,
    pub priority: String,
    #[serde(default)]
    pub metadata: Value,
}

impl Task for NotificationDelivery {
    const TYPE: &'static str = "vagais.notification.deliver.v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub channel: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl NotificationRequest {
    pub fn validate(self) -> Result<NotificationDelivery, DispatchError> {
        let channel: NotificationChannel = self.channel.parse()?;
        if self.title.trim().is_empty() || self.message.trim().is_empty() {
            return Err(DispatchError::Validation(
                "title and message are required".to_string(),
            ));
        }
        let priority = self.priority.unwrap_or_else(|| "normal".to_string());
        if !PRIORITIES.contains(&priority.as_str()) {
            return Err(DispatchError::Validation(format!(
                "priority must be one of {PRIORITIES:?}"
            )));
        }
        Ok(NotificationDelivery {
            channel,
            title: self.title,
            message: self.message,
            priority,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewRecord, Outcome, SubjectId, TaskType, Terminal, UserId};
    use chrono::Utc;
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    fn payment_request(provider: &str, amount: f64) -> PaymentRequest {
        PaymentRequest {
            provider: provider.to_string(),
            amount,
            currency: "usd".to_string(),
            description: "Pro plan".to_string(),
            metadata: Value::Null,
        }
    }

    #[rstest]
    #[case("stripe", PaymentProvider::Stripe)]
    #[case("PayPal", PaymentProvider::Paypal)]
    #[case("upi", PaymentProvider::Upi)]
    fn known_providers(#[case] raw: &str, #[case] provider: PaymentProvider) {
        let charge = payment_request(raw, 10.0).validate().unwrap();
        assert_eq!(charge.provider, provider);
        assert_eq!(charge.currency, "USD");
    }

    #[rstest]
    #[case("bitcoin", 10.0)]
    #[case("stripe", 0.0)]
    #[case("stripe", -5.0)]
    #[case("stripe", f64::NAN)]
    fn invalid_payments(#[case] provider: &str, #[case] amount: f64) {
        assert!(matches!(
            payment_request(provider, amount).validate(),
            Err(DispatchError::Validation(_))
        ));
    }

    #[test]
    fn agent_run_input_is_stored_verbatim() {
        let input = json!({"x": 1});
        let encoded = PayloadCodec::encode(&AgentRun(input.clone())).unwrap();
        assert_eq!(encoded, input);
    }

    fn payment_record(status: RecordStatus) -> Record {
        let charge = payment_request("stripe", 42.5).validate().unwrap();
        let mut record = Record::new(
            RecordId::from_ulid(Ulid::new()),
            NewRecord {
                kind: RecordKind::Payment,
                task_type: TaskType::new(PaymentCharge::TYPE),
                owner_id: UserId::from_ulid(Ulid::new()),
                organization_id: None,
                subject_id: SubjectId::new("stripe"),
                input: PayloadCodec::encode(&charge).unwrap(),
            },
            Utc::now(),
        );
        match status {
            RecordStatus::Completed => record
                .finish(&Terminal::new(Outcome::completed(json!({})), 1, 1), Utc::now())
                .unwrap(),
            RecordStatus::Failed => record
                .finish(&Terminal::new(Outcome::failed("declined"), 1, 1), Utc::now())
                .unwrap(),
            _ => {}
        }
        record
    }

    #[test]
    fn refund_negates_the_original_amount() {
        let payment = payment_record(RecordStatus::Completed);
        let refund = PaymentRefund::for_payment(&payment, "duplicate".into()).unwrap();
        assert_eq!(refund.amount, -42.5);
        assert_eq!(refund.original_payment_id, payment.id);
        assert_eq!(refund.description, "Refund: Pro plan");
    }

    #[rstest]
    #[case(RecordStatus::Pending)]
    #[case(RecordStatus::Failed)]
    fn only_completed_payments_are_refundable(#[case] status: RecordStatus) {
        let payment = payment_record(status);
        assert!(matches!(
            PaymentRefund::for_payment(&payment, String::new()),
            Err(DispatchError::InvalidState(_))
        ));
    }

    #[rstest]
    #[case("email", "normal", true)]
    #[case("in_app", "urgent", true)]
    #[case("pigeon", "normal", false)]
    #[case("sms", "whenever", false)]
    fn notification_validation(#[case] channel: &str, #[case] priority: &str, #[case] ok: bool) {
        let req = NotificationRequest {
            channel: channel.to_string(),
            title: "Hello".to_string(),
            message: "World".to_string(),
            priority: Some(priority.to_string()),
            metadata: Value::Null,
        };
        assert_eq!(req.validate().is_ok(), ok);
    }
}
