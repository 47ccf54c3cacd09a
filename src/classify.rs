use crate::payload::EventData;
use crate::store::BounceType;

/// Abuse complaint forwarded by the provider's feedback loop.
pub const EVENT_ABUSE_REPORT: &str = "incoming-report.abuse-report";
/// Fraud complaint forwarded by the provider's feedback loop.
pub const EVENT_FRAUD_REPORT: &str = "incoming-report.fraud-report";
/// Permanent DSN failure.
pub const EVENT_DSN_PERM_FAIL: &str = "delivery.dsn-perm-fail";
/// Transient DSN failure.
pub const EVENT_DSN_TEMP_FAIL: &str = "delivery.dsn-temp-fail";
/// Delivery given up inside the provider.
pub const EVENT_DELIVERY_FAILED: &str = "delivery.failed";

pub fn is_complaint(event_type: &str) -> bool {
    matches!(event_type, EVENT_ABUSE_REPORT | EVENT_FRAUD_REPORT)
}

/// Map a provider event type to a bounce classification. Types outside the
/// bounce vocabulary get none.
pub fn bounce_type(event_type: &str) -> Option<BounceType> {
    match event_type {
        EVENT_DSN_PERM_FAIL => Some(BounceType::Hard),
        EVENT_DSN_TEMP_FAIL => Some(BounceType::Soft),
        EVENT_DELIVERY_FAILED => Some(BounceType::Internal),
        _ => None,
    }
}

/// Extract the diagnostic message for an event. First match wins:
/// the `reason` field for failed deliveries, then `details`, then the
/// complaint report fields, then a fixed fallback.
pub fn extract_message(event_type: &str, data: &EventData) -> String {
    if event_type == EVENT_DELIVERY_FAILED {
        if let Some(reason) = &data.reason {
            return reason.clone();
        }
    }

    // DSN bounces carry the full SMTP error in details.
    if let Some(details) = &data.details {
        return details.join();
    }

    if is_complaint(event_type) {
        let mut parts = Vec::new();
        if let Some(hostname) = &data.hostname {
            parts.push(format!("Reporter: {hostname}"));
        }
        if let Some(remote_ip) = &data.remote_ip {
            parts.push(format!("IP: {remote_ip}"));
        }
        if let Some(result) = &data.result {
            parts.push(format!("Result: {result}"));
        }
        if parts.is_empty() {
            return "Complaint received".to_string();
        }
        return parts.join(", ");
    }

    "No details provided".to_string()
}
