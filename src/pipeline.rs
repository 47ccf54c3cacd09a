use crate::classify;
use crate::payload::{self, PayloadError, WebhookEvent};
use crate::return_path::ReturnPath;
use crate::store::{
    BounceInsert, BounceRecord, BounceStore, BounceType, CampaignStore, FeedbackLoop, StoreError,
    SubscriberStore,
};
use serde_json::Value;
use std::sync::Arc;

/// Log channel for everything the webhook pipeline emits.
pub const LOG_TARGET: &str = "dswh::webhook";

/// Why an event terminated without mutating any state. None of these is a
/// request failure; the event is logged and its siblings keep processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingTypeOrData,
    MissingReturnPath,
    InvalidReturnPathFormat,
    Transactional,
    CampaignNotFound,
    SubscriberNotFound,
    Duplicate,
    Unclassified,
    StoreFailure,
}

/// Terminal state of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Complaint,
    BounceRecorded(BounceType),
    Skipped(SkipReason),
}

/// Hooks invoked around each event, in registration order.
pub trait EventHook: Send + Sync {
    fn before_event(&self, _event: &Value) {}
    fn after_event(&self, _event: &Value, _outcome: &EventOutcome) {}
}

/// Converts webhook events into bounce records and blacklist entries.
///
/// Per event: correlate the return path, resolve campaign and subscriber,
/// check for an already-recorded bounce, classify, then apply the complaint
/// or bounce mutation. Every early exit is a logged no-op.
pub struct EventPipeline {
    campaigns: Arc<dyn CampaignStore>,
    subscribers: Arc<dyn SubscriberStore>,
    bounces: Arc<dyn BounceStore>,
    feedback: Arc<dyn FeedbackLoop>,
    hooks: Vec<Arc<dyn EventHook>>,
}

impl EventPipeline {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        subscribers: Arc<dyn SubscriberStore>,
        bounces: Arc<dyn BounceStore>,
        feedback: Arc<dyn FeedbackLoop>,
    ) -> Self {
        EventPipeline {
            campaigns,
            subscribers,
            bounces,
            feedback,
            hooks: Vec::new(),
        }
    }

    /// Register an event hook. Hooks run in registration order.
    pub fn register_hook(&mut self, hook: Arc<dyn EventHook>) {
        self.hooks.push(hook);
    }

    /// Process one raw webhook request body.
    ///
    /// Body-level shape errors reject the whole request. Per-event failures
    /// are logged and reported in the outcome list without aborting sibling
    /// events; the outcome order matches the payload order.
    pub async fn process_request(&self, body: &[u8]) -> Result<Vec<EventOutcome>, PayloadError> {
        let events = payload::parse_payload(body).map_err(|e| {
            log::error!(target: LOG_TARGET, "rejected webhook payload: {e}");
            e
        })?;

        let mut outcomes = Vec::with_capacity(events.len());
        for event in &events {
            for hook in &self.hooks {
                hook.before_event(event);
            }
            let outcome = self.process_event(event).await;
            for hook in &self.hooks {
                hook.after_event(event, &outcome);
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn process_event(&self, raw: &Value) -> EventOutcome {
        let event = match WebhookEvent::from_value(raw.clone()) {
            Ok(event) => event,
            Err(e) => {
                log::error!(target: LOG_TARGET, "event missing type or data: {e}");
                return EventOutcome::Skipped(SkipReason::MissingTypeOrData);
            }
        };

        let from = match event.data.from.as_deref() {
            Some(from) => from,
            None => {
                log::error!(
                    target: LOG_TARGET,
                    "event missing from field: {}",
                    event.event_type
                );
                return EventOutcome::Skipped(SkipReason::MissingReturnPath);
            }
        };

        let (campaign_uid, subscriber_uid) = match ReturnPath::parse(from) {
            Ok(ReturnPath::Campaign {
                campaign_uid,
                subscriber_uid,
            }) => (campaign_uid, subscriber_uid),
            Ok(ReturnPath::Transactional) => {
                // Transactional mail has no campaign context to correlate.
                log::debug!(target: LOG_TARGET, "transactional return path, skipping: {from}");
                return EventOutcome::Skipped(SkipReason::Transactional);
            }
            Err(e) => {
                log::error!(target: LOG_TARGET, "{e}");
                return EventOutcome::Skipped(SkipReason::InvalidReturnPathFormat);
            }
        };

        let campaign = match self.campaigns.find_campaign_by_uid(&campaign_uid).await {
            Ok(Some(campaign)) => campaign,
            Ok(None) => {
                log::warn!(target: LOG_TARGET, "campaign not found: {campaign_uid}");
                return EventOutcome::Skipped(SkipReason::CampaignNotFound);
            }
            Err(e) => return self.store_failure(e),
        };

        let subscriber = match self
            .subscribers
            .find_confirmed_subscriber(campaign.list_id, &subscriber_uid)
            .await
        {
            Ok(Some(subscriber)) => subscriber,
            Ok(None) => {
                log::warn!(
                    target: LOG_TARGET,
                    "subscriber not found: {subscriber_uid} for campaign: {campaign_uid}"
                );
                return EventOutcome::Skipped(SkipReason::SubscriberNotFound);
            }
            Err(e) => return self.store_failure(e),
        };

        // Dedup is keyed purely on the pair. A later event of a different
        // bounce type for the same pair is suppressed as well.
        match self
            .bounces
            .has_bounce(campaign.campaign_id, subscriber.subscriber_id)
            .await
        {
            Ok(true) => {
                log::info!(
                    target: LOG_TARGET,
                    "duplicate event ignored for campaign: {campaign_uid}, subscriber: {subscriber_uid}"
                );
                return EventOutcome::Skipped(SkipReason::Duplicate);
            }
            Ok(false) => {}
            Err(e) => return self.store_failure(e),
        }

        let message = classify::extract_message(&event.event_type, &event.data);

        // Complaints are checked first and never create a bounce record.
        if classify::is_complaint(&event.event_type) {
            if let Err(e) = self.feedback.take_action(&subscriber, &campaign).await {
                return self.store_failure(e);
            }
            if let Err(e) = self
                .subscribers
                .blacklist_subscriber(&subscriber, &message)
                .await
            {
                return self.store_failure(e);
            }
            return EventOutcome::Complaint;
        }

        let bounce_type = match classify::bounce_type(&event.event_type) {
            Some(bounce_type) => bounce_type,
            None => {
                log::debug!(target: LOG_TARGET, "ignoring event type: {}", event.event_type);
                return EventOutcome::Skipped(SkipReason::Unclassified);
            }
        };

        let record = BounceRecord {
            campaign_id: campaign.campaign_id,
            subscriber_id: subscriber.subscriber_id,
            message: message.clone(),
            bounce_type,
        };

        match self.bounces.record_bounce(record).await {
            Ok(BounceInsert::Created) => {}
            Ok(BounceInsert::AlreadyRecorded) => {
                // Lost a race against a concurrent delivery of this event.
                log::info!(
                    target: LOG_TARGET,
                    "duplicate event ignored for campaign: {campaign_uid}, subscriber: {subscriber_uid}"
                );
                return EventOutcome::Skipped(SkipReason::Duplicate);
            }
            Err(e) => return self.store_failure(e),
        }

        // Only hard bounces warrant blacklisting.
        if bounce_type == BounceType::Hard {
            if let Err(e) = self
                .subscribers
                .blacklist_subscriber(&subscriber, &message)
                .await
            {
                return self.store_failure(e);
            }
        }

        EventOutcome::BounceRecorded(bounce_type)
    }

    fn store_failure(&self, e: StoreError) -> EventOutcome {
        log::error!(target: LOG_TARGET, "store error while processing event: {e}");
        EventOutcome::Skipped(SkipReason::StoreFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Campaign, MemoryStore, Subscriber, SubscriberStatus};
    use serde_json::json;
    use std::sync::Mutex;

    const CAMPAIGN_UID: &str = "gy2424gmq0f14";
    const SUBSCRIBER_UID: &str = "xw93k2pzd8e45";

    fn seeded_store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.add_campaign(Campaign {
            campaign_id: 10,
            campaign_uid: CAMPAIGN_UID.to_string(),
            list_id: 7,
        });
        store.add_subscriber(Subscriber {
            subscriber_id: 20,
            subscriber_uid: SUBSCRIBER_UID.to_string(),
            list_id: 7,
            email: "jane@example.com".to_string(),
            status: SubscriberStatus::Confirmed,
        });
        Arc::new(store)
    }

    fn pipeline(store: &Arc<MemoryStore>) -> EventPipeline {
        EventPipeline::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
        )
    }

    fn from_address() -> String {
        format!("bounce+{CAMPAIGN_UID}+{SUBSCRIBER_UID}@mail.example.com")
    }

    fn single_event(event_type: &str, data: Value) -> Vec<u8> {
        json!({"id": "evt-1", "type": event_type, "data": data})
            .to_string()
            .into_bytes()
    }

    #[tokio::test]
    async fn test_hard_bounce_records_and_blacklists() {
        let store = seeded_store();
        let body = single_event(
            "delivery.dsn-perm-fail",
            json!({"from": from_address(), "details": "550 5.1.1 user unknown"}),
        );

        let outcomes = pipeline(&store).process_request(&body).await.unwrap();
        assert_eq!(outcomes, vec![EventOutcome::BounceRecorded(BounceType::Hard)]);

        let bounces = store.bounces();
        assert_eq!(bounces.len(), 1);
        assert_eq!(bounces[0].campaign_id, 10);
        assert_eq!(bounces[0].subscriber_id, 20);
        assert_eq!(bounces[0].message, "550 5.1.1 user unknown");
        assert_eq!(bounces[0].bounce_type, BounceType::Hard);

        let blacklist = store.blacklist();
        assert_eq!(blacklist.len(), 1);
        assert_eq!(blacklist[0].reason, "550 5.1.1 user unknown");
    }

    #[tokio::test]
    async fn test_soft_bounce_never_blacklists() {
        let store = seeded_store();
        let body = single_event(
            "delivery.dsn-temp-fail",
            json!({"from": from_address(), "details": ["451 greylisted", "try again later"]}),
        );

        let outcomes = pipeline(&store).process_request(&body).await.unwrap();
        assert_eq!(outcomes, vec![EventOutcome::BounceRecorded(BounceType::Soft)]);

        let bounces = store.bounces();
        assert_eq!(bounces.len(), 1);
        assert_eq!(bounces[0].message, "451 greylisted; try again later");
        assert!(store.blacklist().is_empty());
    }

    #[tokio::test]
    async fn test_internal_bounce_uses_reason_verbatim() {
        let store = seeded_store();
        let body = single_event(
            "delivery.failed",
            json!({"from": from_address(), "reason": "mailbox full", "details": "ignored"}),
        );

        let outcomes = pipeline(&store).process_request(&body).await.unwrap();
        assert_eq!(
            outcomes,
            vec![EventOutcome::BounceRecorded(BounceType::Internal)]
        );

        let bounces = store.bounces();
        assert_eq!(bounces[0].message, "mailbox full");
        assert!(store.blacklist().is_empty());
    }

    #[tokio::test]
    async fn test_complaint_blacklists_without_bounce_record() {
        let store = seeded_store();
        let body = single_event(
            "incoming-report.abuse-report",
            json!({"from": from_address(), "hostname": "mx.reporter.net"}),
        );

        let outcomes = pipeline(&store).process_request(&body).await.unwrap();
        assert_eq!(outcomes, vec![EventOutcome::Complaint]);

        assert!(store.bounces().is_empty());
        let blacklist = store.blacklist();
        assert_eq!(blacklist.len(), 1);
        assert_eq!(blacklist[0].reason, "Reporter: mx.reporter.net");
        assert_eq!(store.feedback_actions(), vec![(20, 10)]);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_a_noop() {
        let store = seeded_store();
        let pipeline = pipeline(&store);
        let body = single_event(
            "delivery.dsn-perm-fail",
            json!({"from": from_address(), "details": "550 user unknown"}),
        );

        let first = pipeline.process_request(&body).await.unwrap();
        assert_eq!(first, vec![EventOutcome::BounceRecorded(BounceType::Hard)]);

        let second = pipeline.process_request(&body).await.unwrap();
        assert_eq!(second, vec![EventOutcome::Skipped(SkipReason::Duplicate)]);

        assert_eq!(store.bounces().len(), 1);
        // The hard bounce already blacklisted once; the replay adds nothing.
        assert_eq!(store.blacklist().len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_ignores_bounce_type() {
        let store = seeded_store();
        let pipeline = pipeline(&store);

        let soft = single_event(
            "delivery.dsn-temp-fail",
            json!({"from": from_address(), "details": "451 greylisted"}),
        );
        pipeline.process_request(&soft).await.unwrap();

        // A later hard bounce for the same pair is suppressed.
        let hard = single_event(
            "delivery.dsn-perm-fail",
            json!({"from": from_address(), "details": "550 user unknown"}),
        );
        let outcomes = pipeline.process_request(&hard).await.unwrap();
        assert_eq!(outcomes, vec![EventOutcome::Skipped(SkipReason::Duplicate)]);

        let bounces = store.bounces();
        assert_eq!(bounces.len(), 1);
        assert_eq!(bounces[0].bounce_type, BounceType::Soft);
        assert!(store.blacklist().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_dropped() {
        let store = seeded_store();
        let body = single_event("message.delivered", json!({"from": from_address()}));

        let outcomes = pipeline(&store).process_request(&body).await.unwrap();
        assert_eq!(outcomes, vec![EventOutcome::Skipped(SkipReason::Unclassified)]);
        assert!(store.bounces().is_empty());
        assert!(store.blacklist().is_empty());
    }

    #[tokio::test]
    async fn test_missing_from_field_is_skipped() {
        let store = seeded_store();
        let body = single_event("delivery.dsn-perm-fail", json!({"details": "550"}));

        let outcomes = pipeline(&store).process_request(&body).await.unwrap();
        assert_eq!(
            outcomes,
            vec![EventOutcome::Skipped(SkipReason::MissingReturnPath)]
        );
        assert!(store.bounces().is_empty());
    }

    #[tokio::test]
    async fn test_transactional_return_path_is_skipped() {
        let store = seeded_store();
        let body = single_event(
            "delivery.dsn-perm-fail",
            json!({"from": "bounce@mail.example.com", "details": "550"}),
        );

        let outcomes = pipeline(&store).process_request(&body).await.unwrap();
        assert_eq!(outcomes, vec![EventOutcome::Skipped(SkipReason::Transactional)]);
        assert!(store.bounces().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_campaign_is_skipped() {
        let store = seeded_store();
        let body = single_event(
            "delivery.dsn-perm-fail",
            json!({"from": "bounce+nope+xw93k2pzd8e45@x.com", "details": "550"}),
        );

        let outcomes = pipeline(&store).process_request(&body).await.unwrap();
        assert_eq!(
            outcomes,
            vec![EventOutcome::Skipped(SkipReason::CampaignNotFound)]
        );
        assert!(store.bounces().is_empty());
    }

    #[tokio::test]
    async fn test_unconfirmed_subscriber_is_skipped() {
        let store = seeded_store();
        store.add_subscriber(Subscriber {
            subscriber_id: 21,
            subscriber_uid: "qh51m8rtk3c72".to_string(),
            list_id: 7,
            email: "joe@example.com".to_string(),
            status: SubscriberStatus::Unconfirmed,
        });
        let body = single_event(
            "delivery.dsn-perm-fail",
            json!({"from": format!("bounce+{CAMPAIGN_UID}+qh51m8rtk3c72@x.com"), "details": "550"}),
        );

        let outcomes = pipeline(&store).process_request(&body).await.unwrap();
        assert_eq!(
            outcomes,
            vec![EventOutcome::Skipped(SkipReason::SubscriberNotFound)]
        );
        assert!(store.bounces().is_empty());
    }

    #[tokio::test]
    async fn test_bad_event_does_not_abort_siblings() {
        let store = seeded_store();
        let body = json!({
            "events": [
                {"type": "delivery.dsn-perm-fail"},
                {"type": "delivery.dsn-perm-fail", "data": {"from": "not-an-address", "details": "550"}},
                {"type": "delivery.dsn-perm-fail", "data": {"from": from_address(), "details": "550 user unknown"}},
            ]
        })
        .to_string()
        .into_bytes();

        let outcomes = pipeline(&store).process_request(&body).await.unwrap();
        assert_eq!(
            outcomes,
            vec![
                EventOutcome::Skipped(SkipReason::MissingTypeOrData),
                EventOutcome::Skipped(SkipReason::InvalidReturnPathFormat),
                EventOutcome::BounceRecorded(BounceType::Hard),
            ]
        );
        assert_eq!(store.bounces().len(), 1);
    }

    #[tokio::test]
    async fn test_request_level_rejection() {
        let store = seeded_store();
        let pipeline = pipeline(&store);

        assert!(matches!(
            pipeline.process_request(b"").await,
            Err(PayloadError::EmptyPayload)
        ));
        assert!(matches!(
            pipeline.process_request(b"{oops").await,
            Err(PayloadError::MalformedPayload(_))
        ));
        assert!(matches!(
            pipeline
                .process_request(br#"{"id": "evt-1", "kind": "x"}"#)
                .await,
            Err(PayloadError::UnrecognizedShape)
        ));
        assert!(store.bounces().is_empty());
    }

    struct FailingBounceStore;

    #[async_trait::async_trait]
    impl BounceStore for FailingBounceStore {
        async fn has_bounce(&self, _: i64, _: i64) -> Result<bool, StoreError> {
            Err(StoreError::Backend("bounce log unavailable".to_string()))
        }

        async fn record_bounce(&self, _: BounceRecord) -> Result<BounceInsert, StoreError> {
            Err(StoreError::Backend("bounce log unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_skips_only_that_event() {
        let store = seeded_store();
        let pipeline = EventPipeline::new(
            store.clone(),
            store.clone(),
            Arc::new(FailingBounceStore),
            store.clone(),
        );

        // Every event hits the dedup lookup, so both die there; neither
        // failure escapes to the request level.
        let body = json!({
            "events": [
                {"type": "delivery.dsn-perm-fail", "data": {"from": from_address(), "details": "550"}},
                {"type": "incoming-report.abuse-report", "data": {"from": from_address()}},
            ]
        })
        .to_string()
        .into_bytes();

        let outcomes = pipeline.process_request(&body).await.unwrap();
        assert_eq!(outcomes[0], EventOutcome::Skipped(SkipReason::StoreFailure));
        assert_eq!(outcomes[1], EventOutcome::Skipped(SkipReason::StoreFailure));
        assert!(store.blacklist().is_empty());
    }

    struct RecordingHook {
        label: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl EventHook for RecordingHook {
        fn before_event(&self, _event: &Value) {
            self.calls.lock().unwrap().push(format!("{}:before", self.label));
        }

        fn after_event(&self, _event: &Value, outcome: &EventOutcome) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:after:{:?}", self.label, outcome));
        }
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let store = seeded_store();
        let mut pipeline = pipeline(&store);
        let calls = Arc::new(Mutex::new(Vec::new()));

        pipeline.register_hook(Arc::new(RecordingHook {
            label: "first",
            calls: calls.clone(),
        }));
        pipeline.register_hook(Arc::new(RecordingHook {
            label: "second",
            calls: calls.clone(),
        }));

        let body = single_event(
            "delivery.dsn-temp-fail",
            json!({"from": from_address(), "details": "451"}),
        );
        pipeline.process_request(&body).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "first:before".to_string(),
                "second:before".to_string(),
                "first:after:BounceRecorded(Soft)".to_string(),
                "second:after:BounceRecorded(Soft)".to_string(),
            ]
        );
    }
}
