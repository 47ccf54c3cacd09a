use crate::config::Config;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Campaign entity. The pipeline only needs its numeric id and list id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub campaign_id: i64,
    pub campaign_uid: String,
    pub list_id: i64,
}

/// List subscriber entity. Only confirmed subscribers are actionable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub subscriber_id: i64,
    pub subscriber_uid: String,
    pub list_id: i64,
    pub email: String,
    pub status: SubscriberStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriberStatus {
    Confirmed,
    Unconfirmed,
    Unsubscribed,
    Blacklisted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BounceType {
    Hard,
    Soft,
    Internal,
}

/// Bounce log row. At most one is ever created per
/// (campaign_id, subscriber_id) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BounceRecord {
    pub campaign_id: i64,
    pub subscriber_id: i64,
    pub message: String,
    pub bounce_type: BounceType,
}

/// Delivery server addressed by the webhook URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryServer {
    pub server_id: i64,
    pub server_type: String,
}

/// Blacklist entry created for a complaint or hard bounce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistEntry {
    pub subscriber_id: i64,
    pub email: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Outcome of the atomic bounce insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BounceInsert {
    Created,
    AlreadyRecorded,
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn find_campaign_by_uid(&self, uid: &str) -> Result<Option<Campaign>, StoreError>;
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Look up a subscriber by list and UID, constrained to confirmed status.
    async fn find_confirmed_subscriber(
        &self,
        list_id: i64,
        uid: &str,
    ) -> Result<Option<Subscriber>, StoreError>;

    /// Move the subscriber onto the global blacklist with the given reason.
    async fn blacklist_subscriber(
        &self,
        subscriber: &Subscriber,
        reason: &str,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BounceStore: Send + Sync {
    async fn has_bounce(&self, campaign_id: i64, subscriber_id: i64) -> Result<bool, StoreError>;

    /// Insert the record unless one already exists for its pair. The check
    /// and the insert must be atomic so that concurrent redelivery of the
    /// same event cannot create two records.
    async fn record_bounce(&self, record: BounceRecord) -> Result<BounceInsert, StoreError>;
}

#[async_trait]
pub trait FeedbackLoop: Send + Sync {
    /// Provider-specific complaint side effects against the subscriber.
    async fn take_action(
        &self,
        subscriber: &Subscriber,
        campaign: &Campaign,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ServerDirectory: Send + Sync {
    async fn find_server(&self, server_id: i64) -> Result<Option<DeliveryServer>, StoreError>;
}

/// In-process implementation of every collaborator capability, backing the
/// CLI and the test suite.
#[derive(Default)]
pub struct MemoryStore {
    servers: Mutex<HashMap<i64, DeliveryServer>>,
    campaigns: Mutex<HashMap<String, Campaign>>,
    subscribers: Mutex<Vec<Subscriber>>,
    bounces: Mutex<Vec<BounceRecord>>,
    blacklist: Mutex<Vec<BlacklistEntry>>,
    feedback_actions: Mutex<Vec<(i64, i64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with the servers, campaigns and subscribers from config.
    pub fn from_config(config: &Config) -> Self {
        let store = Self::new();
        for server in &config.servers {
            store.add_server(server.clone());
        }
        for campaign in &config.campaigns {
            store.add_campaign(campaign.clone());
        }
        for subscriber in &config.subscribers {
            store.add_subscriber(subscriber.clone());
        }
        store
    }

    pub fn add_server(&self, server: DeliveryServer) {
        self.servers.lock().unwrap().insert(server.server_id, server);
    }

    pub fn add_campaign(&self, campaign: Campaign) {
        self.campaigns
            .lock()
            .unwrap()
            .insert(campaign.campaign_uid.clone(), campaign);
    }

    pub fn add_subscriber(&self, subscriber: Subscriber) {
        self.subscribers.lock().unwrap().push(subscriber);
    }

    pub fn bounces(&self) -> Vec<BounceRecord> {
        self.bounces.lock().unwrap().clone()
    }

    pub fn blacklist(&self) -> Vec<BlacklistEntry> {
        self.blacklist.lock().unwrap().clone()
    }

    /// (subscriber_id, campaign_id) pairs the feedback loop acted on.
    pub fn feedback_actions(&self) -> Vec<(i64, i64)> {
        self.feedback_actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn find_campaign_by_uid(&self, uid: &str) -> Result<Option<Campaign>, StoreError> {
        Ok(self.campaigns.lock().unwrap().get(uid).cloned())
    }
}

#[async_trait]
impl SubscriberStore for MemoryStore {
    async fn find_confirmed_subscriber(
        &self,
        list_id: i64,
        uid: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        Ok(self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .find(|s| {
                s.list_id == list_id
                    && s.subscriber_uid == uid
                    && s.status == SubscriberStatus::Confirmed
            })
            .cloned())
    }

    async fn blacklist_subscriber(
        &self,
        subscriber: &Subscriber,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.blacklist.lock().unwrap().push(BlacklistEntry {
            subscriber_id: subscriber.subscriber_id,
            email: subscriber.email.clone(),
            reason: reason.to_string(),
        });
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(stored) = subscribers
            .iter_mut()
            .find(|s| s.subscriber_id == subscriber.subscriber_id)
        {
            stored.status = SubscriberStatus::Blacklisted;
        }
        Ok(())
    }
}

#[async_trait]
impl BounceStore for MemoryStore {
    async fn has_bounce(&self, campaign_id: i64, subscriber_id: i64) -> Result<bool, StoreError> {
        Ok(self
            .bounces
            .lock()
            .unwrap()
            .iter()
            .any(|b| b.campaign_id == campaign_id && b.subscriber_id == subscriber_id))
    }

    async fn record_bounce(&self, record: BounceRecord) -> Result<BounceInsert, StoreError> {
        // Check and insert under one lock hold.
        let mut bounces = self.bounces.lock().unwrap();
        if bounces
            .iter()
            .any(|b| b.campaign_id == record.campaign_id && b.subscriber_id == record.subscriber_id)
        {
            return Ok(BounceInsert::AlreadyRecorded);
        }
        bounces.push(record);
        Ok(BounceInsert::Created)
    }
}

#[async_trait]
impl FeedbackLoop for MemoryStore {
    async fn take_action(
        &self,
        subscriber: &Subscriber,
        campaign: &Campaign,
    ) -> Result<(), StoreError> {
        self.feedback_actions
            .lock()
            .unwrap()
            .push((subscriber.subscriber_id, campaign.campaign_id));
        Ok(())
    }
}

#[async_trait]
impl ServerDirectory for MemoryStore {
    async fn find_server(&self, server_id: i64) -> Result<Option<DeliveryServer>, StoreError> {
        Ok(self.servers.lock().unwrap().get(&server_id).cloned())
    }
}
