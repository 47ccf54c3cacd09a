use crate::provider::WEB_API_PROVIDER;
use crate::store::{Campaign, DeliveryServer, Subscriber, SubscriberStatus};
use serde::{Deserialize, Serialize};

/// Seed data for the store collaborators: the delivery servers the webhook
/// endpoint accepts requests for, and the campaigns and subscribers events
/// can be correlated against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub servers: Vec<DeliveryServer>,
    pub campaigns: Vec<Campaign>,
    pub subscribers: Vec<Subscriber>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            servers: vec![DeliveryServer {
                server_id: 1,
                server_type: WEB_API_PROVIDER.to_string(),
            }],
            campaigns: vec![Campaign {
                campaign_id: 1,
                campaign_uid: "gy2424gmq0f14".to_string(),
                list_id: 1,
            }],
            subscribers: vec![
                Subscriber {
                    subscriber_id: 1,
                    subscriber_uid: "xw93k2pzd8e45".to_string(),
                    list_id: 1,
                    email: "jane@example.com".to_string(),
                    status: SubscriberStatus::Confirmed,
                },
                Subscriber {
                    subscriber_id: 2,
                    subscriber_uid: "qh51m8rtk3c72".to_string(),
                    list_id: 1,
                    email: "joe@example.com".to_string(),
                    status: SubscriberStatus::Unconfirmed,
                },
            ],
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
