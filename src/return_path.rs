use thiserror::Error;

/// Marker segment that prefixes every return-path local part.
const BOUNCE_MARKER: &str = "bounce";

/// Campaign coordinates recovered from a return-path address.
///
/// Campaign mail is sent with `bounce+{campaignUid}+{subscriberUid}@domain`
/// as its envelope sender. Transactional mail uses a plain `bounce@domain`
/// address and carries no campaign context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnPath {
    Campaign {
        campaign_uid: String,
        subscriber_uid: String,
    },
    Transactional,
}

#[derive(Debug, Error)]
pub enum ReturnPathError {
    #[error("invalid return path format: {0}")]
    InvalidFormat(String),
}

impl ReturnPath {
    /// Parse a return-path address into its campaign coordinates.
    pub fn parse(address: &str) -> Result<Self, ReturnPathError> {
        let local_part = match address.find('@') {
            Some(at) => &address[..at],
            None => return Err(ReturnPathError::InvalidFormat(address.to_string())),
        };

        let parts: Vec<&str> = local_part.split('+').collect();
        if parts.len() < 3 || parts[0] != BOUNCE_MARKER {
            return Ok(ReturnPath::Transactional);
        }

        // Only the first three segments carry meaning.
        Ok(ReturnPath::Campaign {
            campaign_uid: parts[1].to_string(),
            subscriber_uid: parts[2].to_string(),
        })
    }

    /// Render the address the outbound path mints for this return path.
    pub fn format(&self, domain: &str) -> String {
        match self {
            ReturnPath::Campaign {
                campaign_uid,
                subscriber_uid,
            } => format!("{BOUNCE_MARKER}+{campaign_uid}+{subscriber_uid}@{domain}"),
            ReturnPath::Transactional => format!("{BOUNCE_MARKER}@{domain}"),
        }
    }
}
