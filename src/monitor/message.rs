use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Channel every worker listens on for control messages.
pub const NOTIFICATION_CHANNEL: &str = "sidekiq:cancel:notifications";

pub const CANCEL_ACTION: &str = "cancel";

/// Key of the expiring "job is cancelled" flag.
pub fn cancel_job_key(job_id: &str) -> String {
    format!("sidekiq:cancel:{}", job_id)
}

/// Wire format: `{"action":"cancel","jid":"<id>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub action: String,
    #[serde(default)]
    pub jid: Option<String>,
}

impl ControlMessage {
    pub fn cancel(job_id: &str) -> Self {
        Self {
            action: CANCEL_ACTION.to_string(),
            jid: Some(job_id.to_string()),
        }
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
