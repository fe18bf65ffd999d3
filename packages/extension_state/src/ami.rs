//! Glue for the manager-interface client.

use ami_client::{Action, AmiClient, AmiMessage};

use crate::error::BoxError;
use crate::normalizer::EventRecord;
use crate::sync::DeviceStateLister;

/// ActionID tagging the startup listing
pub const LIST_ACTION_ID: &str = "init";

impl EventRecord for AmiMessage {
    fn field(&self, key: &str) -> Option<&str> {
        self.get(key)
    }
}

impl DeviceStateLister for AmiClient {
    async fn list_device_states(&self) -> Result<(), BoxError> {
        let action = Action::new("DeviceStateList").header("ActionID", LIST_ACTION_ID);
        self.action(action).await?;
        Ok(())
    }
}
