//! Extension descriptions from the PBX configuration database.

use extension_state::{BoxError, DescriptionSource};
use sqlx::Row;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::collections::HashMap;
use tracing::debug;

/// Where descriptions come from: a MySQL `devices` table, or nowhere.
pub enum Descriptions {
    None,
    Sql(MySqlPool),
}

impl Descriptions {
    /// Lazily connecting pool for `url`; nothing is dialled until the first
    /// query.
    pub fn from_url(url: Option<&str>) -> Result<Self, sqlx::Error> {
        match url {
            None => Ok(Self::None),
            Some(url) => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(2)
                    .connect_lazy(url)?;
                Ok(Self::Sql(pool))
            }
        }
    }
}

impl DescriptionSource for Descriptions {
    async fn descriptions(&self) -> Result<HashMap<String, String>, BoxError> {
        let pool = match self {
            Descriptions::None => return Ok(HashMap::new()),
            Descriptions::Sql(pool) => pool,
        };

        let rows = sqlx::query("SELECT id, description FROM devices")
            .fetch_all(pool)
            .await?;

        let mut descriptions = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let description: Option<String> = row.try_get("description")?;
            descriptions.insert(id, description.unwrap_or_default());
        }
        debug!(count = descriptions.len(), "Fetched device descriptions");
        Ok(descriptions)
    }
}
