use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::{campaign::Campaign, error::Result, store::MongoStore};

/// File the configuration is read from, relative to the working directory.
pub const CONFIG_FILE: &str = "CleanCity.toml";

/// Prefix of environment variables overriding the configuration file.
pub const ENV_PREFIX: &str = "CLEANCITY_";

/// The layered configuration sources: `CleanCity.toml`, then `CLEANCITY_*`
/// environment variables.
pub fn figment() -> Figment {
    Figment::new()
        .merge(Toml::file(CONFIG_FILE))
        .merge(Env::prefixed(ENV_PREFIX))
}

/// Application configuration.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default = "default_op_timeout")]
    op_timeout: u32,
    // secrets
    voter_secret: String,
}

fn default_op_timeout() -> u32 {
    5
}

impl Config {
    /// Load from the given sources.
    pub fn load(figment: &Figment) -> std::result::Result<Self, figment::Error> {
        figment.extract()
    }

    /// How long a single register or campaign operation may take, in seconds.
    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout.into())
    }

    /// Secret key used to derive stored voter keys.
    pub fn voter_secret(&self) -> &[u8] {
        self.voter_secret.as_bytes()
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
pub struct DbConfig {
    // non-secrets
    #[serde(default = "default_db_name")]
    db_name: String,
    // secrets
    db_uri: String,
}

fn default_db_name() -> String {
    "cleancity".to_string()
}

impl DbConfig {
    /// Load from the given sources.
    pub fn load(figment: &Figment) -> std::result::Result<Self, figment::Error> {
        figment.extract()
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Connect to the database, perform any setup necessary, and return the store.
    ///
    /// Setup ensures the indexes exist and seeds the default cities into an
    /// empty campaign.
    pub async fn connect(&self, config: &Config) -> Result<MongoStore> {
        info!("Loaded database config, connecting...");
        let store = MongoStore::connect(&self.db_uri, &self.db_name)
            .await
            .map_err(|e| {
                error!("Failed to connect to database: {e}");
                e
            })?;

        let campaign = Campaign::new(store.clone(), config);
        if campaign.seed_defaults().await? {
            info!("Seeded default cities");
        }
        info!("...database connection online!");
        Ok(store)
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Config {
        pub fn example() -> Self {
            Self {
                op_timeout: 5,
                voter_secret: "correct horse battery staple".to_string(),
            }
        }
    }
}
