//! Connection helpers
//!
//! Building a client only parses options and sets up the pool; the server is
//! contacted lazily by the first operation.

use mongodb::options::ClientOptions;
use mongodb::Client;

use crate::core::config::MongoConfig;
use crate::storage::Storage;
use crate::types::Result;

/// Create a client for `uri`, reporting `app_name` to the server.
///
/// Failures are logged and returned to the caller.
pub async fn connect(uri: &str, app_name: &str) -> Result<Client> {
    let mut options = match ClientOptions::parse(uri).await {
        Ok(options) => options,
        Err(e) => {
            tracing::error!(error = %e, app_name, "failed to parse mongodb connection string");
            return Err(e.into());
        }
    };
    options.app_name = Some(app_name.to_string());

    match Client::with_options(options) {
        Ok(client) => {
            tracing::debug!(app_name, "mongodb client created");
            Ok(client)
        }
        Err(e) => {
            tracing::error!(error = %e, app_name, "failed to create mongodb client");
            Err(e.into())
        }
    }
}

/// Connect with configured settings and bind a [`Storage`] to the configured database
pub async fn connect_storage(config: &MongoConfig) -> Result<Storage> {
    let client = connect(&config.uri, &config.app_name).await?;
    Ok(Storage::from_config(&client, config))
}
