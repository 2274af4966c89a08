//! Engine-agnostic view of a provisioned test datastore.

use async_trait::async_trait;

use crate::error::Result;

/// A disposable datastore a test can connect to.
///
/// Suites written against this trait do not care which engine backs them.
#[async_trait]
pub trait DatastoreTestContainer: Send + Sync {
    /// Connection string including credentials
    fn connection_uri(&self) -> String;

    /// Connection string with credentials stripped, for logs and assertions
    fn redacted_connection_uri(&self) -> String;

    /// Login name
    fn username(&self) -> &str;

    /// Login password
    fn password(&self) -> &str;

    /// Highest schema migration version applied to the datastore
    async fn database_schema_version(&self) -> Result<i64>;
}
