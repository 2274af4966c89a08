//! Disposable database fixtures for integration tests.
//!
//! This crate starts a real MySQL server in a container for the duration of a
//! test, so storage code runs against the engine it ships with instead of a
//! mock:
//! - Container lifecycle through a pluggable runtime (Docker via testcontainers)
//! - Connection polling with exponential backoff
//! - Embedded forward-only schema migrations
//! - Teardown on drop plus an expiry watchdog
//!
//! # Examples
//!
//! ```no_run
//! use storage_fixture_testing::run_mysql_test_container;
//!
//! # async fn example() {
//!     let datastore = run_mysql_test_container().await;
//!
//!     // root:secret@tcp(localhost:3306)/defaultdb?parseTime=true
//!     println!("{}", datastore.connection_uri());
//!
//!     datastore.teardown().await.unwrap();
//! # }
//! ```

pub mod connection;
pub mod datastore;
pub mod docker;
pub mod error;
pub mod migrations;
pub mod mocks;
pub mod mysql;
pub mod runtime;
pub mod watchdog;

// Re-export commonly used types
pub use connection::{ConnectionInfo, Credentials};
pub use datastore::DatastoreTestContainer;
pub use docker::DockerRuntime;
pub use error::{FixtureError, Result};
pub use migrations::{apply_migrations, database_schema_version};
pub use mocks::{MockContainerRuntime, PortMapping, RuntimeCall};
pub use mysql::{
    run_mysql_test_container, run_mysql_test_container_with, MySqlTestContainer, ReadyDatastore,
};
pub use runtime::{ContainerId, ContainerRuntime, ContainerSpec, Endpoint, StopOutcome};
pub use watchdog::Watchdog;

// Re-export testing dependencies for convenience
pub use storage_fixture_common::ContainerConfig;
pub use testcontainers;
