//! # sdb testkit
//!
//! Shared test support for the sdb crates:
//!
//! - [`fixtures`]: temporary databases and sample documents
//! - [`generators`]: `proptest` strategies for keys and documents
//! - [`init_test_logging`]: a `tracing` subscriber for test output
//!
//! ```rust,ignore
//! use sdb_testkit::prelude::*;
//!
//! #[test]
//! fn finds_people() {
//!     init_test_logging();
//!     let db = TestDatabase::file();
//!     seed_people(&db, &sample_people());
//!     let tx = db.new_tx(false).unwrap();
//!     assert_eq!(tx.find("ada", &[]).unwrap().len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

use tracing_subscriber::EnvFilter;

/// Everything a test usually needs.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_test_logging;
}

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Later calls do
/// nothing.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
