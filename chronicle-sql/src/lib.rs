//! An `sqlx`-backed `chronicle::EventLog`, running against Postgres and
//! SQLite through the portable `sqlx::Any` driver.
//!
//! ```no_run
//! # async fn run(encoder: impl chronicle::Encoder + Clone + 'static) -> Result<(), Box<dyn std::error::Error>> {
//! use chronicle_sql::{Config, SqlEventLog};
//!
//! let log = SqlEventLog::connect(Config::sqlite(":memory:"), encoder).await?;
//! # let _ = log;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod event_log;
mod migrator;

pub use crate::config::Config;
pub use crate::error::Error;
pub use crate::event_log::SqlEventLog;
