//! Test support: a scripted session backend and environment-driven logging.

#[cfg(feature = "test-utils")]
pub mod logging;
pub mod scripted;

#[cfg(feature = "test-utils")]
pub use logging::{TeeWriter, TestLogConfig, init_test_logging};
pub use scripted::{ScriptStep, ScriptedCall, ScriptedConnector, ScriptedSession, per_statement};
