//! Sqlscope-Common: Shared types used across the sqlscope crates.
//!
//! - **Typed IDs**: UUID wrappers identifying engines and sessions
//! - **Error Handling**: The common error type and result alias
//!
//! # Examples
//!
//! ```
//! use sqlscope_common::{Error, Result, SessionId};
//!
//! let id = SessionId::new();
//! assert_ne!(id, SessionId::new());
//!
//! fn lookup() -> Result<()> {
//!     Err(Error::unknown_bind(Some("reports")))
//! }
//! assert!(lookup().is_err());
//! ```

pub mod error;
pub mod ids;

pub use error::{Error, Result};
pub use ids::*;
