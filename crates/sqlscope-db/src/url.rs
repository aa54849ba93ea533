//! Connection URL parsing.
//!
//! Only SQLite URLs are understood, in their usual shapes:
//!
//! | URL                          | Target                          |
//! |------------------------------|---------------------------------|
//! | `sqlite://`                  | private scratch database        |
//! | `sqlite:///:memory:`         | private scratch database        |
//! | `sqlite:///data/app.db`      | `data/app.db` (relative)        |
//! | `sqlite:////var/lib/app.db`  | `/var/lib/app.db` (absolute)    |

use std::fmt;
use std::path::PathBuf;

use sqlscope_common::{Error, Result};

const SCHEME: &str = "sqlite://";

/// Where a parsed URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A throwaway database private to one engine.
    Memory,
    /// A database file on disk.
    File(PathBuf),
}

/// A parsed database URL. Keeps the original string for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUrl {
    raw: String,
    target: Target,
}

impl DatabaseUrl {
    /// Parse a `sqlite://` URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let rest = raw.strip_prefix(SCHEME).ok_or_else(|| {
            Error::invalid_url(format!("'{raw}' (only sqlite:// URLs are supported)"))
        })?;

        // Drop the host separator: `sqlite:///x` leaves `x`, `sqlite:////x` leaves `/x`.
        let path = rest.strip_prefix('/').unwrap_or(rest);

        let target = match path {
            "" | ":memory:" => Target::Memory,
            p if p.contains('?') => {
                return Err(Error::invalid_url(format!(
                    "'{raw}' (query parameters are not supported)"
                )))
            }
            p => Target::File(PathBuf::from(p)),
        };

        Ok(Self {
            raw: raw.to_string(),
            target,
        })
    }

    /// The URL as it was configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_memory(&self) -> bool {
        self.target == Target::Memory
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for DatabaseUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
