// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::error::{NodeError, NodeResult};

/// Install the global subscriber. The filter comes from `RUST_LOG` and
/// defaults to `info`. Fails if a subscriber is already installed.
pub fn init_logging(format: LogFormat) -> NodeResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| NodeError::Logging(e.to_string()))
}
