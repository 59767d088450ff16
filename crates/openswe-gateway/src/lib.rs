//! # openswe-gateway
//!
//! HTTP gateway exposing OpenSWE sandboxes and dev-server previews.
//!
//! ## Quick Start
//!
//! Run the server with default configuration:
//!
//! ```bash
//! cargo run -p openswe-gateway
//! ```
//!
//! Configure via environment variables:
//!
//! ```bash
//! export OPENSWE_PROVIDER=local
//! export OPENSWE_WORKSPACE=/srv/openswe
//! export OPENSWE_HTTP_PORT=9000
//! cargo run -p openswe-gateway
//! ```
//!
//! ## Routes
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET /health` | Liveness |
//! | `POST /sandboxes` | Create a sandbox |
//! | `GET /sandboxes` | List sandboxes |
//! | `GET /sandboxes/:id` | Sandbox metadata |
//! | `POST /sandboxes/:id/exec` | Run a shell command or script |
//! | `POST /sandboxes/:id/stop` | Stop, committing pending work |
//! | `DELETE /sandboxes/:id` | Delete, committing pending work |
//! | `POST /dev-server/start` | Detect, launch and wait for a dev server |
//! | `POST /dev-server/stop` | Kill the recorded dev server |
//! | `GET /dev-server/status` | Process state and recent log |
//! | `ANY /dev-server/proxy/:port/*path` | Reverse proxy with URL rewriting |

mod config;
mod error;
pub mod http;
pub mod proxy;
pub mod rewrite;
mod state;
mod types;

pub use config::{GatewayConfig, ProviderKind, DEFAULT_MAX_BODY_BYTES};
pub use error::{GatewayError, Result};
pub use state::AppState;
pub use types::*;
