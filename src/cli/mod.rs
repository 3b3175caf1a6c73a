//! # CLI Module
//!
//! Command-line entry points of the `view-dispatch` binary.
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Serve the demo application:
//!
//! ```bash
//! view-dispatch serve --config view.toml --addr 127.0.0.1:8080
//! ```
//!
//! Options:
//! - `--config <FILE>` - Configuration file (TOML, JSON or YAML). Without it,
//!   `view.toml`, `view.json`, `view.yaml` and `view.yml` are looked up in
//!   the working directory.
//! - `--addr <HOST:PORT>` - Overrides `network.host` and `network.port`
//!
//! SIGINT and SIGTERM stop the server.
//!
//! ### `routes`
//!
//! Print the demo route table:
//!
//! ```bash
//! view-dispatch routes
//! ```

mod commands;
mod demo;


pub use commands::{run_cli, Cli, Commands};
pub use demo::demo_app;
