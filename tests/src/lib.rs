//! # Hub Runtime Test Suite
//!
//! End-to-end scenarios against a real hub bound to `127.0.0.1:0`.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs        # Server start-up, REST/SSE/WS clients
//! └── scenarios/
//!     ├── sessions.rs    # login, refresh, logout, shutdown
//!     ├── publishing.rs  # agent events and properties reaching subscribers
//!     ├── actions.rs     # RPC-style invoke, timeout and late delivery
//!     └── twins.rs       # latest-value ordering, ownership
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p hub-tests
//! cargo test -p hub-tests scenarios::actions::
//! ```

#![allow(dead_code)]

pub mod harness;
pub mod scenarios;
