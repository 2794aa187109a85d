//! Client SDK for pg-need-to-know's PostgREST HTTP interface.
//!
//! pg-need-to-know is a row-level-security access-control layer: data
//! owners register and post rows, data users are granted read access to
//! owners' rows through named groups, and an admin wires up tables,
//! groups, and grants. This crate shapes those operations into
//! authenticated HTTP calls and returns the raw responses; all
//! authorization decisions stay server-side.
//!
//! ```no_run
//! use need_to_know_sdk::{NeedToKnowClient, TokenType};
//! use serde_json::json;
//!
//! # fn main() -> need_to_know_sdk::Result<()> {
//! let client = NeedToKnowClient::new("http://localhost:3000");
//! let admin = client.token(None, TokenType::Admin)?;
//! client.table_create(
//!     &json!({
//!         "type": "mac",
//!         "definition": {
//!             "table_name": "t1",
//!             "columns": [{"name": "c1", "type": "text", "description": "a column"}],
//!         },
//!     }),
//!     &admin,
//!     None,
//! )?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod client;
pub mod endpoints;
pub mod error;
pub mod types;

pub use client::NeedToKnowClient;
pub use error::{NtkError, Result};
pub use types::{Identity, MemberSelector, TokenType, UserType};
