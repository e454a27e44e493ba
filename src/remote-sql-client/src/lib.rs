// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A client for executing SQL against a remote server over HTTP.
//!
//! Two calls are offered. [`Client::pipeline`] sends a
//! [`PipelineRequest`](mz_remote_sql_proto::PipelineRequest) and waits for
//! every result in one response body. [`Client::cursor`] sends a
//! [`CursorRequest`](mz_remote_sql_proto::CursorRequest) and returns a
//! [`CursorStream`] that decodes the batch's results as they arrive.
//!
//! ```no_run
//! # async fn example() -> Result<(), mz_remote_sql_client::Error> {
//! use mz_remote_sql_client::ClientConfig;
//! use mz_remote_sql_proto::{Batch, BatchCond, Stmt};
//!
//! let client = ClientConfig::new("https://db.example.com".parse().unwrap())
//!     .auth_token("token")
//!     .build()?;
//!
//! let mut batch = Batch::new();
//! let insert = batch.step(Stmt::new("INSERT INTO t VALUES (?)").bind(42)?);
//! batch.step_if(Stmt::new("SELECT count(*) FROM t"), BatchCond::ok(insert));
//! let (response, result) = client.execute_batch(None, batch).await?;
//!
//! // Later requests on the same stream continue from the returned baton.
//! let client = client.follow(response.base_url.as_deref())?;
//! # let _ = (client, result);
//! # Ok(())
//! # }
//! ```
//!
//! The client never retries and applies no timeouts other than an optional
//! connect timeout; both are left to the caller.

mod client;
mod collect;
mod config;
mod cursor;
mod error;

pub use crate::client::Client;
pub use crate::collect::BatchCollector;
pub use crate::config::{ClientConfig, DEFAULT_MAX_LINE_LENGTH};
pub use crate::cursor::{CursorStream, LineCodec};
pub use crate::error::Error;
