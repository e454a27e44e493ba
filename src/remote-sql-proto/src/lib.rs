// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Wire types for executing SQL against a remote server over HTTP.
//!
//! The protocol has two endpoints. The pipeline endpoint accepts a
//! [`PipelineRequest`] and returns a single [`PipelineResponse`]. The cursor
//! endpoint accepts a [`CursorRequest`] and streams back newline-delimited
//! JSON: a [`CursorResponse`] followed by any number of [`CursorEntry`]s.
//!
//! Requests that belong to the same logical connection are tied together by
//! a *baton*, an opaque token returned by the server in every response. The
//! caller is responsible for sending it with the next request, and for
//! sending that request to the returned `base_url` when one is present.
//!
//! This crate has no network dependencies; see `mz-remote-sql-client` for the
//! transport.

pub mod request;
pub mod response;
pub mod value;

pub use request::{
    Batch, BatchCond, BatchStep, CursorRequest, NamedArg, PipelineRequest, Stmt, StreamRequest,
};
pub use response::{
    BatchResult, Col, CursorEntry, CursorResponse, DescribeParam, DescribeResult, ExecuteResult,
    PipelineResponse, ResponseError, StreamResponse, StreamResult,
};
pub use value::{encode, Datum, DecodeError, EncodeError, IntegerMode, Param, Value};
