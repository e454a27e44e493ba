// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Responses returned by the server.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::{DecodeError, Datum, IntegerMode, Value};

/// An error reported by the server, either for the whole request or for a
/// single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    /// A human-readable description of the error.
    pub message: String,
    /// A machine-readable error code, when the server provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ResponseError {}

/// A result set column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Col {
    pub name: Option<String>,
    /// The declared type of the column, absent for expressions.
    pub decltype: Option<String>,
}

/// The result of executing a single statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub cols: Vec<Col>,
    pub rows: Vec<Vec<Value>>,
    pub affected_row_count: u64,
    #[serde(default, with = "rowid")]
    pub last_insert_rowid: Option<i64>,
}

impl ExecuteResult {
    /// Decodes every row of this result.
    pub fn decode_rows(&self, mode: IntegerMode) -> Result<Vec<Vec<Datum>>, DecodeError> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| v.clone().decode(mode))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect()
    }
}

/// The result of executing a [`Batch`](crate::request::Batch).
///
/// Both vectors have one entry per step. A step that was skipped because its
/// condition did not hold has `None` in both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub step_results: Vec<Option<ExecuteResult>>,
    pub step_errors: Vec<Option<ResponseError>>,
}

/// A parameter of a described statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeParam {
    pub name: Option<String>,
}

/// The result of describing a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeResult {
    pub params: Vec<DescribeParam>,
    pub cols: Vec<Col>,
    pub is_explain: bool,
    pub is_readonly: bool,
}

/// The successful response to one [`StreamRequest`](crate::request::StreamRequest).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResponse {
    Execute { result: ExecuteResult },
    Batch { result: BatchResult },
    Sequence,
    Describe { result: DescribeResult },
    Close,
}

/// The outcome of one request in a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: ResponseError },
}

/// The response from the pipeline endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    /// The baton to send with the next request on this stream, or `None` if
    /// the stream was closed.
    pub baton: Option<String>,
    /// If set, the next request on this stream must be sent to this URL.
    pub base_url: Option<String>,
    /// One result per request, in request order.
    pub results: Vec<StreamResult>,
}

/// The first line of a response from the cursor endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorResponse {
    /// See [`PipelineResponse::baton`].
    pub baton: Option<String>,
    /// See [`PipelineResponse::base_url`].
    pub base_url: Option<String>,
}

/// One event in the body of a cursor response.
///
/// The entries for a step arrive as `StepBegin`, any number of `Row`s, then
/// either `StepEnd` or `StepError`. Steps are never interleaved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorEntry {
    StepBegin {
        step: usize,
        cols: Vec<Col>,
    },
    StepEnd {
        affected_row_count: u64,
        #[serde(default, with = "rowid")]
        last_insert_rowid: Option<i64>,
    },
    StepError {
        step: usize,
        error: ResponseError,
    },
    /// A row of the step most recently begun, in column order.
    Row {
        row: Vec<Value>,
    },
    /// A failure that ends the cursor.
    Error {
        error: ResponseError,
    },
    /// An entry of a type this client does not know about. Newer servers may
    /// send entries that older clients can safely ignore.
    #[serde(other)]
    Unknown,
}

/// Row IDs are 64-bit integers sent as decimal strings.
mod rowid {
    use super::*;

    pub fn serialize<S>(rowid: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        rowid.map(|id| id.to_string()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}
