// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Requests sent by the client.
//!
//! Parameters are encoded when they are bound. Values pushed onto a
//! statement's arguments directly are checked again when the request is
//! serialized.

use serde::{Deserialize, Serialize};

use crate::value::{EncodeError, Param, Value};

/// A single SQL statement and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    /// The SQL text. Must contain exactly one statement.
    pub sql: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Named arguments.
    #[serde(default)]
    pub named_args: Vec<NamedArg>,
    /// Whether the server should return rows. When `false` the server may
    /// omit them.
    pub want_rows: bool,
}

impl Stmt {
    /// Constructs a statement with no arguments that wants rows.
    pub fn new(sql: impl Into<String>) -> Stmt {
        Stmt {
            sql: sql.into(),
            args: Vec::new(),
            named_args: Vec::new(),
            want_rows: true,
        }
    }

    /// Appends a positional argument.
    pub fn bind<P: Into<Param>>(mut self, param: P) -> Result<Stmt, EncodeError> {
        self.args.push(param.into().encode()?);
        Ok(self)
    }

    /// Appends a named argument. The name includes its prefix, e.g. `:id`.
    pub fn bind_named<P: Into<Param>>(
        mut self,
        name: impl Into<String>,
        param: P,
    ) -> Result<Stmt, EncodeError> {
        self.named_args.push(NamedArg {
            name: name.into(),
            value: param.into().encode()?,
        });
        Ok(self)
    }

    /// Sets whether the server should return rows.
    pub fn want_rows(mut self, want_rows: bool) -> Stmt {
        self.want_rows = want_rows;
        self
    }
}

/// A named statement argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedArg {
    pub name: String,
    pub value: Value,
}

/// A condition that gates a [`BatchStep`].
///
/// Steps are referenced by their index within the batch, and should only
/// reference earlier steps. The client does not check this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchCond {
    /// The referenced step executed and succeeded.
    Ok { step: usize },
    /// The referenced step executed and failed.
    Error { step: usize },
    /// The inner condition is false.
    Not { cond: Box<BatchCond> },
    /// All of the inner conditions are true.
    And { conds: Vec<BatchCond> },
    /// Any of the inner conditions is true.
    Or { conds: Vec<BatchCond> },
}

impl BatchCond {
    pub fn ok(step: usize) -> BatchCond {
        BatchCond::Ok { step }
    }

    pub fn error(step: usize) -> BatchCond {
        BatchCond::Error { step }
    }

    pub fn not(cond: BatchCond) -> BatchCond {
        BatchCond::Not {
            cond: Box::new(cond),
        }
    }

    pub fn and(conds: impl IntoIterator<Item = BatchCond>) -> BatchCond {
        BatchCond::And {
            conds: conds.into_iter().collect(),
        }
    }

    pub fn or(conds: impl IntoIterator<Item = BatchCond>) -> BatchCond {
        BatchCond::Or {
            conds: conds.into_iter().collect(),
        }
    }
}

/// A statement within a [`Batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStep {
    pub stmt: Stmt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<BatchCond>,
}

/// An ordered list of statements executed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub steps: Vec<BatchStep>,
}

impl Batch {
    pub fn new() -> Batch {
        Batch::default()
    }

    /// Appends an unconditional step and returns its index.
    pub fn step(&mut self, stmt: Stmt) -> usize {
        self.push(stmt, None)
    }

    /// Appends a step that only executes when `cond` holds and returns its
    /// index.
    pub fn step_if(&mut self, stmt: Stmt, cond: BatchCond) -> usize {
        self.push(stmt, Some(cond))
    }

    fn push(&mut self, stmt: Stmt, condition: Option<BatchCond>) -> usize {
        self.steps.push(BatchStep { stmt, condition });
        self.steps.len() - 1
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One request within a [`PipelineRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRequest {
    /// Executes a single statement.
    Execute { stmt: Stmt },
    /// Executes a batch of statements.
    Batch { batch: Batch },
    /// Executes a sequence of semicolon-separated statements, without
    /// arguments, discarding their results.
    Sequence { sql: String },
    /// Describes a statement without executing it.
    Describe { sql: String },
    /// Closes the stream identified by the baton.
    Close,
}

/// A request to the pipeline endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// The baton returned by the previous request on this stream, or `None`
    /// to open a new stream.
    pub baton: Option<String>,
    pub requests: Vec<StreamRequest>,
}

impl PipelineRequest {
    pub fn new(baton: Option<String>) -> PipelineRequest {
        PipelineRequest {
            baton,
            requests: Vec::new(),
        }
    }

    pub fn execute(mut self, stmt: Stmt) -> PipelineRequest {
        self.requests.push(StreamRequest::Execute { stmt });
        self
    }

    pub fn batch(mut self, batch: Batch) -> PipelineRequest {
        self.requests.push(StreamRequest::Batch { batch });
        self
    }

    pub fn sequence(mut self, sql: impl Into<String>) -> PipelineRequest {
        self.requests
            .push(StreamRequest::Sequence { sql: sql.into() });
        self
    }

    pub fn describe(mut self, sql: impl Into<String>) -> PipelineRequest {
        self.requests
            .push(StreamRequest::Describe { sql: sql.into() });
        self
    }

    pub fn close(mut self) -> PipelineRequest {
        self.requests.push(StreamRequest::Close);
        self
    }
}

/// A request to the cursor endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CursorRequest {
    /// See [`PipelineRequest::baton`].
    pub baton: Option<String>,
    pub batch: Batch,
}
