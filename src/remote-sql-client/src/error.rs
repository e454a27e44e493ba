// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Errors returned by the client.
//!
//! Failures of individual statements are not errors: they are reported as
//! data, in [`StreamResult::Error`](mz_remote_sql_proto::StreamResult::Error)
//! or [`CursorEntry::StepError`](mz_remote_sql_proto::CursorEntry::StepError).

use std::io;

use mz_remote_sql_proto::{EncodeError, ResponseError};
use reqwest::StatusCode;
use thiserror::Error;

/// An error returned by a [`Client`](crate::Client) operation.
#[derive(Error, Debug)]
pub enum Error {
    /// A parameter could not be encoded.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] EncodeError),
    /// The server responded with a non-success HTTP status.
    #[error("server responded with status {status}: {message}")]
    Transport {
        status: StatusCode,
        message: String,
        code: Option<String>,
    },
    /// The server's response did not follow the protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// A cursor reported an error that ended the stream.
    #[error("server error: {0}")]
    Server(ResponseError),
    /// The request could not be sent or the response could not be received.
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    /// Reading the body of a cursor response failed.
    #[error("error reading cursor stream: {0}")]
    Io(#[from] io::Error),
    /// The configured URL cannot be used as a base URL.
    #[error("cannot construct a client with a cannot-be-a-base URL")]
    UrlBase,
    /// A `base_url` returned by the server could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Error {
        Error::ProtocolViolation(message.into())
    }

    /// Returns the HTTP status code, if the server responded with one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Transport { status, .. } => Some(*status),
            Error::Http(e) => e.status(),
            _ => None,
        }
    }
}
