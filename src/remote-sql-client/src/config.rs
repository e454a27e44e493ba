// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::client::Client;
use crate::error::Error;

/// The default limit on the length of a single line in a cursor response.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 << 20;

/// Configuration for a [`Client`].
#[derive(Clone)]
pub struct ClientConfig {
    url: Url,
    auth_token: Option<String>,
    connect_timeout: Option<Duration>,
    max_line_length: usize,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url.as_str())
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("max_line_length", &self.max_line_length)
            .finish()
    }
}

impl ClientConfig {
    /// Constructs a new `ClientConfig` that will target the server at the
    /// specified URL.
    pub fn new(url: Url) -> ClientConfig {
        ClientConfig {
            url,
            auth_token: None,
            connect_timeout: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Sends the specified token as a bearer token with every request.
    pub fn auth_token(mut self, token: impl Into<String>) -> ClientConfig {
        self.auth_token = Some(token.into());
        self
    }

    /// Limits how long establishing a connection may take.
    ///
    /// No other timeouts are applied. In particular, a cursor may stay open
    /// for as long as the server keeps sending entries.
    pub fn connect_timeout(mut self, timeout: Duration) -> ClientConfig {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the maximum length, in bytes, of a line in a cursor response.
    pub fn max_line_length(mut self, max_line_length: usize) -> ClientConfig {
        self.max_line_length = max_line_length;
        self
    }

    /// Builds the [`Client`].
    pub fn build(self) -> Result<Client, Error> {
        if self.url.cannot_be_a_base() {
            return Err(Error::UrlBase);
        }

        let mut builder = reqwest::ClientBuilder::new().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let inner = builder.build()?;

        Ok(Client::new(
            inner,
            self.url,
            self.auth_token,
            self.max_line_length,
        ))
    }
}
