// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::io;

use futures::TryStreamExt;
use mz_remote_sql_proto::{
    Batch, BatchResult, CursorRequest, CursorResponse, EncodeError, PipelineRequest,
    PipelineResponse, ResponseError,
};
use reqwest::{header, Response, Url};
use serde::Serialize;
use tracing::{debug, warn};

use crate::collect::BatchCollector;
use crate::cursor::CursorStream;
use crate::error::Error;

const PIPELINE_PATH: &[&str] = &["v3", "pipeline"];
const CURSOR_PATH: &[&str] = &["v3", "cursor"];

/// An API client for a remote SQL server.
///
/// The client holds no per-stream state. Callers thread the baton from each
/// response into the next request, and switch to the returned `base_url`
/// with [`Client::follow`].
#[derive(Clone)]
pub struct Client {
    inner: reqwest::Client,
    url: Url,
    auth_token: Option<String>,
    max_line_length: usize,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) fn new(
        inner: reqwest::Client,
        url: Url,
        auth_token: Option<String>,
        max_line_length: usize,
    ) -> Self {
        Client {
            inner,
            url,
            auth_token,
            max_line_length,
        }
    }

    /// Returns the base URL requests are sent to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns a client for the next request on a stream, given the
    /// `base_url` from the previous response.
    ///
    /// When `base_url` is `None` the returned client targets the same URL as
    /// this one. The connection pool and credentials are shared.
    pub fn follow(&self, base_url: Option<&str>) -> Result<Client, Error> {
        let Some(base_url) = base_url else {
            return Ok(self.clone());
        };
        let url: Url = base_url.parse()?;
        if url.cannot_be_a_base() {
            return Err(Error::UrlBase);
        }
        if url != self.url {
            debug!(from = %self.url, to = %url, "following server base URL");
        }
        Ok(Client {
            url,
            ..self.clone()
        })
    }

    /// Executes a pipeline of requests and returns all of their results.
    ///
    /// A failed request within the pipeline does not fail the call; its
    /// error is returned in the corresponding
    /// [`StreamResult`](mz_remote_sql_proto::StreamResult).
    pub async fn pipeline(&self, request: &PipelineRequest) -> Result<PipelineResponse, Error> {
        debug!(
            requests = request.requests.len(),
            baton = request.baton.is_some(),
            "sending pipeline request"
        );
        let res = self.send(PIPELINE_PATH, request).await?;
        let body = res.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::protocol(format!("malformed pipeline response: {e}")))
    }

    /// Opens a cursor over a batch.
    ///
    /// Returns as soon as the [`CursorResponse`] has been received. The
    /// batch's entries are read from the network as the returned
    /// [`CursorStream`] is polled.
    pub async fn cursor(
        &self,
        request: &CursorRequest,
    ) -> Result<(CursorResponse, CursorStream), Error> {
        debug!(
            steps = request.batch.len(),
            baton = request.baton.is_some(),
            "opening cursor"
        );
        let res = self.send(CURSOR_PATH, request).await?;
        let body = res
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        CursorStream::open(body, self.max_line_length).await
    }

    /// Executes a batch through a cursor and collects every step's result.
    pub async fn execute_batch(
        &self,
        baton: Option<String>,
        batch: Batch,
    ) -> Result<(CursorResponse, BatchResult), Error> {
        let mut collector = BatchCollector::new(batch.len());
        let (response, mut entries) = self.cursor(&CursorRequest { baton, batch }).await?;
        while let Some(entry) = entries.try_next().await? {
            collector.push(entry)?;
        }
        Ok((response, collector.finish()?))
    }

    fn endpoint(&self, path: &[&str]) -> Url {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .expect("constructor validated URL can be a base")
            .pop_if_empty()
            .extend(path);
        url
    }

    async fn send<T: Serialize>(&self, path: &[&str], body: &T) -> Result<Response, Error> {
        // Serialize up front so that a request carrying an unencodable value
        // fails before anything is sent.
        let body = serde_json::to_vec(body)
            .map_err(|e| Error::InvalidArgument(EncodeError::Request(e.to_string())))?;
        let mut req = self
            .inner
            .post(self.endpoint(path))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;
        check_status(res).await
    }
}

/// Converts a non-success response into an [`Error::Transport`], using the
/// error details in the body when the server provided them.
async fn check_status(res: Response) -> Result<Response, Error> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let (message, code) = match res.json::<ResponseError>().await {
        Ok(ResponseError { message, code }) => (message, code),
        Err(e) => {
            warn!(%status, "unable to decode error details: {e}");
            ("no error details in response body".to_string(), None)
        }
    };
    Err(Error::Transport {
        status,
        message,
        code,
    })
}

#[cfg(test)]
mod tests {
    use crate::ClientConfig;

    use super::*;

    fn client(url: &str) -> Client {
        ClientConfig::new(url.parse().unwrap()).build().unwrap()
    }

    #[test]
    fn test_endpoint() {
        let cases = [
            ("http://localhost:8080", "http://localhost:8080/v3/pipeline"),
            ("http://localhost:8080/", "http://localhost:8080/v3/pipeline"),
            ("https://db.example.com/a/b", "https://db.example.com/a/b/v3/pipeline"),
            ("https://db.example.com/a/b/", "https://db.example.com/a/b/v3/pipeline"),
        ];
        for (base, expected) in cases {
            assert_eq!(client(base).endpoint(PIPELINE_PATH).as_str(), expected);
        }
        assert_eq!(
            client("http://localhost").endpoint(CURSOR_PATH).as_str(),
            "http://localhost/v3/cursor"
        );
    }

    #[test]
    fn test_follow() {
        let client = client("http://primary.example.com");
        assert_eq!(client.follow(None).unwrap().url(), client.url());
        assert_eq!(
            client
                .follow(Some("http://replica.example.com/db"))
                .unwrap()
                .endpoint(CURSOR_PATH)
                .as_str(),
            "http://replica.example.com/db/v3/cursor"
        );
        assert!(matches!(
            client.follow(Some("not a url")),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            client.follow(Some("data:text/plain,hello")),
            Err(Error::UrlBase)
        ));
    }

    #[test]
    fn test_build_rejects_cannot_be_a_base() {
        let config = ClientConfig::new("mailto:db@example.com".parse().unwrap());
        assert!(matches!(config.build(), Err(Error::UrlBase)));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ClientConfig::new("http://localhost".parse().unwrap()).auth_token("s3cret");
        assert!(!format!("{:?}", config).contains("s3cret"));
        assert!(!format!("{:?}", config.build().unwrap()).contains("s3cret"));
    }
}
