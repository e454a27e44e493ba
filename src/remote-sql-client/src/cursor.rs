// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Decoding of cursor responses.
//!
//! The body of a cursor response is newline-delimited JSON. The first
//! non-empty line is a [`CursorResponse`]; every following non-empty line is
//! a [`CursorEntry`]. The body arrives in chunks whose boundaries have nothing
//! to do with line boundaries, and may even split a multi-byte UTF-8
//! character, so bytes are buffered until a whole line is available and only
//! then decoded.
//!
//! A [`CursorStream`] owns the response body. The body is released as soon as
//! the stream ends, fails, or reports a stream-wide error, and in any case when
//! the [`CursorStream`] is dropped.

use std::io;
use std::pin::Pin;
use std::str;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{FusedStream, Stream, StreamExt, TryStreamExt};
use mz_remote_sql_proto::{CursorEntry, CursorResponse};
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::{debug, trace};

use crate::error::Error;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

type Frames = FramedRead<StreamReader<ByteStream, Bytes>, LineCodec>;

/// Splits a byte stream into trimmed, non-empty lines.
#[derive(Debug)]
pub struct LineCodec {
    max_length: usize,
    /// The number of bytes at the front of the buffer already known not to
    /// contain a newline.
    next_index: usize,
}

impl LineCodec {
    pub fn new(max_length: usize) -> LineCodec {
        LineCodec {
            max_length,
            next_index: 0,
        }
    }

    fn finish_line(&self, line: &[u8]) -> Result<Option<String>, Error> {
        if line.len() > self.max_length {
            return Err(self.too_long());
        }
        let line = str::from_utf8(line)
            .map_err(|e| Error::protocol(format!("cursor line is not valid UTF-8: {e}")))?
            .trim();
        if line.is_empty() {
            Ok(None)
        } else {
            Ok(Some(line.to_owned()))
        }
    }

    fn too_long(&self) -> Error {
        Error::protocol(format!(
            "cursor line exceeds maximum length of {} bytes",
            self.max_length
        ))
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Error> {
        loop {
            match src[self.next_index..].iter().position(|b| *b == b'\n') {
                Some(offset) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = src.split_to(end + 1);
                    if let Some(line) = self.finish_line(&line[..end])? {
                        return Ok(Some(line));
                    }
                }
                None => {
                    if src.len() > self.max_length {
                        return Err(self.too_long());
                    }
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        // The final line need not be terminated by a newline.
        self.next_index = 0;
        let rest = src.split();
        self.finish_line(&rest)
    }
}

fn parse_line<T: DeserializeOwned>(line: &str, what: &str) -> Result<T, Error> {
    serde_json::from_str(line).map_err(|e| Error::protocol(format!("malformed {what}: {e}")))
}

/// The entries of a cursor response.
///
/// Entries are decoded lazily, as the consumer polls for them. The stream
/// ends when the server closes the response body, after the first error, or
/// after a [`CursorEntry::Error`].
pub struct CursorStream {
    /// `None` once the stream has ended and the body has been released.
    frames: Option<Frames>,
    entries: usize,
}

impl std::fmt::Debug for CursorStream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CursorStream")
            .field("open", &self.frames.is_some())
            .field("entries", &self.entries)
            .finish()
    }
}

impl CursorStream {
    /// Reads the [`CursorResponse`] from the front of `body` and returns it
    /// along with a stream of the entries that follow.
    ///
    /// Only as much of `body` is read as is needed to find the first line.
    pub async fn open<S>(
        body: S,
        max_line_length: usize,
    ) -> Result<(CursorResponse, CursorStream), Error>
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        let body: ByteStream = Box::pin(body);
        let mut frames = FramedRead::new(StreamReader::new(body), LineCodec::new(max_line_length));
        let line = match frames.try_next().await? {
            Some(line) => line,
            None => return Err(Error::protocol("no cursor response received")),
        };
        let response: CursorResponse = parse_line(&line, "cursor response")?;
        trace!(
            baton = response.baton.is_some(),
            base_url = response.base_url.as_deref(),
            "received cursor response"
        );
        let stream = CursorStream {
            frames: Some(frames),
            entries: 0,
        };
        Ok((response, stream))
    }

    /// Reports whether the stream has ended.
    pub fn is_closed(&self) -> bool {
        self.frames.is_none()
    }

    fn close(&mut self) {
        if self.frames.take().is_some() {
            debug!(entries = self.entries, "cursor stream closed");
        }
    }
}

impl Stream for CursorStream {
    type Item = Result<CursorEntry, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(frames) = self.frames.as_mut() else {
            return Poll::Ready(None);
        };
        let item = match ready!(frames.poll_next_unpin(cx)) {
            Some(Ok(line)) => Some(parse_line::<CursorEntry>(&line, "cursor entry")),
            Some(Err(e)) => Some(Err(e)),
            None => None,
        };
        match &item {
            Some(Ok(entry)) => {
                self.entries += 1;
                if let CursorEntry::Error { error } = entry {
                    debug!(%error, "cursor reported an error");
                    self.close();
                }
            }
            Some(Err(_)) | None => self.close(),
        }
        Poll::Ready(item)
    }
}

impl FusedStream for CursorStream {
    fn is_terminated(&self) -> bool {
        self.is_closed()
    }
}

impl Drop for CursorStream {
    fn drop(&mut self) {
        if self.frames.is_some() {
            debug!(
                entries = self.entries,
                "cursor stream dropped before it was exhausted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::stream;
    use mz_remote_sql_proto::{Col, ResponseError, Value};

    use super::*;

    const BODY: &str = concat!(
        r#"{"baton":"b1","base_url":null}"#,
        "\n",
        r#"{"type":"step_begin","step":0,"cols":[{"name":"s","decltype":"TEXT"}]}"#,
        "\n",
        r#"{"type":"row","row":[{"type":"text","value":"héllo ✓ 𝄞"}]}"#,
        "\n",
        r#"{"type":"step_end","affected_row_count":0,"last_insert_rowid":null}"#,
        "\n",
    );

    /// A byte stream that counts how many times it has been dropped.
    struct Tracked<S> {
        inner: S,
        drops: Arc<AtomicUsize>,
    }

    impl<S: Stream + Unpin> Stream for Tracked<S> {
        type Item = S::Item;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
            self.inner.poll_next_unpin(cx)
        }
    }

    impl<S> Drop for Tracked<S> {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn chunks(
        data: &[u8],
        size: usize,
    ) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + Unpin + 'static {
        let chunks: Vec<_> = data
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(chunks)
    }

    fn tracked(
        data: &[u8],
    ) -> (
        Tracked<impl Stream<Item = Result<Bytes, io::Error>> + Send + Unpin + 'static>,
        Arc<AtomicUsize>,
    ) {
        let drops = Arc::new(AtomicUsize::new(0));
        let body = Tracked {
            inner: chunks(data, 7),
            drops: Arc::clone(&drops),
        };
        (body, drops)
    }

    async fn read_all<S>(body: S) -> Result<(CursorResponse, Vec<CursorEntry>), Error>
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        let (response, entries) = CursorStream::open(body, 1024).await?;
        let entries: Vec<CursorEntry> = entries.try_collect().await?;
        Ok((response, entries))
    }

    #[tokio::test]
    async fn test_single_chunk() {
        let (response, entries) = read_all(chunks(BODY.as_bytes(), BODY.len()))
            .await
            .unwrap();
        assert_eq!(
            response,
            CursorResponse {
                baton: Some("b1".into()),
                base_url: None,
            }
        );
        assert_eq!(
            entries,
            vec![
                CursorEntry::StepBegin {
                    step: 0,
                    cols: vec![Col {
                        name: Some("s".into()),
                        decltype: Some("TEXT".into()),
                    }],
                },
                CursorEntry::Row {
                    row: vec![Value::Text("héllo ✓ 𝄞".into())],
                },
                CursorEntry::StepEnd {
                    affected_row_count: 0,
                    last_insert_rowid: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_arbitrary_chunk_boundaries() {
        let expected = read_all(chunks(BODY.as_bytes(), BODY.len()))
            .await
            .unwrap();

        // Every chunk size, including ones that split multi-byte characters.
        for size in 1..BODY.len() {
            let actual = read_all(chunks(BODY.as_bytes(), size)).await.unwrap();
            assert_eq!(actual, expected, "chunk size {}", size);
        }

        // Every two-chunk split point.
        for split in 1..BODY.len() {
            let (a, b) = BODY.as_bytes().split_at(split);
            let body = stream::iter(vec![
                Ok(Bytes::copy_from_slice(a)),
                Ok(Bytes::copy_from_slice(b)),
            ]);
            let actual = read_all(body).await.unwrap();
            assert_eq!(actual, expected, "split at {}", split);
        }
    }

    #[tokio::test]
    async fn test_entries_are_lazy() {
        // The body never ends, but complete lines must still be yielded.
        let body = chunks(BODY.as_bytes(), 5).chain(stream::pending());
        let (_response, mut entries) = CursorStream::open(body, 1024).await.unwrap();
        for _ in 0..3 {
            entries.try_next().await.unwrap().unwrap();
        }
        assert!(!entries.is_closed());
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let body = format!(
            "{}{}",
            BODY, r#"{"type":"step_error","step":1,"error":{"message":"boom","code":"E"}}"#
        );
        let (_response, entries) = read_all(chunks(body.as_bytes(), 3)).await.unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(
            entries[3],
            CursorEntry::StepError {
                step: 1,
                error: ResponseError {
                    message: "boom".into(),
                    code: Some("E".into()),
                },
            }
        );
    }

    #[tokio::test]
    async fn test_blank_lines_and_whitespace() {
        let body = "\n  \r\n{\"baton\":null,\"base_url\":null}\r\n\n\t{\"type\":\"row\",\"row\":[]}  \r\n   ";
        let (response, entries) = read_all(chunks(body.as_bytes(), 4)).await.unwrap();
        assert_eq!(response.baton, None);
        assert_eq!(entries, vec![CursorEntry::Row { row: vec![] }]);
    }

    #[tokio::test]
    async fn test_missing_response() {
        for body in ["", "\n\n   \n"] {
            match read_all(chunks(body.as_bytes(), 1)).await {
                Err(Error::ProtocolViolation(msg)) => {
                    assert_eq!(msg, "no cursor response received")
                }
                res => panic!("expected ProtocolViolation, got {:?}", res),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let (body, drops) = tracked(b"not json\n{\"type\":\"row\",\"row\":[]}\n");
        match CursorStream::open(body, 1024).await {
            Err(Error::ProtocolViolation(msg)) => {
                assert!(msg.starts_with("malformed cursor response"), "{}", msg)
            }
            res => panic!("expected ProtocolViolation, got {:?}", res),
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_entry_poisons_stream() {
        let body = format!("{}{{\"type\":\"row\",\n{}", BODY, r#"{"type":"row","row":[]}"#);
        let (body, drops) = tracked(body.as_bytes());
        let (_response, mut entries) = CursorStream::open(body, 1024).await.unwrap();
        for _ in 0..3 {
            entries.try_next().await.unwrap().unwrap();
        }
        match entries.next().await {
            Some(Err(Error::ProtocolViolation(msg))) => {
                assert!(msg.starts_with("malformed cursor entry"), "{}", msg)
            }
            res => panic!("expected ProtocolViolation, got {:?}", res),
        }
        assert!(entries.is_terminated());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(entries.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_entry_type() {
        let body = format!(
            "{}{}\n{}\n",
            BODY,
            r#"{"type":"replication_index","index":"5"}"#,
            r#"{"type":"row","row":[]}"#
        );
        let (_response, entries) = read_all(chunks(body.as_bytes(), 9)).await.unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[3], CursorEntry::Unknown);
        assert_eq!(entries[4], CursorEntry::Row { row: vec![] });
    }

    #[tokio::test]
    async fn test_error_entry_ends_stream() {
        let body = concat!(
            r#"{"baton":null,"base_url":null}"#,
            "\n",
            r#"{"type":"error","error":{"message":"stream expired","code":"STREAM_EXPIRED"}}"#,
            "\n",
            r#"{"type":"row","row":[]}"#,
            "\n",
        );
        let (body, drops) = tracked(body.as_bytes());
        let (_response, mut entries) = CursorStream::open(body, 1024).await.unwrap();
        match entries.try_next().await.unwrap() {
            Some(CursorEntry::Error { error }) => assert_eq!(error.message, "stream expired"),
            res => panic!("expected error entry, got {:?}", res),
        }
        assert!(entries.try_next().await.unwrap().is_none());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_on_early_drop() {
        let (body, drops) = tracked(BODY.as_bytes());
        let (_response, mut entries) = CursorStream::open(body, 1024).await.unwrap();
        entries.try_next().await.unwrap().unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(entries);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_on_exhaustion() {
        let (body, drops) = tracked(BODY.as_bytes());
        let (_response, mut entries) = CursorStream::open(body, 1024).await.unwrap();
        while entries.try_next().await.unwrap().is_some() {}
        // Released as soon as the end is observed, not when the stream is
        // dropped.
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        drop(entries);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let row = format!(
            "{{\"type\":\"row\",\"row\":[{{\"type\":\"text\",\"value\":\"{}\"}}]}}\n",
            "x".repeat(100)
        );
        let body = format!("{{\"baton\":null,\"base_url\":null}}\n{}", row);

        let (_response, mut entries) = CursorStream::open(chunks(body.as_bytes(), 8), 64)
            .await
            .unwrap();
        match entries.next().await {
            Some(Err(Error::ProtocolViolation(msg))) => {
                assert_eq!(msg, "cursor line exceeds maximum length of 64 bytes")
            }
            res => panic!("expected ProtocolViolation, got {:?}", res),
        }

        let (_response, entries) = CursorStream::open(chunks(body.as_bytes(), 8), 1024)
            .await
            .unwrap();
        assert_eq!(entries.count().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8() {
        let mut body = b"{\"baton\":null,\"base_url\":null}\n{\"type\":\"row\",\"row\":[{\"type\":\"text\",\"value\":\"".to_vec();
        body.extend_from_slice(&[0xff, 0xfe]);
        body.extend_from_slice(b"\"}]}\n");
        let (_response, mut entries) = CursorStream::open(chunks(&body, 16), 1024).await.unwrap();
        match entries.next().await {
            Some(Err(Error::ProtocolViolation(msg))) => {
                assert!(msg.starts_with("cursor line is not valid UTF-8"), "{}", msg)
            }
            res => panic!("expected ProtocolViolation, got {:?}", res),
        }
    }

    #[tokio::test]
    async fn test_read_error() {
        let body = stream::iter(vec![
            Ok(Bytes::from(BODY)),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let (_response, mut entries) = CursorStream::open(body, 1024).await.unwrap();
        for _ in 0..3 {
            entries.try_next().await.unwrap().unwrap();
        }
        match entries.next().await {
            Some(Err(Error::Io(e))) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            res => panic!("expected Io error, got {:?}", res),
        }
        assert!(entries.next().await.is_none());
    }
}
