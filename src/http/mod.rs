//! HTTP transport abstraction.
//!
//! [`Transport`] is the seam between the synchronization services and the network: production
//! code uses [`HttpTransport`] (backed by `reqwest`), tests substitute a scripted fake.
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use url::Url;

use crate::{Error, Result};

mod requester;

pub(crate) use requester::{fetch_features, stream_request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A single outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Lines of a streaming response body, already split on `\n` with `\r` stripped.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a request and buffer the full response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Open a long-lived streaming request and expose its body line by line.
    ///
    /// The timeout of `request` only covers connection establishment and response headers; the
    /// body is expected to stay open indefinitely and liveness is the caller's concern.
    async fn open_stream(&self, request: HttpRequest) -> Result<LineStream>;
}

/// [`Transport`] implementation over a shared `reqwest` client.
#[derive(Debug, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> HttpTransport {
        HttpTransport::default()
    }

    fn build(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            Method::Get => self.client.get(request.url.clone()),
            Method::Post => self.client.post(request.url.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body.clone());
        }
        builder
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let timeout = request.timeout;
        let response = self
            .build(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    Error::Timeout(timeout)
                } else {
                    Error::from(err)
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(Error::from)?;
        Ok(HttpResponse { status, body })
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<LineStream> {
        let timeout = request.timeout;
        // The timeout only guards until response headers arrive. Applying reqwest's own request
        // timeout here would kill the stream mid-flight after `timeout` elapsed.
        let response = tokio::time::timeout(timeout, self.build(&request).send())
            .await
            .map_err(|_| Error::Timeout(timeout))?
            .map_err(Error::from)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(Error::Status(status));
        }

        Ok(lines(response.bytes_stream().map(|chunk| chunk.map_err(Error::from)).boxed()))
    }
}

/// Split a byte stream into lines. Handles chunk boundaries falling inside a line and both
/// `\n` and `\r\n` terminators; a trailing unterminated line is flushed at end of stream.
pub fn lines(
    bytes: Pin<Box<dyn Stream<Item = Result<bytes::Bytes>> + Send>>,
) -> LineStream {
    struct State {
        bytes: Pin<Box<dyn Stream<Item = Result<bytes::Bytes>> + Send>>,
        buffer: String,
        pending: std::collections::VecDeque<Result<String>>,
        done: bool,
    }

    let state = State {
        bytes,
        buffer: String::new(),
        pending: std::collections::VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    while let Some(at) = state.buffer.find('\n') {
                        let mut line: String = state.buffer.drain(..=at).collect();
                        line.pop();
                        if line.ends_with('\r') {
                            line.pop();
                        }
                        state.pending.push_back(Ok(line));
                    }
                }
                Some(Err(err)) => {
                    state.done = true;
                    state.pending.push_back(Err(err));
                }
                None => {
                    state.done = true;
                    if !state.buffer.is_empty() {
                        let line = std::mem::take(&mut state.buffer);
                        state.pending.push_back(Ok(line));
                    }
                }
            }
        }
    }))
}
