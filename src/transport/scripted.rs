//! In-memory transport replaying canned responses, for unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{HttpRequest, HttpResponse, ResponseBody, Transport, TransportError};

#[derive(Debug, Clone)]
pub(crate) enum Chunk {
    Data(Vec<u8>),
    Delay(Duration),
    Error(String),
    /// Never yields again.
    Hang,
}

impl Chunk {
    pub fn data(s: &str) -> Self {
        Chunk::Data(s.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Stream {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        chunks: Vec<Chunk>,
    },
    Buffered {
        status: u16,
        body: String,
    },
    /// Connection-level failure before any response.
    Fail(String),
}

impl Scripted {
    pub fn ok(chunks: Vec<Chunk>) -> Self {
        Scripted::Stream {
            status: 200,
            headers: Vec::new(),
            chunks,
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Scripted::Stream {
            status,
            headers: Vec::new(),
            chunks: vec![Chunk::data(body)],
        }
    }

    pub fn buffered(status: u16, body: &str) -> Self {
        Scripted::Buffered {
            status,
            body: body.to_string(),
        }
    }

    pub fn with_header(self, name: &'static str, value: &'static str) -> Self {
        match self {
            Scripted::Stream {
                status,
                mut headers,
                chunks,
            } => {
                headers.push((name, value));
                Scripted::Stream {
                    status,
                    headers,
                    chunks,
                }
            }
            other => other,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request);
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            None => Err(TransportError::Other("script exhausted".into())),
            Some(Scripted::Fail(msg)) => Err(TransportError::Connect(msg)),
            Some(Scripted::Buffered { status, body }) => Ok(HttpResponse {
                status,
                headers: HeaderMap::new(),
                body: ResponseBody::Buffered(Bytes::from(body)),
            }),
            Some(Scripted::Stream {
                status,
                headers,
                chunks,
            }) => {
                let mut map = HeaderMap::new();
                for (k, v) in headers {
                    map.insert(HeaderName::from_static(k), HeaderValue::from_static(v));
                }
                let body = async_stream::stream! {
                    for chunk in chunks {
                        match chunk {
                            Chunk::Data(d) => {
                                yield Ok(Bytes::from(d));
                            }
                            Chunk::Delay(d) => tokio::time::sleep(d).await,
                            Chunk::Error(msg) => {
                                yield Err(TransportError::Body(msg));
                            }
                            Chunk::Hang => std::future::pending::<()>().await,
                        }
                    }
                };
                Ok(HttpResponse {
                    status,
                    headers: map,
                    body: ResponseBody::Streaming(Box::pin(body)),
                })
            }
        }
    }
}
