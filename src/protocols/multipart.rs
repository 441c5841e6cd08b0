//! The patch encoder: `multipart/mixed` framing for a response stream.
//!
//! Chunks are emitted strictly in the order the scheduler produced them.
//! The chunk whose response does not announce a follow-up closes the
//! multipart body with the final boundary.

use std::pin::Pin;
use std::task::Poll;

use bytes::Bytes;
use futures::stream::StreamExt;
use futures::Stream;

use crate::graphql;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("serialization error")]
    SerdeError(#[from] serde_json::Error),
}

pub struct Multipart {
    stream: Pin<Box<dyn Stream<Item = graphql::Response> + Send>>,
    is_first_chunk: bool,
    is_terminated: bool,
}

impl Multipart {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = graphql::Response> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            is_first_chunk: true,
            is_terminated: false,
        }
    }
}

impl Stream for Multipart {
    type Item = Result<Bytes, Error>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        if self.is_terminated {
            return Poll::Ready(None);
        }
        match self.stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(response)) => {
                let is_still_open = response.has_next.unwrap_or(false);
                let mut buf = if self.is_first_chunk {
                    self.is_first_chunk = false;
                    Vec::from(&b"\r\n--graphql\r\ncontent-type: application/json\r\n\r\n"[..])
                } else {
                    Vec::from(&b"\r\ncontent-type: application/json\r\n\r\n"[..])
                };

                serde_json::to_writer(&mut buf, &response)?;

                if is_still_open {
                    buf.extend_from_slice(b"\r\n--graphql");
                } else {
                    self.is_terminated = true;
                    buf.extend_from_slice(b"\r\n--graphql--\r\n");
                }

                Poll::Ready(Some(Ok(buf.into())))
            }
            Poll::Ready(None) => {
                // The response stream ended without a terminal chunk; close
                // the multipart body so the consumer is not left hanging.
                let buf = if self.is_first_chunk {
                    Bytes::from_static(
                        &b"\r\n--graphql\r\ncontent-type: application/json\r\n\r\n{}\r\n--graphql--\r\n"[..],
                    )
                } else {
                    Bytes::from_static(&b"--\r\n"[..])
                };
                self.is_first_chunk = false;
                self.is_terminated = true;

                Poll::Ready(Some(Ok(buf)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
