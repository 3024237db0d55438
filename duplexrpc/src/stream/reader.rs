use std::{
    io,
    pin::Pin,
    task::{Context as TaskContext, Poll},
};

use serde_json::Value;
use tokio::{
    io::{AsyncRead, ReadBuf},
    sync::oneshot,
};
use uuid::Uuid;

use crate::{Context, Error, ErrorKind, FromParam, Result};

/// A streamed reader parameter.
///
/// Declare it in a method's parameter tuple to receive a byte stream posted
/// out-of-band; the envelope only carries its identifier. The stream's
/// producer is released once the reader hits end-of-stream, fails, or is
/// dropped.
pub struct ReaderParam {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    done: Option<oneshot::Sender<()>>,
}

impl ReaderParam {
    /// Wraps `reader`; the receiver resolves once it is fully read or closed.
    pub fn new(reader: impl AsyncRead + Send + 'static) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                reader: Box::pin(reader),
                done: Some(tx),
            },
            rx,
        )
    }

    fn finish(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl AsyncRead for ReaderParam {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = this.reader.as_mut().poll_read(cx, buf);
        match &poll {
            Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => {
                this.finish();
            }
            Poll::Ready(Err(_)) => this.finish(),
            _ => {}
        }
        poll
    }
}

impl Drop for ReaderParam {
    fn drop(&mut self) {
        self.finish();
    }
}

impl FromParam for ReaderParam {
    fn from_param(ctx: &Context, value: Value) -> impl Future<Output = Result<Self>> + Send {
        async move {
            let id: Uuid = serde_json::from_value(value).map_err(|e| {
                Error::new(ErrorKind::InvalidParams, format!("parsing reader id: {e}"))
            })?;
            ctx.state.streams.take(id, &ctx.cancel).await
        }
    }
}

impl std::fmt::Debug for ReaderParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderParam")
            .field("done", &self.done.is_none())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_done_on_eof() {
        let (mut reader, mut done) = ReaderParam::new(&b"abc"[..]);
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await.unwrap();
        assert!(done.try_recv().is_err());

        let mut rest = vec![];
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"c");
        done.await.unwrap();
    }

    #[tokio::test]
    async fn test_done_on_drop() {
        let (reader, done) = ReaderParam::new(&b"abc"[..]);
        drop(reader);
        done.await.unwrap();
    }
}
