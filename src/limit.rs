//! Hard byte cap over a readable stream.

use std::io::{self, Read};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// A reader that yields at most a fixed number of bytes.
///
/// Every read is clipped to the remaining budget. Once the budget is spent
/// the reader reports end-of-stream, whatever the inner stream still holds.
/// The budget shrinks by the bytes the inner stream actually delivered.
///
/// Dropping the wrapper drops (and so closes) the inner stream.
#[derive(Debug)]
pub struct SizeLimited<R> {
    inner: R,
    remaining: u64,
}

impl<R> SizeLimited<R> {
    /// Wrap `inner`, allowing `limit` bytes through.
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    /// Bytes that may still be read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Whether the budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn clip(&self, len: usize) -> usize {
        usize::try_from(self.remaining).map_or(len, |remaining| remaining.min(len))
    }

    fn consume(&mut self, n: usize) {
        // n never exceeds the clipped length, which never exceeds `remaining`
        self.remaining = self.remaining.saturating_sub(n as u64);
    }
}

impl<R: Read> Read for SizeLimited<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }

        let max = self.clip(buf.len());
        let n = self.inner.read(&mut buf[..max])?;
        self.consume(n);
        Ok(n)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for SizeLimited<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.remaining == 0 {
            return Poll::Ready(Ok(()));
        }

        let max = this.clip(buf.remaining());
        let dst = buf.initialize_unfilled_to(max);
        let mut clipped = ReadBuf::new(dst);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut clipped))?;
        let n = clipped.filled().len();

        buf.advance(n);
        this.consume(n);
        Poll::Ready(Ok(()))
    }
}
