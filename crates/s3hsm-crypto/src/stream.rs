//! Streaming encryption adapters.
//!
//! [`EncryptReader`] wraps a plaintext source and yields ciphertext;
//! [`DecryptWriter`] wraps a plaintext sink and accepts ciphertext. Both pass
//! bytes through untouched when no key is given, so callers can use the same
//! code path for encrypted and plain objects. Neither buffers more than one
//! caller-sized write, so objects of any size stream through.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use s3hsm_core::HsmResult;

use crate::cipher::Keystream;
use crate::keys::EncryptionKey;

/// Read-through encryption: every byte read from `inner` is XORed with the
/// keystream before being handed out.
#[derive(Debug)]
pub struct EncryptReader<R> {
    inner: R,
    keystream: Option<Keystream>,
}

impl<R> EncryptReader<R> {
    /// Wrap `inner`; `None` gives a plain pass-through reader.
    pub fn new(inner: R, key: Option<&EncryptionKey>) -> HsmResult<Self> {
        Ok(Self {
            inner,
            keystream: key.map(Keystream::new).transpose()?,
        })
    }

    pub fn is_encrypting(&self) -> bool {
        self.keystream.is_some()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for EncryptReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if let Some(keystream) = this.keystream.as_mut() {
            keystream.apply(&mut buf.filled_mut()[before..]);
        }
        Poll::Ready(Ok(()))
    }
}

/// Write-through decryption: every byte written is XORed with the keystream
/// and forwarded to `inner`.
///
/// A write is accepted in full once the keystream has been applied; bytes
/// the sink has not taken yet are held back and pushed out before the next
/// write, on flush and on shutdown. Always flush or shut down before
/// dropping, or held-back bytes are lost.
#[derive(Debug)]
pub struct DecryptWriter<W> {
    inner: W,
    keystream: Option<Keystream>,
    pending: Vec<u8>,
    pos: usize,
}

impl<W> DecryptWriter<W> {
    /// Wrap `inner`; `None` gives a plain pass-through writer.
    pub fn new(inner: W, key: Option<&EncryptionKey>) -> HsmResult<Self> {
        Ok(Self {
            inner,
            keystream: key.map(Keystream::new).transpose()?,
            pending: Vec::new(),
            pos: 0,
        })
    }

    pub fn is_decrypting(&self) -> bool {
        self.keystream.is_some()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> DecryptWriter<W> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.pos < self.pending.len() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending[self.pos..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted no decrypted bytes",
                )));
            }
            self.pos += n;
        }
        self.pending.clear();
        self.pos = 0;
        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for DecryptWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        ready!(this.poll_drain(cx))?;

        let Some(keystream) = this.keystream.as_mut() else {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        };
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        this.pending.extend_from_slice(buf);
        keystream.apply(&mut this.pending);

        // Push what the sink takes right away; the rest waits for the next call.
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
