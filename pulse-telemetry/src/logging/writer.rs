//! Writers that mask credentials before bytes reach the sink.

use std::io::{self, Write};
use std::sync::Arc;

use tracing_subscriber::fmt::MakeWriter;

use crate::masking::SensitiveDataMasker;

/// [`MakeWriter`] adapter that wraps every produced writer in a [`MaskingWriter`].
#[derive(Debug, Clone)]
pub struct MaskingMakeWriter<M> {
    inner: M,
    masker: Arc<SensitiveDataMasker>,
}

impl<M> MaskingMakeWriter<M> {
    /// Wraps `inner` so that its output is masked by `masker`.
    pub fn new(inner: M, masker: Arc<SensitiveDataMasker>) -> Self {
        Self { inner, masker }
    }
}

impl<'a, M> MakeWriter<'a> for MaskingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = MaskingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        MaskingWriter::new(self.inner.make_writer(), Arc::clone(&self.masker))
    }
}

/// Writer that masks sensitive substrings of each buffer before forwarding it.
///
/// The fmt layer formats a whole event before issuing a single `write`, so a
/// token is never split across two calls.
#[derive(Debug)]
pub struct MaskingWriter<W> {
    inner: W,
    masker: Arc<SensitiveDataMasker>,
}

impl<W> MaskingWriter<W> {
    /// Creates a masking writer around `inner`.
    pub fn new(inner: W, masker: Arc<SensitiveDataMasker>) -> Self {
        Self { inner, masker }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for MaskingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        let masked = self.masker.mask_string(&text);
        self.inner.write_all(masked.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
