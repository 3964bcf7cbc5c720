//! Where a child's stdout and stderr go.

use std::fmt;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::warn;

/// Destination for one of the child's output streams.
#[derive(Default)]
pub enum OutputSink {
    /// Share the parent's stream.
    #[default]
    Inherit,
    /// Drop everything.
    Discard,
    /// Copy into a writer as output arrives; the writer is shut down at end of stream.
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
}

impl OutputSink {
    pub fn writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self::Writer(Box::new(writer))
    }

    pub(crate) fn stdio(&self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Discard => Stdio::null(),
            Self::Writer(_) => Stdio::piped(),
        }
    }

    /// Start copying `stream` into the sink. Only `Writer` sinks need a task.
    pub(crate) fn forward<R>(self, stream: Option<R>, label: &'static str) -> Option<JoinHandle<()>>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let Self::Writer(mut writer) = self else {
            return None;
        };

        let Some(mut stream) = stream else {
            warn!(stream = label, "child stream was not captured, output is lost");
            return None;
        };

        Some(tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut stream, &mut writer).await {
                warn!(stream = label, error = %e, "output forwarding stopped");
            }
            let _ = writer.shutdown().await;
        }))
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherit => f.write_str("Inherit"),
            Self::Discard => f.write_str("Discard"),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}
