//! Line-oriented view of a child process's output.
//!
//! Stdout and stderr are each framed with [`LinesCodec`] and merged into
//! one lazy stream. The stream ends once both pipes are closed, which
//! happens when the process exits.

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::debug;

/// Longest line kept; anything longer is discarded by the codec.
const MAX_LINE_LENGTH: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub source: Source,
    pub text: String,
}

pub type OutputLines = BoxStream<'static, OutputLine>;

/// Merge two output pipes into a single stream of tagged lines.
pub fn output_lines<O, E>(stdout: O, stderr: E) -> OutputLines
where
    O: AsyncRead + Send + Unpin + 'static,
    E: AsyncRead + Send + Unpin + 'static,
{
    stream::select(tagged(stdout, Source::Stdout), tagged(stderr, Source::Stderr)).boxed()
}

fn tagged<R>(reader: R, source: Source) -> BoxStream<'static, OutputLine>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
        .filter_map(move |frame| async move {
            match frame {
                Ok(text) => Some(OutputLine { source, text }),
                Err(e) => {
                    debug!("Dropping unreadable {:?} line: {}", source, e);
                    None
                }
            }
        })
        .boxed()
}
