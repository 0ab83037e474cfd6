use async_trait::async_trait;
use tokio::sync::mpsc;

use super::TailError;

pub type Lines = Vec<String>;

pub type ChannelLogTx = mpsc::Sender<PartialLogStream>;
pub type ChannelLogRx = mpsc::Receiver<PartialLogStream>;

/// A piece of a mirrored log as it arrives.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PartialLogStream {
    Next(Lines),
    End,
}

#[async_trait]
pub trait LogSink: std::fmt::Debug + Send + Sync {
    async fn sink(&mut self, logs: PartialLogStream) -> Result<usize, TailError>;
}

#[async_trait]
pub trait LogSource: std::fmt::Debug + Send {
    /// The next piece of the log. Returns `End` forever once the stream has
    /// ended or the sink has gone away.
    async fn source(&mut self) -> PartialLogStream;
}

/// Creates a connected sink/source pair.
pub fn channel(buffer: usize) -> (ChannelLogSink, ChannelLogSource) {
    let (tx, rx) = mpsc::channel(buffer);
    (ChannelLogSink::new(tx), ChannelLogSource::new(rx))
}

#[derive(Debug, Clone)]
pub struct ChannelLogSink {
    tx: ChannelLogTx,
}

impl ChannelLogSink {
    pub fn new(tx: ChannelLogTx) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl LogSink for ChannelLogSink {
    #[tracing::instrument(skip(self))]
    async fn sink(&mut self, logs: PartialLogStream) -> Result<usize, TailError> {
        let out = match logs {
            PartialLogStream::Next(ref logs) => logs.len(),
            PartialLogStream::End => 0,
        };
        self.tx.send(logs).await.map_err(|_| TailError::SinkClosed)?;
        Ok(out)
    }
}

#[derive(Debug)]
pub struct ChannelLogSource {
    rx: ChannelLogRx,
    ended: bool,
}

impl ChannelLogSource {
    pub fn new(rx: ChannelLogRx) -> Self {
        Self { rx, ended: false }
    }
}

#[async_trait]
impl LogSource for ChannelLogSource {
    async fn source(&mut self) -> PartialLogStream {
        if self.ended {
            return PartialLogStream::End;
        }
        match self.rx.recv().await {
            Some(PartialLogStream::End) | None => {
                self.ended = true;
                PartialLogStream::End
            }
            Some(next) => next,
        }
    }
}

/// Splits arriving chunks into whole lines, holding back a trailing partial
/// line until its newline shows up. Lines are decoded only once complete, so
/// a character split across two chunks survives.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Lines {
        self.pending.extend_from_slice(chunk);
        let mut lines = vec![];
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn source_sees_what_the_sink_sent() -> Result<(), TailError> {
        let (mut sink, mut source) = channel(8);
        assert_eq!(
            2,
            sink.sink(PartialLogStream::Next(vec!["a".into(), "b".into()]))
                .await?
        );
        sink.sink(PartialLogStream::End).await?;
        assert_eq!(
            PartialLogStream::Next(vec!["a".into(), "b".into()]),
            source.source().await
        );
        assert_eq!(PartialLogStream::End, source.source().await);
        assert_eq!(PartialLogStream::End, source.source().await);
        Ok(())
    }

    #[tokio::test]
    async fn dropped_sink_ends_the_source() {
        let (sink, mut source) = channel(8);
        drop(sink);
        assert_eq!(PartialLogStream::End, source.source().await);
    }

    #[test]
    fn partial_lines_wait_for_their_newline() {
        let mut splitter = LineSplitter::default();
        assert_eq!(vec!["000 (123.000.000)"], splitter.push(b"000 (123.000.000)\n001 ("));
        assert!(splitter.push(b"123.000").is_empty());
        assert_eq!(vec!["001 (123.000)"], splitter.push(b")\r\n"));
        assert_eq!(None, splitter.finish());
        splitter.push(b"...");
        assert_eq!(Some("...".to_string()), splitter.finish());
    }

    #[test]
    fn multibyte_characters_split_across_chunks_survive() {
        let line = "005 (17.000.000) job terminated: r\u{e9}sultat \u{2713}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(&line[..split]).is_empty());
        assert_eq!(
            vec!["005 (17.000.000) job terminated: r\u{e9}sultat \u{2713}"],
            splitter.push(&line[split..])
        );
    }
}
