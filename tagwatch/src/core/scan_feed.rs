/*!
Scan feeds: asynchronous sources of decoded tag identifiers.

The tracker is event-driven and never polls hardware itself. Whatever
decodes the radio signal (a HID reader loop, a serial bridge, a test
harness) pushes identifiers through one of these feeds.
*/

use async_stream::stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::core::registry::TagId;

/// Default bound for the scan channel between decoders and the tracker
pub const DEFAULT_FEED_CAPACITY: usize = 64;

/// Sending half handed to decoders; each push is one decoded scan
#[derive(Clone)]
pub struct ScanInjector {
    tx: mpsc::Sender<TagId>,
}

impl ScanInjector {
    /// Deliver one decoded identifier, waiting if the channel is full.
    /// Returns false once the tracker side is gone.
    pub async fn push(&self, id: impl Into<TagId>) -> bool {
        self.tx.send(id.into()).await.is_ok()
    }
}

/// Bounded channel feed: the injector goes to the decoder, the stream to the
/// tracker. Backpressure applies on the decoder side when the tracker lags.
pub fn channel_feed(capacity: usize) -> (ScanInjector, ReceiverStream<TagId>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ScanInjector { tx }, ReceiverStream::new(rx))
}

/// Read identifiers line by line from an async reader. Lines are trimmed and
/// empty lines skipped, so an interactive terminal works as a scanner.
pub fn line_feed<R>(reader: R) -> impl Stream<Item = TagId>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream! {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let id = line.trim();
                    if id.is_empty() {
                        continue;
                    }
                    yield TagId::from(id);
                }
                Ok(None) => {
                    debug!("Scan feed reached end of input");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Scan feed reader failed, stopping feed");
                    break;
                }
            }
        }
    }
}

/// Line feed over stdin, for keyboard-emulating readers and manual entry
pub fn console_feed() -> impl Stream<Item = TagId> {
    line_feed(tokio::io::stdin())
}
