//! Decoding of the `/chat/stream` body.
//!
//! The body is a series of `data: <json>` lines. Transport fragments split
//! lines (and UTF-8 sequences) at arbitrary byte offsets, so a trailing
//! partial line is held back and completed by the next fragment.

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::error::Result;
use crate::protocol::StreamEvent;

/// Incremental line decoder for the stream body.
#[derive(Debug, Default)]
pub struct EventDecoder {
    pending: Vec<u8>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport fragment and return every event completed by it,
    /// in line order.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(fragment);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete
            .split(|b| *b == b'\n')
            .filter_map(parse_line)
            .collect()
    }

    /// Flush whatever is left once the transport has closed. A final line
    /// without a trailing newline is still a complete line at this point.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.pending);
        parse_line(&rest).into_iter().collect()
    }

    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn parse_line(raw: &[u8]) -> Option<StreamEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }

    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!(line = %data, error = %err, "skipping unparseable stream line");
            None
        }
    }
}

/// Turn a stream of transport fragments into a stream of event batches, one
/// batch per fragment. Empty batches are dropped. The final batch carries any
/// line left unterminated when the transport closed.
pub fn event_batches<S>(fragments: S) -> impl Stream<Item = Result<Vec<StreamEvent>>>
where
    S: Stream<Item = Result<Vec<u8>>>,
{
    let fragments = fragments.map(Some).chain(futures::stream::once(async { None }));

    fragments
        .scan(EventDecoder::new(), |decoder, fragment| {
            let batch = match fragment {
                Some(Ok(bytes)) => Ok(decoder.push(&bytes)),
                Some(Err(err)) => Err(err),
                None => Ok(decoder.finish()),
            };
            futures::future::ready(Some(batch))
        })
        .filter(|batch| futures::future::ready(!matches!(batch, Ok(events) if events.is_empty())))
}
