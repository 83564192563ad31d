use std::sync::Arc;
use crate::ingest::connectors::{FeedProtocol, Frame};
use crate::ingest::reconciler::SubscriptionSet;
use crate::ingest::sink::{drop_frame, TickSink};
use crate::types::InstrumentSymbol;

/// What a single inbound text frame turned out to be.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// A valid tick for an active instrument; counts as liveness.
    Accepted,
    Ack {
        request_id: u64,
        success: bool,
        message: String,
    },
    Heartbeat,
    Ignored,
    Dropped,
}

pub struct MessageDispatcher {
    feed: String,
    protocol: Arc<dyn FeedProtocol>,
    sink: TickSink,
}

impl MessageDispatcher {
    pub fn new(feed: &str, protocol: Arc<dyn FeedProtocol>, sink: TickSink) -> Self {
        MessageDispatcher {
            feed: feed.to_string(),
            protocol,
            sink,
        }
    }

    pub async fn handle_text(&mut self, text: &str, active: &SubscriptionSet) -> Inbound {
        let frame = match self.protocol.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                drop_frame(&self.feed, "malformed", &e);
                return Inbound::Dropped;
            }
        };

        match frame {
            Frame::Tick(tick) => self.sink.accept(tick, active).await,
            Frame::Ack { request_id, success, message } => Inbound::Ack {
                request_id,
                success,
                message,
            },
            Frame::Heartbeat => Inbound::Heartbeat,
            Frame::Notice(message) => {
                tracing::warn!(feed = %self.feed, notice = %message, "Exchange error notice");
                Inbound::Ignored
            }
            Frame::Ignored => Inbound::Ignored,
        }
    }

    /// An instrument left the active set; its merged fields go with it.
    pub fn forget(&mut self, symbol: &InstrumentSymbol) {
        self.sink.forget(symbol);
    }

    /// A fresh session replays snapshots, so nothing carries over.
    pub fn reset(&mut self) {
        self.sink.clear();
    }
}
