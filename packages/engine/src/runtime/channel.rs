// packages/engine/src/runtime/channel.rs
//! Result channel
//!
//! Bounded multi-producer/single-consumer channel between agent tasks and
//! the pipeline listener. End of stream is its own message variant, so no
//! payload can be mistaken for it. Per-producer FIFO is inherited from the
//! underlying tokio channel; nothing is promised across producers.

use crate::registry::AgentId;
use crate::utils::errors::{EngineError, Result};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// One raw record as produced by extraction logic
pub type RawRecord = Map<String, Value>;

/// Unit of transport: a payload and the agent that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    pub agent: AgentId,

    /// Position in the agent's own output, starting at 0
    pub seq: u64,

    pub payload: RawRecord,
}

/// What travels on the channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Record(ResultEnvelope),

    /// No more records will follow in this run
    EndOfStream,
}

#[derive(Debug, Default)]
struct Counters {
    records: AtomicU64,
    end_of_stream: AtomicU64,
    received: AtomicU64,
}

/// Create a result channel with the given capacity
pub fn result_channel(capacity: usize) -> (ResultSender, ResultReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let counters = Arc::new(Counters::default());
    (
        ResultSender {
            tx,
            counters: Arc::clone(&counters),
        },
        ResultReceiver { rx, counters },
    )
}

/// Producer side; cloned into every agent task
#[derive(Debug, Clone)]
pub struct ResultSender {
    tx: mpsc::Sender<ChannelMessage>,
    counters: Arc<Counters>,
}

impl ResultSender {
    /// Send an envelope, waiting while the channel is full
    pub async fn send(&self, envelope: ResultEnvelope) -> Result<()> {
        trace!("Forwarding record #{} from agent {}", envelope.seq, envelope.agent);
        self.tx
            .send(ChannelMessage::Record(envelope))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        self.counters.records.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Signal end of stream. Consumes the sender; the launcher calls this
    /// exactly once, after every producer has finished.
    pub async fn end_of_stream(self) -> Result<()> {
        self.tx
            .send(ChannelMessage::EndOfStream)
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        self.counters.end_of_stream.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn stats(&self) -> ChannelStats {
        stats(&self.counters)
    }
}

/// Consumer side, owned by the pipeline listener
#[derive(Debug)]
pub struct ResultReceiver {
    rx: mpsc::Receiver<ChannelMessage>,
    counters: Arc<Counters>,
}

impl ResultReceiver {
    /// Next message, or `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        let message = self.rx.recv().await;
        if message.is_some() {
            self.counters.received.fetch_add(1, Ordering::Relaxed);
        }
        message
    }

    pub fn stats(&self) -> ChannelStats {
        stats(&self.counters)
    }
}

fn stats(counters: &Counters) -> ChannelStats {
    ChannelStats {
        records_sent: counters.records.load(Ordering::Relaxed),
        end_of_stream_sent: counters.end_of_stream.load(Ordering::Relaxed),
        messages_received: counters.received.load(Ordering::Relaxed),
    }
}

/// Channel statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub records_sent: u64,
    pub end_of_stream_sent: u64,
    pub messages_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(agent: u64, seq: u64) -> ResultEnvelope {
        let payload = json!({ "n": seq }).as_object().cloned().unwrap();
        ResultEnvelope {
            agent: AgentId(agent),
            seq,
            payload,
        }
    }

    #[tokio::test]
    async fn test_records_then_end_of_stream() {
        let (tx, mut rx) = result_channel(8);
        tx.send(envelope(1, 0)).await.unwrap();
        tx.send(envelope(1, 1)).await.unwrap();
        tx.end_of_stream().await.unwrap();

        assert!(matches!(rx.recv().await, Some(ChannelMessage::Record(e)) if e.seq == 0));
        assert!(matches!(rx.recv().await, Some(ChannelMessage::Record(e)) if e.seq == 1));
        assert_eq!(rx.recv().await, Some(ChannelMessage::EndOfStream));
        assert_eq!(rx.recv().await, None);

        let stats = rx.stats();
        assert_eq!(stats.records_sent, 2);
        assert_eq!(stats.end_of_stream_sent, 1);
        assert_eq!(stats.messages_received, 3);
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (tx, rx) = result_channel(1);
        drop(rx);
        assert!(tx.is_closed());
        assert!(matches!(tx.send(envelope(1, 0)).await, Err(EngineError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_per_producer_order() {
        let (tx, mut rx) = result_channel(4);
        let mut producers = vec![];
        for agent in 0..3u64 {
            let tx = tx.clone();
            producers.push(tokio::spawn(async move {
                for seq in 0..50 {
                    tx.send(envelope(agent, seq)).await.unwrap();
                }
            }));
        }
        drop(tx);

        let consumer = tokio::spawn(async move {
            let mut last = [None::<u64>; 3];
            while let Some(ChannelMessage::Record(e)) = rx.recv().await {
                let slot = &mut last[e.agent.0 as usize];
                if let Some(prev) = *slot {
                    assert!(e.seq > prev);
                }
                *slot = Some(e.seq);
            }
            last
        });

        for p in producers {
            p.await.unwrap();
        }
        let last = consumer.await.unwrap();
        assert!(last.iter().all(|l| *l == Some(49)));
    }
}
