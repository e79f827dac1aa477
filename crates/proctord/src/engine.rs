use proctor_core::wire::{self, InputPacket, OutputRecord};
use proctor_core::{GraphOptions, NodeError, ProctorGraph};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("graph error: {0}")]
    Graph(#[from] NodeError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Counters reported when the input ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSummary {
    pub emitted: u64,
    pub discarded: u64,
}

/// Messages sent from the reader task to the engine thread.
enum EngineRequest {
    Packet {
        packet: InputPacket,
        reply: oneshot::Sender<Vec<OutputRecord>>,
    },
    Finish {
        reply: oneshot::Sender<EngineSummary>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run one packet through the graph and collect what it produced.
    pub async fn process(&self, packet: InputPacket) -> Result<Vec<OutputRecord>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Packet {
                packet,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Close every input stream and report the final counters.
    pub async fn finish(&self) -> Result<EngineSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Finish { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The graph is built before the thread starts, so a bad node list fails
/// here rather than on the first packet.
pub fn spawn_engine(options: GraphOptions, capacity: usize) -> Result<EngineHandle, EngineError> {
    let mut graph = ProctorGraph::new(options)?;
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(capacity.max(1));

    std::thread::Builder::new()
        .name("proctor-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Packet { packet, reply } => {
                        let frame = wire::dispatch(&mut graph, packet);
                        let _ = reply.send(OutputRecord::from_frame(&frame));
                    }
                    EngineRequest::Finish { reply } => {
                        let dropped = graph.close_all();
                        if dropped > 0 {
                            tracing::warn!(count = dropped, "partial timestamps dropped at close");
                        }
                        let _ = reply.send(EngineSummary {
                            emitted: graph.emitted(),
                            discarded: graph.discarded(),
                        });
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
