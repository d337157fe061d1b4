//! Event ingress.
//!
//! Discovery and liveness agents connect over TCP and stream one JSON
//! frame per line:
//!
//! ```text
//! {"name":"kytos/of_core.switch.interface.link_up","event":{"interface_link_up":"A:1"}}
//! ```
//!
//! Each frame is published on the inbound bus with its own timestamp when
//! it carries one. A malformed line is logged and skipped; the connection
//! stays open.

use crate::dispatcher::TopologyEvent;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use topo_common::{Envelope, EventBus};
use tracing::{debug, info, warn};

/// One inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub name: String,
    /// Time the event was observed; publish time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub event: TopologyEvent,
}

impl EventFrame {
    pub fn into_envelope(self) -> Envelope<TopologyEvent> {
        let envelope = Envelope::new(self.name, self.event);
        match self.timestamp {
            Some(at) => envelope.at(at),
            None => envelope,
        }
    }
}

/// Per-connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub published: usize,
    pub rejected: usize,
}

/// Parses one line and publishes it. Returns how many subscribers got it.
pub fn publish_line(bus: &EventBus<TopologyEvent>, line: &str) -> Result<usize> {
    let frame: EventFrame = serde_json::from_str(line)?;
    Ok(bus.publish_envelope(frame.into_envelope()))
}

/// Publishes every frame read from `reader` until end of stream.
pub async fn read_frames<R>(reader: R, bus: &EventBus<TopologyEvent>) -> std::io::Result<FrameStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = FrameStats::default();
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match publish_line(bus, &line) {
            Ok(0) => {
                stats.published += 1;
                debug!("Ingress frame matched no subscriber");
            }
            Ok(_) => stats.published += 1,
            Err(e) => {
                stats.rejected += 1;
                warn!(error = %e, "Rejected ingress frame");
            }
        }
    }
    Ok(stats)
}

/// Binds the ingress listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Event ingress listening");
    Ok(listener)
}

/// Serves `listener` until `shutdown` fires, one task per connection.
pub fn spawn_ingress(
    listener: TcpListener,
    bus: Arc<EventBus<TopologyEvent>>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let connections = TaskTracker::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Ingress connection accepted");
                        let bus = bus.clone();
                        let shutdown = shutdown.clone();
                        connections.spawn(async move {
                            tokio::select! {
                                _ = shutdown.cancelled() => {}
                                read = read_frames(BufReader::new(stream), &bus) => match read {
                                    Ok(stats) => debug!(
                                        peer = %peer,
                                        published = stats.published,
                                        rejected = stats.rejected,
                                        "Ingress connection closed"
                                    ),
                                    Err(e) => warn!(peer = %peer, error = %e, "Ingress connection failed"),
                                }
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept ingress connection"),
                }
            }
        }
        connections.close();
        connections.wait().await;
        info!("Event ingress stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use topo_types::InterfaceId;

    #[tokio::test]
    async fn test_frames_published_with_timestamp() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&[r".*\.link_up"]).unwrap();
        let input = concat!(
            r#"{"name":"of_core.switch.interface.link_up","timestamp":"2024-05-01T10:00:00Z","event":{"interface_link_up":"A:1"}}"#,
            "\n\n",
            "not json\n",
            r#"{"name":"of_core.switch.new","event":{"switch_up":{"dpid":"A"}}}"#,
            "\n",
        );

        let stats = read_frames(input.as_bytes(), &bus).await.unwrap();
        assert_eq!(stats, FrameStats { published: 2, rejected: 1 });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.content, TopologyEvent::InterfaceLinkUp(InterfaceId::new("A", 1)));
        assert_eq!(envelope.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_frame_roundtrip_names_variant() {
        let frame = EventFrame {
            name: "of_lldp.interface.is.nni".into(),
            timestamp: None,
            event: TopologyEvent::NniPair {
                a: InterfaceId::new("A", 1),
                b: InterfaceId::new("B", 1),
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"]["nni_pair"]["a"], "A:1");
        assert!(json.get("timestamp").is_none());
    }
}
