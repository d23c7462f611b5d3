// THEORY:
// The orchestrator and its workers talk only through rank-addressed, tagged,
// point-to-point messages. This module provides that transport in-process: every
// rank owns an `Endpoint` with one inbox per tag, backed by tokio unbounded
// channels, in the same way the vision pipeline feeds its worker actors.
//
// Key architectural principles:
// 1.  **Ranks, Not Handles**: Peers are addressed by a plain `Rank`. Rank 0 is the
//     orchestrator; ranks `1..size` are workers.
// 2.  **Tag Separation**: WORK and DONE messages travel on separate inboxes, so a
//     worker waiting for work never sees a completion report and vice versa.
// 3.  **Bytes on the Wire**: Payloads are serialized with `serde_json` before they
//     are sent. No memory is shared between ranks, so a multi-process transport
//     could replace this one without touching the protocol.

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies a participant. Rank 0 is the orchestrator.
pub type Rank = usize;

pub const ORCHESTRATOR_RANK: Rank = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Work,
    Done,
}

/// A message in flight.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub source: Rank,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

struct Mailbox {
    work: mpsc::UnboundedSender<Envelope>,
    done: mpsc::UnboundedSender<Envelope>,
}

impl Mailbox {
    fn sender(&self, tag: Tag) -> &mpsc::UnboundedSender<Envelope> {
        match tag {
            Tag::Work => &self.work,
            Tag::Done => &self.done,
        }
    }
}

/// One rank's view of the cluster.
pub struct Endpoint {
    rank: Rank,
    /// Senders into every rank's inboxes, indexed by rank.
    peers: Arc<Vec<Mailbox>>,
    work_inbox: mpsc::UnboundedReceiver<Envelope>,
    done_inbox: mpsc::UnboundedReceiver<Envelope>,
}

impl Endpoint {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of ranks in the cluster, orchestrator included.
    pub fn size(&self) -> usize {
        self.peers.len()
    }

    pub fn send(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let mailbox = self.peers.get(dest).ok_or_else(|| {
            Error::Transport(format!("rank {dest} does not exist in a cluster of {}", self.size()))
        })?;
        mailbox
            .sender(tag)
            .send(Envelope {
                source: self.rank,
                tag,
                payload,
            })
            .map_err(|_| Error::Transport(format!("rank {dest} is no longer receiving")))
    }

    /// Waits for the next message with `tag` from any rank.
    pub async fn recv(&mut self, tag: Tag) -> Result<Envelope> {
        let inbox = match tag {
            Tag::Work => &mut self.work_inbox,
            Tag::Done => &mut self.done_inbox,
        };
        inbox.recv().await.ok_or_else(|| {
            Error::Transport(format!("every sender to rank {} has hung up", self.rank))
        })
    }

    /// The next message with `tag` if one is already waiting.
    pub fn try_recv(&mut self, tag: Tag) -> Option<Envelope> {
        match tag {
            Tag::Work => self.work_inbox.try_recv().ok(),
            Tag::Done => self.done_inbox.try_recv().ok(),
        }
    }

    pub fn send_message<T: Serialize>(&self, dest: Rank, tag: Tag, message: &T) -> Result<()> {
        self.send(dest, tag, serde_json::to_vec(message)?)
    }

    /// Receives and decodes the next message with `tag`, returning its source rank.
    pub async fn recv_message<T: DeserializeOwned>(&mut self, tag: Tag) -> Result<(Rank, T)> {
        let envelope = self.recv(tag).await?;
        Ok((envelope.source, serde_json::from_slice(&envelope.payload)?))
    }
}

/// Factory for in-process clusters.
pub struct Cluster;

impl Cluster {
    /// One endpoint per rank, ordered by rank. At least one worker is required.
    pub fn local(num_processes: usize) -> Result<Vec<Endpoint>> {
        if num_processes < 2 {
            return Err(Error::Configuration(format!(
                "need an orchestrator and at least one worker, got {num_processes} process(es)"
            )));
        }

        let (mailboxes, inboxes): (Vec<_>, Vec<_>) = (0..num_processes)
            .map(|_| {
                let (work, work_inbox) = mpsc::unbounded_channel();
                let (done, done_inbox) = mpsc::unbounded_channel();
                (Mailbox { work, done }, (work_inbox, done_inbox))
            })
            .unzip();

        let peers = Arc::new(mailboxes);
        Ok(inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, (work_inbox, done_inbox))| Endpoint {
                rank,
                peers: Arc::clone(&peers),
                work_inbox,
                done_inbox,
            })
            .collect())
    }
}
