// Rank Transport
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::config::{Complex, Real};
use crate::error::{Result, SimError};

/// Blocking message passing between ranks.
///
/// Every call is a rendezvous: the participating ranks must issue matching
/// calls in the same order, otherwise they block forever.
pub trait Transport: Send {
    fn rank(&self) -> usize;

    fn num_ranks(&self) -> usize;

    /// Sends `send` to `peer` and fills `recv` with the peer's equally sized buffer.
    fn exchange(&mut self, send: &[Complex], recv: &mut [Complex], peer: usize) -> Result<()>;

    /// Overwrites `data` on every rank with the contents held by `root`.
    fn broadcast(&mut self, data: &mut [Complex], root: usize) -> Result<()>;

    fn broadcast_reals(&mut self, values: &mut [Real], root: usize) -> Result<()>;

    /// Element-wise sum over all ranks, result available everywhere.
    fn all_reduce_sum(&mut self, values: &mut [Real]) -> Result<()>;
}

/// The trivial communicator of a single-rank run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl Transport for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn exchange(&mut self, _send: &[Complex], _recv: &mut [Complex], peer: usize) -> Result<()> {
        Err(SimError::Transport {
            peer,
            message: "single-process transport has no peers".into(),
        })
    }

    fn broadcast(&mut self, _data: &mut [Complex], _root: usize) -> Result<()> {
        Ok(())
    }

    fn broadcast_reals(&mut self, _values: &mut [Real], _root: usize) -> Result<()> {
        Ok(())
    }

    fn all_reduce_sum(&mut self, _values: &mut [Real]) -> Result<()> {
        Ok(())
    }
}

enum Message {
    Amplitudes(Vec<Complex>),
    Reals(Vec<Real>),
}

/// One rank of an in-process cluster built by [`LocalCluster::new`].
///
/// Each ordered pair of ranks owns a dedicated unbounded channel, so messages
/// between two ranks arrive in send order and sends never block.
pub struct LocalTransport {
    rank: usize,
    outgoing: Vec<UnboundedSender<Message>>,
    incoming: Vec<UnboundedReceiver<Message>>,
}

/// Factory for a set of connected [`LocalTransport`]s, one per rank.
pub struct LocalCluster;

impl LocalCluster {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(num_ranks: usize) -> Vec<LocalTransport> {
        // channels[src][dst]
        let mut senders: Vec<Vec<UnboundedSender<Message>>> = Vec::with_capacity(num_ranks);
        let mut receivers: Vec<Vec<Option<UnboundedReceiver<Message>>>> =
            (0..num_ranks).map(|_| (0..num_ranks).map(|_| None).collect()).collect();
        for src in 0..num_ranks {
            let mut row = Vec::with_capacity(num_ranks);
            for dst_receivers in receivers.iter_mut() {
                let (tx, rx) = unbounded_channel();
                row.push(tx);
                dst_receivers[src] = Some(rx);
            }
            senders.push(row);
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (outgoing, incoming))| LocalTransport {
                rank,
                outgoing,
                incoming: incoming.into_iter().flatten().collect(),
            })
            .collect()
    }
}

impl LocalTransport {
    fn send(&self, peer: usize, message: Message) -> Result<()> {
        self.outgoing[peer]
            .send(message)
            .map_err(|_| SimError::Transport {
                peer,
                message: "peer hung up".into(),
            })
    }

    fn recv(&mut self, peer: usize) -> Result<Message> {
        self.incoming[peer]
            .blocking_recv()
            .ok_or_else(|| SimError::Transport {
                peer,
                message: "channel closed".into(),
            })
    }

    fn recv_amplitudes(&mut self, peer: usize) -> Result<Vec<Complex>> {
        match self.recv(peer)? {
            Message::Amplitudes(data) => Ok(data),
            Message::Reals(_) => Err(SimError::Transport {
                peer,
                message: "expected amplitudes, received reals".into(),
            }),
        }
    }

    fn recv_reals(&mut self, peer: usize) -> Result<Vec<Real>> {
        match self.recv(peer)? {
            Message::Reals(data) => Ok(data),
            Message::Amplitudes(_) => Err(SimError::Transport {
                peer,
                message: "expected reals, received amplitudes".into(),
            }),
        }
    }

    fn check_len(peer: usize, expected: usize, got: usize) -> Result<()> {
        if expected != got {
            return Err(SimError::Transport {
                peer,
                message: format!("length mismatch: expected {expected}, received {got}"),
            });
        }
        Ok(())
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.outgoing.len()
    }

    fn exchange(&mut self, send: &[Complex], recv: &mut [Complex], peer: usize) -> Result<()> {
        self.send(peer, Message::Amplitudes(send.to_vec()))?;
        let data = self.recv_amplitudes(peer)?;
        Self::check_len(peer, recv.len(), data.len())?;
        recv.copy_from_slice(&data);
        Ok(())
    }

    fn broadcast(&mut self, data: &mut [Complex], root: usize) -> Result<()> {
        if self.rank == root {
            for peer in (0..self.num_ranks()).filter(|&p| p != root) {
                self.send(peer, Message::Amplitudes(data.to_vec()))?;
            }
        } else {
            let received = self.recv_amplitudes(root)?;
            Self::check_len(root, data.len(), received.len())?;
            data.copy_from_slice(&received);
        }
        Ok(())
    }

    fn broadcast_reals(&mut self, values: &mut [Real], root: usize) -> Result<()> {
        if self.rank == root {
            for peer in (0..self.num_ranks()).filter(|&p| p != root) {
                self.send(peer, Message::Reals(values.to_vec()))?;
            }
        } else {
            let received = self.recv_reals(root)?;
            Self::check_len(root, values.len(), received.len())?;
            values.copy_from_slice(&received);
        }
        Ok(())
    }

    fn all_reduce_sum(&mut self, values: &mut [Real]) -> Result<()> {
        // Gather on rank 0 and sum in rank order so every rank sees identical bits
        if self.rank == 0 {
            for peer in 1..self.num_ranks() {
                let partial = self.recv_reals(peer)?;
                Self::check_len(peer, values.len(), partial.len())?;
                for (v, p) in values.iter_mut().zip(partial) {
                    *v += p;
                }
            }
        } else {
            self.send(0, Message::Reals(values.to_vec()))?;
        }
        self.broadcast_reals(values, 0)
    }
}
