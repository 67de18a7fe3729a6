//! Socket ownership table

use crate::limits::DmaLimits;
use crate::socket::{Ip, SocketId};
use crate::{Error, Result};

/// Which channel owns each hardware socket.
///
/// One slot per socket, laid out block after block in [`Ip`] order. CPU
/// sockets are virtual and never owned.
pub struct SocketRegistry<T> {
    base: [usize; Ip::COUNT],
    counts: [u8; Ip::COUNT],
    owners: Vec<Option<T>>,
}

impl<T> SocketRegistry<T> {
    pub fn new(limits: &DmaLimits) -> SocketRegistry<T> {
        let mut base = [0; Ip::COUNT];
        let mut total = 0;
        for (i, count) in limits.sockets_per_ip.iter().enumerate() {
            base[i] = total;
            total += *count as usize;
        }
        SocketRegistry {
            base,
            counts: limits.sockets_per_ip,
            owners: (0..total).map(|_| None).collect(),
        }
    }

    fn slot(&self, socket: SocketId) -> Option<usize> {
        let ip = socket.ip()?;
        if socket.number() >= self.counts[ip.index()] {
            return None;
        }
        Some(self.base[ip.index()] + socket.number() as usize)
    }

    /// Whether `socket` names a hardware socket on this engine.
    pub fn is_valid(&self, socket: SocketId) -> bool {
        self.slot(socket).is_some()
    }

    pub fn is_owned(&self, socket: SocketId) -> bool {
        self.owner(socket).is_some()
    }

    pub fn owner(&self, socket: SocketId) -> Option<&T> {
        self.slot(socket).and_then(|i| self.owners[i].as_ref())
    }

    pub fn acquire(&mut self, socket: SocketId, owner: T) -> Result<()> {
        let i = self.slot(socket).ok_or(Error::BadArgument("invalid socket"))?;
        if self.owners[i].is_some() {
            return Err(Error::BadArgument("socket already in use"));
        }
        self.owners[i] = Some(owner);
        Ok(())
    }

    pub fn release(&mut self, socket: SocketId) -> Option<T> {
        let i = self.slot(socket)?;
        self.owners[i].take()
    }
}
