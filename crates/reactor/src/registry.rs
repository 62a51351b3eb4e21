//! Channel registry — a slab keyed by [`ChannelId`], replacing cyclic
//! channel↔reactor pointers with an opaque index.
//!
//! Grounded on `cmd/httpd/rust/ksvc::main::ConnSlab`: a `Vec<Option<T>>`
//! plus a free-index stack, generalized from a raw `usize` index to
//! `ChannelId`.

use reactor_core::ChannelId;

use crate::channel::Channel;

pub struct ChannelRegistry {
    slots: Vec<Option<Channel>>,
    free: Vec<u32>,
}

impl ChannelRegistry {
    pub fn new(max_channels: usize) -> Self {
        let mut free = Vec::with_capacity(max_channels);
        for i in (0..max_channels as u32).rev() {
            free.push(i);
        }
        Self {
            slots: (0..max_channels).map(|_| None).collect(),
            free,
        }
    }

    /// Reserve a slot and install `channel`, whose `id` must equal the
    /// returned id — callers build the `Channel` after calling
    /// [`ChannelRegistry::reserve`] so the id can be stamped into it up
    /// front.
    pub fn reserve(&mut self) -> Option<ChannelId> {
        self.free.pop().map(ChannelId::new)
    }

    pub fn insert(&mut self, channel: Channel) {
        let idx = channel.id.as_usize();
        debug_assert!(self.slots[idx].is_none(), "double-insert into a reserved slot");
        self.slots[idx] = Some(channel);
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.slots.get(id.as_usize())?.as_ref()
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.slots.get_mut(id.as_usize())?.as_mut()
    }

    pub fn remove(&mut self, id: ChannelId) -> Option<Channel> {
        let idx = id.as_usize();
        let channel = self.slots.get_mut(idx)?.take()?;
        self.free.push(id.as_u32());
        Some(channel)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| ChannelId::new(i as u32)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;

    #[test]
    fn reserve_insert_get_remove_round_trip() {
        let mut reg = ChannelRegistry::new(4);
        let id = reg.reserve().unwrap();
        let channel = Channel::new(id, 7, None, 4096, 4096);
        reg.insert(channel);

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(id).unwrap().fd, 7);
        assert_eq!(reg.get(id).unwrap().state, ChannelState::Open);

        let removed = reg.remove(id).unwrap();
        assert_eq!(removed.fd, 7);
        assert_eq!(reg.len(), 0);

        let id2 = reg.reserve().unwrap();
        assert_eq!(id2, id, "freed slot is reused");
    }

    #[test]
    fn reserve_returns_none_once_exhausted() {
        let mut reg = ChannelRegistry::new(2);
        assert!(reg.reserve().is_some());
        assert!(reg.reserve().is_some());
        assert!(reg.reserve().is_none());
    }
}
