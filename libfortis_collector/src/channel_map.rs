// Maps the source address of a datagram to the spectral order it came from. The TDCs
// all transmit from the same port, so the IP does the real work, but we match on the
// full socket address to stay exact.
use std::net::SocketAddr;

use fxhash::FxHashMap;

use super::channel::Channel;
use super::error::ChannelMapError;

/// ChannelMap contains the mapping of TDC source addresses to channels.
///
/// It is built once at startup from the configuration and never changes during a run.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    map: FxHashMap<SocketAddr, Channel>,
}

impl ChannelMap {
    /// Create a new ChannelMap from (address, channel) bindings.
    ///
    /// An address may only be bound to one channel.
    pub fn new(bindings: &[(SocketAddr, Channel)]) -> Result<Self, ChannelMapError> {
        let mut cm = ChannelMap::default();
        for (address, channel) in bindings {
            if cm.map.insert(*address, *channel).is_some() {
                return Err(ChannelMapError::DuplicateAddress(*address));
            }
        }
        Ok(cm)
    }

    /// Get the channel for a source address.
    ///
    /// If returns None the datagram cannot be attributed to any channel
    pub fn get_channel(&self, source: &SocketAddr) -> Option<Channel> {
        self.map.get(source).copied()
    }

    /// The address bound to a channel, if any
    pub fn get_address(&self, channel: &Channel) -> Option<SocketAddr> {
        self.map
            .iter()
            .find(|(_, c)| *c == channel)
            .map(|(address, _)| *address)
    }
}
