//! Tunables of the buffer pool and the IPv6 core.
//!
//! Both structs carry public fields with associated default constants, a
//! `new()` returning the defaults and one setter per field.

/// Number of entries in the MPL seed set.
pub const SEED_SET_ENTRIES: usize = 32;

/// Number of datagrams that may be under reassembly at the same time.
pub const MAX_REASSEMBLY_ENTRIES: usize = 4;

/// Configuration of the message buffer pool.
#[derive(Clone, Copy, Debug)]
pub struct PoolConf {
    /// Number of buffers in the pool.
    pub nb_buffers: usize,
    /// Data bytes held by each buffer.
    pub buffer_size: usize,
    /// Reclaim buffers from lower priority queued messages on exhaustion.
    pub evict_on_exhaustion: bool,
}

impl PoolConf {
    /// Default number of buffers.
    pub const NB_BUFFERS: usize = 256;
    /// Default buffer size.
    pub const BUFFER_SIZE: usize = 128;

    /// Create a configuration holding the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of buffers.
    pub fn set_nb_buffers(&mut self, val: usize) {
        self.nb_buffers = val;
    }

    /// Set the data size of each buffer.
    pub fn set_buffer_size(&mut self, val: usize) {
        assert!(val > 0);
        self.buffer_size = val;
    }

    /// Enable or disable eviction of lower priority messages.
    pub fn set_evict_on_exhaustion(&mut self, val: bool) {
        self.evict_on_exhaustion = val;
    }
}

impl Default for PoolConf {
    fn default() -> Self {
        Self {
            nb_buffers: Self::NB_BUFFERS,
            buffer_size: Self::BUFFER_SIZE,
            evict_on_exhaustion: false,
        }
    }
}

/// Configuration of the IPv6 core.
#[derive(Clone, Copy, Debug)]
pub struct Ip6Conf {
    /// Link MTU; datagrams above it are fragmented.
    pub link_mtu: usize,
    /// Enable IPv6 fragmentation and reassembly.
    pub fragmentation: bool,
    /// Largest datagram the reassembler will build.
    pub max_assembled_datagram_len: usize,
    /// Hop limit used when the sender does not pick one.
    pub default_hop_limit: u8,
    /// Seconds a partially reassembled datagram is kept.
    pub reassembly_timeout_secs: u8,
    /// Length of the MPL trickle interval, in milliseconds.
    pub mpl_data_message_interval_ms: u32,
    /// MPL transmissions of a buffered message on routers.
    pub mpl_router_timer_expirations: u8,
    /// MPL transmissions of a buffered message on children.
    pub mpl_child_timer_expirations: u8,
    /// Seconds an MPL seed set entry lives.
    pub mpl_seed_entry_lifetime: u8,
    /// Drop locator and echo request traffic before it reaches the host.
    pub receive_filter: bool,
    /// Seed of the non-cryptographic random source.
    pub rand_seed: u64,
}

impl Ip6Conf {
    /// The IPv6 minimum MTU.
    pub const LINK_MTU: usize = 1280;
    /// Default largest reassembled datagram.
    pub const MAX_ASSEMBLED_DATAGRAM_LEN: usize = 4096;
    /// Default hop limit.
    pub const DEFAULT_HOP_LIMIT: u8 = 64;
    /// Default reassembly timeout.
    pub const REASSEMBLY_TIMEOUT_SECS: u8 = 60;
    /// Default MPL trickle interval.
    pub const MPL_DATA_MESSAGE_INTERVAL_MS: u32 = 64;
    /// Default MPL transmissions on routers.
    pub const MPL_ROUTER_TIMER_EXPIRATIONS: u8 = 2;
    /// Default MPL transmissions on children.
    pub const MPL_CHILD_TIMER_EXPIRATIONS: u8 = 0;
    /// Default MPL seed set entry lifetime.
    pub const MPL_SEED_ENTRY_LIFETIME: u8 = 5;
    /// Default random seed.
    pub const RAND_SEED: u64 = 0x5eed_1e55_c0ff_ee00;

    /// Create a configuration holding the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the link MTU.
    pub fn set_link_mtu(&mut self, val: usize) {
        self.link_mtu = val;
    }

    /// Enable or disable fragmentation.
    pub fn set_fragmentation(&mut self, val: bool) {
        self.fragmentation = val;
    }

    /// Set the largest reassembled datagram.
    pub fn set_max_assembled_datagram_len(&mut self, val: usize) {
        self.max_assembled_datagram_len = val;
    }

    /// Set the default hop limit.
    pub fn set_default_hop_limit(&mut self, val: u8) {
        self.default_hop_limit = val;
    }

    /// Set the reassembly timeout.
    pub fn set_reassembly_timeout_secs(&mut self, val: u8) {
        self.reassembly_timeout_secs = val;
    }

    /// Set the MPL trickle interval.
    pub fn set_mpl_data_message_interval_ms(&mut self, val: u32) {
        self.mpl_data_message_interval_ms = val;
    }

    /// Set the MPL transmissions on routers.
    pub fn set_mpl_router_timer_expirations(&mut self, val: u8) {
        self.mpl_router_timer_expirations = val;
    }

    /// Set the MPL transmissions on children.
    pub fn set_mpl_child_timer_expirations(&mut self, val: u8) {
        self.mpl_child_timer_expirations = val;
    }

    /// Set the MPL seed set entry lifetime.
    pub fn set_mpl_seed_entry_lifetime(&mut self, val: u8) {
        self.mpl_seed_entry_lifetime = val;
    }

    /// Enable or disable the host receive filter.
    pub fn set_receive_filter(&mut self, val: bool) {
        self.receive_filter = val;
    }

    /// Set the random seed.
    pub fn set_rand_seed(&mut self, val: u64) {
        self.rand_seed = val;
    }

    /// Largest datagram accepted by the receive path.
    pub fn max_datagram_len(&self) -> usize {
        if self.fragmentation {
            self.max_assembled_datagram_len.max(self.link_mtu)
        } else {
            self.link_mtu
        }
    }
}

impl Default for Ip6Conf {
    fn default() -> Self {
        Self {
            link_mtu: Self::LINK_MTU,
            fragmentation: true,
            max_assembled_datagram_len: Self::MAX_ASSEMBLED_DATAGRAM_LEN,
            default_hop_limit: Self::DEFAULT_HOP_LIMIT,
            reassembly_timeout_secs: Self::REASSEMBLY_TIMEOUT_SECS,
            mpl_data_message_interval_ms: Self::MPL_DATA_MESSAGE_INTERVAL_MS,
            mpl_router_timer_expirations: Self::MPL_ROUTER_TIMER_EXPIRATIONS,
            mpl_child_timer_expirations: Self::MPL_CHILD_TIMER_EXPIRATIONS,
            mpl_seed_entry_lifetime: Self::MPL_SEED_ENTRY_LIFETIME,
            receive_filter: false,
            rand_seed: Self::RAND_SEED,
        }
    }
}
