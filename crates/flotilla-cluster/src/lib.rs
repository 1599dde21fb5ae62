//! flotilla-cluster — cluster membership for Flotilla.
//!
//! Wraps an eventually-consistent gossip transport behind one `Cluster`
//! trait, adds bootstrap (finding peers to join) and rendezvous hashing
//! (deciding which peer owns a key).
//!
//! # Architecture
//!
//! ```text
//! Cluster (trait: local, members, get, get_n, shutdown)
//!   ├── LiveCluster     → reads the gossip membership table
//!   │     ├── events()  → EventStream (joins, leaves, deploy announcements)
//!   │     └── publish() → broadcasts DeployEvents
//!   ├── CachedCluster   → memoizes another view for a TTL
//!   ├── PendingCluster  → empty placeholder until assign()
//!   └── StaticCluster   → fixed list (tests, single node)
//!
//! Bootstrap
//!   └── PeeringStrategy* → candidate addrs → Gossip::join (retry + backoff)
//!
//! Gossip (trait) ← MemoryNetwork / MemoryGossip for in-process fleets
//! ```

pub mod bootstrap;
pub mod cached;
pub mod error;
pub mod fixed;
pub mod gossip;
pub mod live;
pub mod membership;
pub mod memory;
pub mod pending;
pub mod rendezvous;

pub use bootstrap::{Bootstrap, PeeringStrategy, StaticPeers};
pub use cached::{CachedCluster, Memo};
pub use error::{BootstrapError, ClusterError, ClusterResult, GossipError};
pub use fixed::StaticCluster;
pub use gossip::{Gossip, GossipEvent, GossipNode, NodeMeta, NodeState};
pub use live::LiveCluster;
pub use membership::{Cluster, ClusterEvent, ClusterMessage, EventSource, EventStream};
pub use memory::{MemoryGossip, MemoryNetwork};
pub use pending::PendingCluster;
