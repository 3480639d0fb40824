#![warn(missing_docs)]
//! Host-authoritative state replication for the arena.
//!
//! Records travel as delimited text (`TAG|field|...`) over a best-effort
//! transport. Oversize records are chunked, inbound records are routed to the
//! host or client reaction for the local role, and the host periodically
//! pushes priority-ordered incremental and full entity state.

pub mod chunking;
pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod dedup;
pub mod entity_replication;
pub mod error;
pub mod events;
pub mod host;
pub mod host_sync;
pub mod pending;
pub mod prediction;
pub mod protocol;
pub mod registry;
pub mod roster;
pub mod session;
pub mod transport;
pub mod validation;

pub use chunking::{
    ChunkEndOutcome, ChunkTable, Chunker, CHUNK_ENVELOPE_OVERHEAD, MAX_CHUNK_PARTS,
};
pub use codec::{decode, encode};
pub use config::{ReplicationConfig, SyncConfig};
pub use context::{DispatchStats, Outbound, ReplicationContext};
pub use dedup::DedupWindow;
pub use entity_replication::{ReplicatedEntity, ReplicationStore, UpsertOutcome};
pub use error::NetError;
pub use events::ReplicationEvent;
pub use host::PLAYER_MAX_HEALTH;
pub use host_sync::{HostSynchronizer, SyncMetrics, SyncReport};
pub use pending::{PendingSend, PendingSends, RetryReport, SendClass, Target};
pub use prediction::{EntityInterpolator, ShotPredictor};
pub use protocol::{
    EntityPositionRecord, EntityStateRecord, Message, MessageKind, DEFAULT_MAX_PAYLOAD,
};
pub use registry::{MessageDescriptor, MessageRegistry};
pub use roster::{PlayerRoster, PlayerSlot};
pub use session::{PeerSession, TickReport};
pub use transport::{
    LoopbackConfig, LoopbackNetwork, LoopbackStats, LoopbackTransport, SessionInfo, Transport,
};
pub use validation::{reconcile_entity_list, ValidationReport};
