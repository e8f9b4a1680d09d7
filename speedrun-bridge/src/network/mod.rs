//! Network Layer
//!
//! Everything that talks to the remote match service: the persistent
//! Socket.IO event channel and the REST calls around it.

pub mod api;
pub mod channel;
pub mod packet;
pub mod protocol;

pub use api::{ApiError, HttpMatchApi, MatchApi, PlayerProfile, ServerVersion};
pub use channel::{ChannelError, ServiceLink, ServiceLinkEvent, ServicePort};
pub use packet::{EnginePacket, PacketError, SocketPacket};
pub use protocol::{MatchResultInfo, MatchStartInfo, PairedInfo, ServiceEmit, ServiceInbound};
