pub mod frames;
pub mod queue;
pub mod session;
pub mod translate;
pub mod transport;
pub mod upload;

pub use queue::{EnrichmentQueue, PendingTurn, PendingTurns};
pub use session::{ChannelSession, Delivery, SessionError, SessionSettings, SessionState};
#[cfg(any(test, feature = "testing"))]
pub use transport::{MemoryPeer, MemoryTransport};
pub use transport::{LinkEvent, SocketLink, SocketTransport, TransportError, WebSocketTransport};
pub use upload::{AttachmentUploader, BinaryUpload, HttpBinaryUpload, UploadError};
