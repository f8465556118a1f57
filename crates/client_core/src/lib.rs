pub mod composer;
pub mod config;
pub mod connection;
pub mod encoder;
pub mod error;
pub mod router;
pub mod session;
pub mod store;
pub mod typing;
pub mod upload;

pub use composer::{Composer, CompositionMode};
pub use config::{load_settings, ClientSettings};
pub use connection::{
    ConnectionManager, ConnectionState, Connector, ExponentialBackoff, NoReconnect,
    ReconnectPolicy, WsConnector,
};
pub use error::{ProtocolError, SessionError, StateError, TransportError, UploadError};
pub use session::{NoResync, ResyncStrategy, RoomSession, SessionHandle, SessionSnapshot};
pub use store::{Affordances, ConversationStore, LocalUser, Message, StoreChange};
pub use upload::{HttpUploader, MissingUploader, Uploader};

/// Everything a front end needs to re-render, in the order it happened.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Store(StoreChange),
    Connection(ConnectionState),
    UploadFailed {
        filename: String,
        error: UploadError,
    },
    Error(SessionError),
}
