//! Render sessions for Tether.
//!
//! A [`RenderSession`] is the server half of one connected client: it owns
//! route mounts (a [`tether_core::RenderTree`] plus a render effect each),
//! translates client messages into renders and callback dispatches, and
//! ships `vdom_init`/`vdom_update` patches back over whatever transport
//! the host wires in. The transport itself is not this crate's concern:
//! the host passes a send function to [`RenderSession::connect`] and
//! forwards inbound frames to [`RenderSession::receive`].

mod channels;
mod protocol;
mod session;

pub use channels::{Channel, ChannelsManager, RefChannel};
pub use protocol::{ClientMessage, Credentials, ErrorPayload, ServerMessage};
pub use session::{outlet, ApiResult, RenderSession, SessionClosed, SessionConfig};

pub mod prelude {
    pub use crate::{ClientMessage, RenderSession, ServerMessage, SessionConfig};
}
