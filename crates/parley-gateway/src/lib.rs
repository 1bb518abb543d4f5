pub mod broadcast;
pub mod connection;
pub mod registry;
pub mod session;
pub mod topology;

pub use broadcast::{Broadcaster, Delivery};
pub use registry::{ConnectionHandle, ConnectionRegistry, Registration};
pub use session::{AuthError, SESSION_COOKIE, SessionValidator};
