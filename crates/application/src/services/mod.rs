//! 业务路由处理器

pub mod chat;
pub mod credentials_route;
pub mod presence_routes;

pub use chat::ChatMessageRoute;
pub use credentials_route::CredentialIssueRoute;
pub use presence_routes::{PresenceDisconnectRoute, PresenceHeartbeatRoute};
