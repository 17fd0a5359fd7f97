//! 应用层：路由、上下文、凭证签发与在线状态
//!
//! 本层定义消息处理的编排逻辑和对外抽象（发布器、时钟、存储），
//! 不依赖具体的代理实现；基础设施层提供这些抽象的真实实现。

pub mod clock;
pub mod context;
pub mod credentials;
pub mod error;
pub mod presence;
pub mod publisher;
pub mod router;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use context::BrokerContext;
pub use credentials::{
    verify_credential, CreateUserCredential, CredentialFormat, CredentialIssuer,
};
pub use error::ApplicationError;
pub use presence::{LastSeenStore, PresenceSettings, PresenceTracker};
pub use publisher::{
    BrokerPublisher, PublishError, RequestError, RequestOptions, DEFAULT_REQUEST_TIMEOUT_MS,
};
pub use router::{demultiplex, BrokerRouter, HandlerReply, Route, RouteHandler, RouteKind};
pub use services::{
    ChatMessageRoute, CredentialIssueRoute, PresenceDisconnectRoute, PresenceHeartbeatRoute,
};
