//! 消息代理集成层核心领域模型
//!
//! 包含主题、线路消息、身份派生、凭证声明、nkey密钥对等
//! 纯协议类型和逻辑，不依赖任何 I/O。

pub mod chat;
pub mod credential;
pub mod errors;
pub mod identity;
pub mod message;
pub mod nkeys;
pub mod presence;
pub mod subject;
pub mod trace;

// 重新导出常用类型
pub use chat::*;
pub use credential::*;
pub use errors::*;
pub use identity::*;
pub use message::*;
pub use presence::*;
pub use trace::*;
