//! 基础设施层：消息代理的具体实现
//!
//! 在 Redis 之上实现应用层定义的抽象：Pub/Sub 客户端（发布、
//! 通配符订阅、消费组、请求/响应）、持久化流、RPC 传输分发和
//! 最后在线时间存储。

pub mod client;
pub mod connection;
pub mod error;
pub mod last_seen;
pub mod stream;
pub mod transport;

pub use client::{BrokerClient, Subscription, SubscriptionHandler};
pub use connection::BrokerConnection;
pub use error::{BrokerError, BrokerResult};
pub use last_seen::RedisLastSeenStore;
pub use stream::{stream_key, StreamConsumer, StreamHandler};
pub use transport::{reply_payload, BrokerTransport};
