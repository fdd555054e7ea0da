//! 订阅复用
//!
//! 同一主体的多个订阅方共用一个存储侧监听器

pub mod multiplexer;

pub use multiplexer::{SubscriptionHandle, SubscriptionMultiplexer};
