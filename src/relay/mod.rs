// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 中继系统 (Relay)
///
/// 帧从读取线程出发, 经发布器送到当前活动主题
/// - envelope:   线上消息格式
/// - publisher:  带背压的发布器 (在途上限, 超出即丢)
/// - controller: 活动主题控制器 (哨兵 + 切换通知)
/// - streamer:   会话生命周期与管理接口
pub mod controller;
pub mod envelope;
pub mod publisher;
pub mod streamer;

pub use controller::TopicController;
pub use envelope::{InactiveMessage, StreamMessage, TopicChangedNotice};
pub use publisher::{FramePublisher, PublishOutcome};
pub use streamer::{SessionEnd, StreamStatus, Streamer};
