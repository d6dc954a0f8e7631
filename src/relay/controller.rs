// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 活动主题控制器 (Active-Topic Controller)
//! 职责: 维护当前活动主题, 切换时先向旧主题发 INACTIVE 哨兵, 再广播切换通知

use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::Utc;
use tracing::{error, info, warn};

use super::envelope::{self, ControlRejection, InactiveMessage, TopicChangedNotice};
use crate::config::StreamConfig;
use crate::error::Result;
use crate::iso_timestamp;
use crate::transport::{QoS, Transport};

pub struct TopicController {
    transport: Arc<dyn Transport>,
    prefix: String,
    control_topic: String,
    active: RwLock<String>,
    // 串行化切换, 发布线程读取主题时不受影响
    switching: Mutex<()>,
}

impl TopicController {
    pub fn new(
        transport: Arc<dyn Transport>,
        prefix: &str,
        active_topic: &str,
        control_topic: &str,
    ) -> Self {
        Self {
            transport,
            prefix: prefix.to_string(),
            control_topic: control_topic.to_string(),
            active: RwLock::new(active_topic.to_string()),
            switching: Mutex::new(()),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &StreamConfig) -> Self {
        Self::new(
            transport,
            &config.video_topic_prefix,
            &config.active_topic,
            &config.control_topic,
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn control_topic(&self) -> &str {
        &self.control_topic
    }

    pub fn notification_topic(&self) -> String {
        format!("{}/notifications", self.control_topic)
    }

    pub fn active_topic(&self) -> String {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// `<prefix>/<active>`
    pub fn full_topic(&self) -> String {
        format!("{}/{}", self.prefix, self.active_topic())
    }

    /// `<prefix>/<active>/stream`
    pub fn stream_topic(&self) -> String {
        format!("{}/stream", self.full_topic())
    }

    /// 切换活动主题
    ///
    /// 顺序固定: 旧主题哨兵 → 更新状态 → 广播通知. 即使新旧主题相同也照常执行.
    pub fn change_topic(&self, new_topic: &str) -> TopicChangedNotice {
        let _switching = self
            .switching
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let old_topic = self.active_topic();
        let old_full = format!("{}/{}", self.prefix, old_topic);
        let new_full = format!("{}/{}", self.prefix, new_topic);

        self.send_inactive(&format!("{}/stream", old_full));

        *self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = new_topic.to_string();
        info!("🔀 活动主题切换: {} → {}", old_topic, new_topic);

        let notice = TopicChangedNotice {
            kind: "topic_changed".to_string(),
            old_active_topic: old_topic,
            new_active_topic: new_topic.to_string(),
            old_video_topic: old_full,
            new_video_topic: new_full,
            video_topic_prefix: self.prefix.clone(),
            timestamp: iso_timestamp(Utc::now()),
        };
        self.send_notice(&notice);
        notice
    }

    fn send_inactive(&self, stream_topic: &str) {
        if !self.transport.is_connected() {
            warn!("⚠️  总线未连接, 跳过 INACTIVE 哨兵: {}", stream_topic);
            return;
        }
        let payload = match serde_json::to_vec(&InactiveMessage::new(Utc::now())) {
            Ok(p) => p,
            Err(e) => {
                error!("❌ INACTIVE 哨兵序列化失败: {}", e);
                return;
            }
        };
        match self
            .transport
            .publish(stream_topic, payload, QoS::AtLeastOnce)
        {
            Ok(()) => info!("⏹️  已向 {} 发送 INACTIVE", stream_topic),
            Err(e) => error!("❌ INACTIVE 哨兵发送失败 {}: {}", stream_topic, e),
        }
    }

    fn send_notice(&self, notice: &TopicChangedNotice) {
        if !self.transport.is_connected() {
            return;
        }
        let topic = self.notification_topic();
        let payload = match serde_json::to_vec(notice) {
            Ok(p) => p,
            Err(e) => {
                error!("❌ 切换通知序列化失败: {}", e);
                return;
            }
        };
        if let Err(e) = self.transport.publish(&topic, payload, QoS::AtLeastOnce) {
            error!("❌ 切换通知发送失败 {}: {}", topic, e);
        }
    }

    /// 处理控制主题上的一条消息; 格式不对只记警告
    pub fn handle_control_message(&self, payload: &[u8]) -> Option<TopicChangedNotice> {
        match envelope::parse_control_command(payload) {
            Ok(topic) => {
                info!("📨 控制命令: controlTopic={}", topic);
                Some(self.change_topic(&topic))
            }
            Err(ControlRejection::NotJson(e)) => {
                warn!("⚠️  控制消息不是合法JSON: {}", e);
                None
            }
            Err(ControlRejection::MissingTopic) => {
                warn!("⚠️  控制消息缺少 controlTopic 字符串字段, 忽略");
                None
            }
        }
    }

    /// 订阅控制主题
    pub fn subscribe_control(self: &Arc<Self>) -> Result<()> {
        // 总线持有回调, 回调只持有弱引用
        let weak: Weak<Self> = Arc::downgrade(self);
        self.transport.subscribe(
            &self.control_topic,
            Arc::new(move |_topic: &str, payload: &[u8]| {
                if let Some(controller) = weak.upgrade() {
                    controller.handle_control_message(payload);
                }
            }),
        )?;
        info!("🎛️  监听控制主题: {}", self.control_topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::envelope::StreamMessage;
    use crate::transport::MemoryBus;

    fn setup() -> (Arc<MemoryBus>, Arc<TopicController>) {
        let bus = Arc::new(MemoryBus::new());
        let controller = Arc::new(TopicController::new(
            bus.clone(),
            "video/esp32",
            "aircanada",
            "video/esp32/control",
        ));
        (bus, controller)
    }

    #[test]
    fn test_topics() {
        let (_bus, c) = setup();
        assert_eq!(c.full_topic(), "video/esp32/aircanada");
        assert_eq!(c.stream_topic(), "video/esp32/aircanada/stream");
        assert_eq!(c.notification_topic(), "video/esp32/control/notifications");
    }

    #[test]
    fn test_change_topic_order() {
        let (bus, c) = setup();
        let notice = c.change_topic("westjet");

        let msgs = bus.messages();
        assert_eq!(msgs.len(), 2);

        assert_eq!(msgs[0].topic, "video/esp32/aircanada/stream");
        assert_eq!(msgs[0].qos, QoS::AtLeastOnce);
        assert!(matches!(
            StreamMessage::parse(&msgs[0].payload),
            Some(StreamMessage::Inactive(_))
        ));

        assert_eq!(msgs[1].topic, "video/esp32/control/notifications");
        let doc: TopicChangedNotice = serde_json::from_slice(&msgs[1].payload).unwrap();
        assert_eq!(doc, notice);
        assert_eq!(doc.old_active_topic, "aircanada");
        assert_eq!(doc.new_active_topic, "westjet");
        assert_eq!(doc.old_video_topic, "video/esp32/aircanada");
        assert_eq!(doc.new_video_topic, "video/esp32/westjet");
        assert_eq!(doc.video_topic_prefix, "video/esp32");

        assert_eq!(c.stream_topic(), "video/esp32/westjet/stream");
    }

    #[test]
    fn test_sentinel_sent_before_state_changes() {
        let (bus, c) = setup();
        // 哨兵送达时观察到的仍是旧主题
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let weak = Arc::downgrade(&c);
        bus.subscribe(
            "video/esp32/aircanada/stream",
            Arc::new(move |_t: &str, _p: &[u8]| {
                if let Some(c) = weak.upgrade() {
                    sink.lock().unwrap().push(c.active_topic());
                }
            }),
        )
        .unwrap();

        c.change_topic("westjet");
        assert_eq!(*observed.lock().unwrap(), vec!["aircanada".to_string()]);
    }

    #[test]
    fn test_repeated_changes() {
        let (bus, c) = setup();
        c.change_topic("a");
        c.change_topic("a");
        let sentinels: Vec<String> = bus
            .messages()
            .into_iter()
            .filter(|m| m.topic.ends_with("/stream"))
            .map(|m| m.topic)
            .collect();
        assert_eq!(
            sentinels,
            vec!["video/esp32/aircanada/stream", "video/esp32/a/stream"]
        );
        assert_eq!(bus.messages_on("video/esp32/control/notifications").len(), 2);
    }

    #[test]
    fn test_control_message_via_bus() {
        let (bus, c) = setup();
        c.subscribe_control().unwrap();

        bus.inject("video/esp32/control", br#"{"controlTopic":"westjet"}"#);
        assert_eq!(c.active_topic(), "westjet");

        bus.clear();
        bus.inject("video/esp32/control", br#"{"controlTopic":7}"#);
        bus.inject("video/esp32/control", b"not json");
        bus.inject("video/esp32/control", br#"{"other":"x"}"#);
        assert_eq!(c.active_topic(), "westjet");
        assert!(bus.messages().is_empty());
    }

    #[test]
    fn test_disconnected_change_skips_messages() {
        let (bus, c) = setup();
        bus.set_connected(false);
        c.change_topic("westjet");
        assert!(bus.messages().is_empty());
        assert_eq!(c.active_topic(), "westjet");
    }

    #[test]
    fn test_publish_failure_does_not_block_change() {
        let (bus, c) = setup();
        bus.set_fail_publish(true);
        c.change_topic("westjet");
        assert_eq!(c.active_topic(), "westjet");
    }
}
