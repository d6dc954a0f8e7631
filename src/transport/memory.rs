// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 进程内消息总线
/// In-process topic bus: exact-match subscriptions, synchronous delivery, message log
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

use super::{MessageHandler, QoS, Transport};
use crate::error::{RelayError, Result};

/// 已发布的消息
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

pub struct MemoryBus {
    connected: AtomicBool,
    fail_publish: AtomicBool,
    subscribers: RwLock<Vec<(String, MessageHandler)>>,
    log: Mutex<Vec<BusMessage>>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            fail_publish: AtomicBool::new(false),
            subscribers: RwLock::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// 之后的 publish 全部返回错误 (不记录)
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::Release);
    }

    /// 所有已发布消息 (按发布顺序)
    pub fn messages(&self) -> Vec<BusMessage> {
        self.lock_log().clone()
    }

    /// 指定主题上的消息
    pub fn messages_on(&self, topic: &str) -> Vec<BusMessage> {
        self.lock_log()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock_log().clear();
    }

    /// 模拟外部客户端向总线注入一条消息 (不进入发布日志)
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        self.dispatch(topic, payload);
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) {
        // 先复制回调再调用, 回调内部可以再次发布
        let handlers: Vec<MessageHandler> = match self.subscribers.read() {
            Ok(subs) => subs
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, h)| h.clone())
                .collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, h)| h.clone())
                .collect(),
        };
        for handler in handlers {
            handler(topic, payload);
        }
    }

    fn lock_log(&self) -> MutexGuard<'_, Vec<BusMessage>> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MemoryBus {
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<()> {
        if !self.is_connected() {
            return Err(RelayError::Transport("总线未连接".to_string()));
        }
        if self.fail_publish.load(Ordering::Acquire) {
            return Err(RelayError::Transport(format!("发布到 {} 失败", topic)));
        }
        self.lock_log().push(BusMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
            qos,
        });
        self.dispatch(topic, &payload);
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<()> {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.push((topic.to_string(), handler));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_publish_is_logged_in_order() {
        let bus = MemoryBus::new();
        bus.publish("a", b"1".to_vec(), QoS::AtMostOnce).unwrap();
        bus.publish("b", b"2".to_vec(), QoS::AtLeastOnce).unwrap();
        let topics: Vec<String> = bus.messages().into_iter().map(|m| m.topic).collect();
        assert_eq!(topics, vec!["a", "b"]);
        assert_eq!(bus.messages_on("b")[0].qos, QoS::AtLeastOnce);
    }

    #[test]
    fn test_subscribers_get_exact_topic_only() {
        let bus = MemoryBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(
            "ctl",
            Arc::new(move |topic: &str, payload: &[u8]| {
                sink.lock().unwrap().push((topic.to_string(), payload.to_vec()));
            }),
        )
        .unwrap();

        bus.publish("ctl/notifications", b"x".to_vec(), QoS::AtLeastOnce)
            .unwrap();
        bus.inject("ctl", b"y");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("ctl".to_string(), b"y".to_vec()));
        assert!(bus.messages_on("ctl").is_empty());
    }

    #[test]
    fn test_disconnected_bus_rejects_publish() {
        let bus = MemoryBus::new();
        bus.set_connected(false);
        assert!(bus.publish("a", vec![], QoS::AtMostOnce).is_err());
        assert!(bus.messages().is_empty());
    }
}
