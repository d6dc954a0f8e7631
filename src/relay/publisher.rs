// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 带背压的发布器 (Backpressure-Aware Publisher)
//! 职责: 读取线程提交 → 发送线程发布 → 归还在途名额
//!
//! 在途数达到上限时新消息直接丢弃, 不排队也不重试;
//! 调用方永远不会等待网络.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, error, warn};

use super::controller::TopicController;
use super::envelope;
use crate::stream::{Frame, PublishCounters};
use crate::transport::{QoS, Transport};

/// 一次发布请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// 已交给发送线程
    Submitted,
    /// 在途已满, 丢弃
    Dropped,
    /// 总线未连接, 跳过
    NotConnected,
    /// 发送线程已退出
    Closed,
}

struct PublishJob {
    topic: String,
    payload: Vec<u8>,
    qos: QoS,
}

pub struct FramePublisher {
    transport: Arc<dyn Transport>,
    counters: Arc<PublishCounters>,
    max_in_flight: usize,
    jobs: Option<Sender<PublishJob>>,
    worker: Option<JoinHandle<()>>,
}

impl FramePublisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        counters: Arc<PublishCounters>,
        max_in_flight: usize,
    ) -> Self {
        // 队列长度受在途上限约束, 不会无限增长
        let (tx, rx) = unbounded::<PublishJob>();
        let worker_transport = transport.clone();
        let worker_counters = counters.clone();

        let worker = std::thread::Builder::new()
            .name("relay-publisher".into())
            .spawn(move || {
                for job in rx {
                    let result = worker_transport.publish(&job.topic, job.payload, job.qos);
                    worker_counters.release();
                    if let Err(e) = result {
                        error!("❌ 发布到 {} 失败: {}", job.topic, e);
                    }
                }
                debug!("发送线程退出");
            });

        let (jobs, worker) = match worker {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(e) => {
                error!("❌ 发送线程启动失败: {}", e);
                (None, None)
            }
        };

        Self {
            transport,
            counters,
            max_in_flight: max_in_flight.max(1),
            jobs,
            worker,
        }
    }

    pub fn counters(&self) -> &Arc<PublishCounters> {
        &self.counters
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// 提交一条消息, 立即返回
    pub fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> PublishOutcome {
        if !self.transport.is_connected() {
            return PublishOutcome::NotConnected;
        }

        if !self.counters.try_acquire(self.max_in_flight) {
            self.counters.record_dropped();
            return PublishOutcome::Dropped;
        }

        let Some(jobs) = self.jobs.as_ref() else {
            self.counters.release();
            return PublishOutcome::Closed;
        };

        let job = PublishJob {
            topic: topic.to_string(),
            payload,
            qos,
        };
        match jobs.send(job) {
            Ok(()) => {
                self.counters.record_published();
                PublishOutcome::Submitted
            }
            Err(_) => {
                self.counters.release();
                warn!("⚠️  发送线程已退出, 丢弃 {}", topic);
                PublishOutcome::Closed
            }
        }
    }

    /// 发布一帧到当前活动主题; 主题在调用时解析一次
    pub fn publish_frame(&self, frame: &Frame, topics: &TopicController) -> PublishOutcome {
        let topic = topics.stream_topic();
        self.publish(&topic, envelope::encode_frame(frame), QoS::AtMostOnce)
    }

    /// 等待在途发布全部完成 (测试 / 退出前使用)
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.counters.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl Drop for FramePublisher {
    fn drop(&mut self) {
        // 关闭队列, 发送线程处理完剩余任务后退出
        self.jobs.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RelayError, Result};
    use crate::transport::{MemoryBus, MessageHandler};
    use crossbeam_channel::{bounded, Receiver};
    use std::sync::Mutex;

    /// 每次发布都要等测试放行
    struct GatedTransport {
        gate: Receiver<()>,
        sent: Mutex<Vec<String>>,
    }

    impl Transport for GatedTransport {
        fn publish(&self, topic: &str, _payload: Vec<u8>, _qos: QoS) -> Result<()> {
            self.gate
                .recv()
                .map_err(|_| RelayError::Transport("gate closed".into()))?;
            self.sent.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        fn subscribe(&self, _topic: &str, _handler: MessageHandler) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_second_publish_dropped_while_first_in_flight() {
        let (open, gate) = bounded(0);
        let transport = Arc::new(GatedTransport {
            gate,
            sent: Mutex::new(Vec::new()),
        });
        let counters = PublishCounters::new();
        let publisher = FramePublisher::new(transport.clone(), counters.clone(), 1);

        assert_eq!(
            publisher.publish("t", vec![1], QoS::AtMostOnce),
            PublishOutcome::Submitted
        );
        assert_eq!(
            publisher.publish("t", vec![2], QoS::AtMostOnce),
            PublishOutcome::Dropped
        );
        assert_eq!(counters.dropped(), 1);
        assert_eq!(counters.in_flight(), 1);

        open.send(()).unwrap();
        assert!(publisher.wait_idle(Duration::from_secs(5)));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);

        assert_eq!(
            publisher.publish("t", vec![3], QoS::AtMostOnce),
            PublishOutcome::Submitted
        );
        open.send(()).unwrap();
        assert!(publisher.wait_idle(Duration::from_secs(5)));
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
        assert_eq!(counters.dropped(), 1);
        assert_eq!(counters.published(), 2);
    }

    #[test]
    fn test_failed_publish_releases_slot() {
        let bus = Arc::new(MemoryBus::new());
        bus.set_fail_publish(true);
        let counters = PublishCounters::new();
        let publisher = FramePublisher::new(bus.clone(), counters.clone(), 1);

        assert_eq!(
            publisher.publish("t", vec![1], QoS::AtMostOnce),
            PublishOutcome::Submitted
        );
        assert!(publisher.wait_idle(Duration::from_secs(5)));
        assert_eq!(counters.in_flight(), 0);
        assert!(bus.messages().is_empty());

        bus.set_fail_publish(false);
        assert_eq!(
            publisher.publish("t", vec![2], QoS::AtMostOnce),
            PublishOutcome::Submitted
        );
        assert!(publisher.wait_idle(Duration::from_secs(5)));
        assert_eq!(bus.messages().len(), 1);
    }

    #[test]
    fn test_disconnected_is_skipped_not_dropped() {
        let bus = Arc::new(MemoryBus::new());
        bus.set_connected(false);
        let counters = PublishCounters::new();
        let publisher = FramePublisher::new(bus.clone(), counters.clone(), 1);

        assert_eq!(
            publisher.publish("t", vec![1], QoS::AtMostOnce),
            PublishOutcome::NotConnected
        );
        assert_eq!(counters.dropped(), 0);
        assert_eq!(counters.published(), 0);
        assert_eq!(counters.in_flight(), 0);
    }

    #[test]
    fn test_publish_frame_uses_current_topic() {
        let bus = Arc::new(MemoryBus::new());
        let controller = TopicController::new(bus.clone(), "video/esp32", "aircanada", "ctl");
        let publisher = FramePublisher::new(bus.clone(), PublishCounters::new(), 1);

        let frame = Frame {
            id: 7,
            timestamp: chrono::Utc::now(),
            data: Arc::new(vec![0xFF, 0xD8, 0xFF, 0xD9]),
        };
        publisher.publish_frame(&frame, &controller);
        assert!(publisher.wait_idle(Duration::from_secs(5)));

        let msgs = bus.messages_on("video/esp32/aircanada/stream");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].qos, QoS::AtMostOnce);
        let env = envelope::decode_frame(&msgs[0].payload).unwrap();
        assert_eq!(env.frame_id, "7");
        assert_eq!(env.data, frame.bytes());
    }
}
