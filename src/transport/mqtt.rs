// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// MQTT 传输
/// MQTT 3.1.1 transport with a background event pump
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use rumqttc::{Client, ConnectionError, Event, MqttOptions, Outgoing, Packet};
use tracing::{debug, error, info, warn};

use super::{MessageHandler, QoS, Transport};
use crate::config::BrokerConfig;
use crate::error::{RelayError, Result};

/// 单条消息上限 (帧可能上百KB)
const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;
/// 请求队列很短, 帧只在发送线程里等待写出, 不在客户端里排队
const REQUEST_CAPACITY: usize = 4;
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);
/// 单条消息写出的最长等待
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type Handlers = Arc<RwLock<Vec<(String, MessageHandler)>>>;

type WriteDone = Sender<std::result::Result<(), String>>;

/// 已提交、尚未写入连接的发布, 按提交顺序排列
type PendingWrites = Arc<Mutex<VecDeque<WriteDone>>>;

pub struct MqttTransport {
    client: Client,
    connected: Arc<AtomicBool>,
    handlers: Handlers,
    pending: PendingWrites,
}

impl MqttTransport {
    /// 建立客户端并启动事件线程; 实际连接在事件线程中异步完成
    pub fn connect(config: &BrokerConfig) -> Result<Self> {
        let (host, port) = parse_broker_addr(&config.host)?;
        info!("🔌 连接 MQTT broker {}:{} (client_id={})", host, port, config.client_id);

        let mut options = MqttOptions::new(config.client_id.clone(), host, port);
        options.set_credentials(config.username.clone(), config.password.clone());
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let handlers: Handlers = Arc::new(RwLock::new(Vec::new()));
        let pending: PendingWrites = Arc::new(Mutex::new(VecDeque::new()));

        let pump_client = client.clone();
        let pump_connected = connected.clone();
        let pump_handlers = handlers.clone();
        let pump_pending = pending.clone();

        // 订阅回调里可能再发布 (控制消息 → 哨兵), 不能占用事件线程
        let (inbox_tx, inbox_rx) = unbounded::<(String, Vec<u8>)>();
        let dispatch_handlers = handlers.clone();
        std::thread::Builder::new()
            .name("mqtt-dispatch".into())
            .spawn(move || {
                for (topic, payload) in inbox_rx {
                    dispatch(&dispatch_handlers, &topic, &payload);
                }
            })?;
        std::thread::Builder::new()
            .name("mqtt-event-loop".into())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            pump_connected.store(true, Ordering::Release);
                            info!("✅ MQTT broker 已连接");
                            resubscribe(&pump_client, &pump_handlers);
                        }
                        Ok(Event::Incoming(Packet::Publish(p))) => {
                            let _ = inbox_tx.send((p.topic.clone(), p.payload.to_vec()));
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            pump_connected.store(false, Ordering::Release);
                            warn!("⚠️  MQTT broker 断开连接");
                        }
                        // 发布报文已写入 socket
                        Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                            complete_next(&pump_pending);
                        }
                        Ok(_) => {}
                        Err(ConnectionError::RequestsDone) => {
                            debug!("MQTT 客户端已释放, 事件线程退出");
                            break;
                        }
                        Err(e) => {
                            pump_connected.store(false, Ordering::Release);
                            error!("❌ MQTT 连接错误: {}", e);
                            fail_pending(&pump_pending, &e.to_string());
                            std::thread::sleep(RECONNECT_PAUSE);
                        }
                    }
                }
                pump_connected.store(false, Ordering::Release);
                fail_pending(&pump_pending, "MQTT 事件线程已退出");
            })?;

        Ok(Self {
            client,
            connected,
            handlers,
            pending,
        })
    }

    /// 等待首次连接成功
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if self.is_connected() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        self.is_connected()
    }
}

fn lock_pending(pending: &PendingWrites) -> MutexGuard<'_, VecDeque<WriteDone>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 最早提交的那条发布已写出
fn complete_next(pending: &PendingWrites) {
    if let Some(done) = lock_pending(pending).pop_front() {
        // 发布方可能已超时离开
        let _ = done.send(Ok(()));
    }
}

/// 连接出错: 尚未写出的发布全部按失败结束
fn fail_pending(pending: &PendingWrites, reason: &str) {
    for done in lock_pending(pending).drain(..) {
        let _ = done.send(Err(reason.to_string()));
    }
}

fn mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
    }
}

fn resubscribe(client: &Client, handlers: &Handlers) {
    let topics: Vec<String> = match handlers.read() {
        Ok(hs) => hs.iter().map(|(t, _)| t.clone()).collect(),
        Err(poisoned) => poisoned.into_inner().iter().map(|(t, _)| t.clone()).collect(),
    };
    for topic in topics {
        // 事件线程内不能阻塞在请求队列上
        match client.try_subscribe(topic.clone(), rumqttc::QoS::AtLeastOnce) {
            Ok(()) => info!("✓ 已订阅 {}", topic),
            Err(e) => error!("❌ 订阅 {} 失败: {}", topic, e),
        }
    }
}

fn dispatch(handlers: &Handlers, topic: &str, payload: &[u8]) {
    let matched: Vec<MessageHandler> = match handlers.read() {
        Ok(hs) => hs
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
    for handler in matched {
        handler(topic, payload);
    }
}

/// 解析 `tcp://host:port` / `mqtt://host:port` / `host:port` / `host`
pub fn parse_broker_addr(addr: &str) -> Result<(String, u16)> {
    let rest = addr
        .strip_prefix("tcp://")
        .or_else(|| addr.strip_prefix("mqtt://"))
        .unwrap_or(addr)
        .trim_end_matches('/');

    if rest.is_empty() {
        return Err(RelayError::Config(format!("无效的 broker 地址: {:?}", addr)));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| RelayError::Config(format!("无效的 broker 端口: {:?}", addr)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), 1883)),
    }
}

impl Transport for MqttTransport {
    /// 阻塞到报文写入 socket 为止, 只交给客户端队列不算完成
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<()> {
        let (done_tx, done_rx) = bounded(1);
        {
            // 入队与登记在同一把锁内, 保证与事件线程看到的写出顺序一致
            let mut pending = lock_pending(&self.pending);
            self.client
                .try_publish(topic, mqtt_qos(qos), false, payload)
                .map_err(|e| RelayError::Transport(e.to_string()))?;
            pending.push_back(done_tx);
        }

        match done_rx.recv_timeout(WRITE_TIMEOUT) {
            Ok(result) => result.map_err(RelayError::Transport),
            Err(RecvTimeoutError::Timeout) => Err(RelayError::Transport(format!(
                "写入 {} 超时 ({}s)",
                topic,
                WRITE_TIMEOUT.as_secs()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(RelayError::Transport("MQTT 连接已关闭".to_string()))
            }
        }
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<()> {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((topic.to_string(), handler));

        // 未连接时只登记, ConnAck 后统一订阅
        if self.is_connected() {
            self.client
                .try_subscribe(topic, rumqttc::QoS::AtLeastOnce)
                .map_err(|e| RelayError::Transport(e.to_string()))?;
        }
        info!("📡 登记订阅: {}", topic);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
