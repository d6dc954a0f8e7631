// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 摄像头MJPEG中继服务
///
/// 摄像头 HTTP MJPEG → 切帧 → MQTT 活动主题 (+ 可选的人员检测)
///
/// 直接运行: cargo run --bin relay --release -- --config relay.json
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select};
use tracing::{error, info, warn};

use camera_relay::config::{Args, RelayConfig};
use camera_relay::relay::{SessionEnd, Streamer};
use camera_relay::telemetry::init_tracing;
use camera_relay::transport::{MqttTransport, Transport};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("❌ {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<i32> {
    let config = RelayConfig::from_args(&args);

    info!("📹 摄像头: {}", config.camera_url());
    info!("📡 Broker: {}", config.broker.host);
    info!(
        "🎯 活动主题: {}/{}/stream",
        config.relay.video_topic_prefix, config.relay.active_topic
    );
    info!("🎛️  控制主题: {}", config.relay.control_topic);

    let transport =
        Arc::new(MqttTransport::connect(&config.broker).context("MQTT 客户端创建失败")?);
    if !transport.wait_connected(Duration::from_secs(10)) {
        warn!("⚠️  MQTT broker 暂未连接, 后台继续重试");
    }
    let transport: Arc<dyn Transport> = transport;

    let mut streamer = Streamer::new(&config, transport.clone());

    let want_detection = args.detect || config.detection.model_path.is_some();
    if want_detection {
        streamer = attach_detection(streamer, &config, transport.clone())?;
    }

    streamer
        .controller()
        .subscribe_control()
        .context("订阅控制主题失败")?;

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("Ctrl-C 处理器注册失败")?;

    let events = streamer.session_events();
    if let Err(e) = streamer.start() {
        error!("❌ 视频流启动失败: {}", e);
        return Ok(1);
    }

    let code = select! {
        recv(stop_rx) -> _ => {
            info!("🛑 收到退出信号");
            0
        }
        recv(events) -> end => match end {
            Ok(SessionEnd { error: Some(e), .. }) => {
                error!("❌ 视频流会话异常结束: {}", e);
                1
            }
            _ => {
                info!("📴 视频流会话结束");
                0
            }
        },
    };

    streamer.stop();
    if !streamer.publisher().wait_idle(Duration::from_secs(2)) {
        warn!("⚠️  仍有未完成的发布, 直接退出");
    }
    let status = streamer.status();
    info!(
        "📊 共发布 {} 帧, 丢弃 {} 帧",
        status.frames_published, status.dropped_frames
    );
    Ok(code)
}

#[cfg(feature = "onnx")]
fn attach_detection(
    streamer: Streamer,
    config: &RelayConfig,
    transport: Arc<dyn Transport>,
) -> Result<Streamer> {
    use camera_relay::detection::analytics::{frame_channel, AnalyticsWorker};
    use camera_relay::detection::Detector;
    use camera_relay::relay::FramePublisher;
    use camera_relay::stream::PublishCounters;

    // 模型加载失败是致命错误
    let detector = Detector::from_config(&config.detection).context("检测模型初始化失败")?;
    info!(
        "🧠 检测已启用: {} (置信度 {}, IoU {}, 类别 {:?})",
        detector.model_name(),
        config.detection.confidence_threshold,
        config.detection.iou_threshold,
        config.detection.labels
    );

    let (tx, rx) = frame_channel();
    let publisher = FramePublisher::new(transport, PublishCounters::new(), 1);
    // 线程随帧通道关闭而退出, 不单独等待
    let _worker = AnalyticsWorker::spawn(
        detector,
        rx,
        publisher,
        streamer.controller().clone(),
        config.detection.analytics_topic.clone(),
    )?;
    Ok(streamer.with_frame_tap(tx))
}

#[cfg(not(feature = "onnx"))]
fn attach_detection(
    streamer: Streamer,
    _config: &RelayConfig,
    _transport: Arc<dyn Transport>,
) -> Result<Streamer> {
    warn!("⚠️  未启用 onnx 特性, 忽略检测配置");
    Ok(streamer)
}
