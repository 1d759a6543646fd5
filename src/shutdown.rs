use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// 优雅关闭管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭信号发送器
    shutdown_tx: broadcast::Sender<()>,
    /// 是否已经关闭
    is_shutdown: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx,
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 订阅关闭信号；已经关闭时返回立即触发的接收器
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        if self.is_shutdown() {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.shutdown_tx.subscribe()
    }

    /// 触发关闭，重复调用无效果
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            debug!("关闭管理器已经触发过关闭");
            return;
        }

        debug!(
            "发送关闭信号给 {} 个订阅者",
            self.shutdown_tx.receiver_count()
        );
        // 可能没有接收者
        let _ = self.shutdown_tx.send(());
        info!("关闭信号已发送");
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待Ctrl+C或SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_shutdown_reaches_subscribers() {
        let manager = ShutdownManager::new();
        let mut rx1 = manager.subscribe();
        let mut rx2 = manager.clone().subscribe();

        manager.shutdown();

        assert!(timeout(Duration::from_secs(1), rx1.recv()).await.is_ok());
        assert!(timeout(Duration::from_secs(1), rx2.recv()).await.is_ok());
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_fires_immediately() {
        let manager = ShutdownManager::new();
        manager.shutdown();
        manager.shutdown();

        let mut rx = manager.subscribe();
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_ok());
    }
}
