//! 周期任务调度器
//!
//! 独立于请求处理运行时的显式定时组件：聚合扫描、连接心跳都
//! 挂在这里。关闭时通过 watch 通道通知所有任务退出并等待收尾。

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// 注册一个周期任务
    ///
    /// 任务在固定间隔上触发；错过的 tick 被跳过而不是补偿执行，
    /// 一次慢扫描不会在恢复后连续触发。
    pub fn spawn_recurring<F, Fut>(&mut self, name: &'static str, period: Duration, task: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // interval 的第一个 tick 立即完成，先吞掉它
            ticker.tick().await;

            info!(task = name, period_secs = period.as_secs(), "recurring task started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => task().await,
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(task = name, "recurring task stopped");
        });

        self.handles.push(handle);
    }

    /// 通知所有周期任务退出并等待它们结束
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
