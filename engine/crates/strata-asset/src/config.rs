use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// 组合模型的 slot 何时 finalize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelJoin {
    /// 所有 mesh 与 texture 都 ready 或 failed 之后
    #[default]
    AllSubresources,
    /// 只等待 mesh，texture 在模型 ready 之后继续流送
    MeshesOnly,
}

/// 资源流送的配置
///
/// 所有字段都有默认值，TOML 中可以只写需要覆盖的部分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// 后台 worker 数量，None 表示使用硬件并发数
    pub worker_threads: Option<usize>,

    /// 阻塞加载时每次 tick 之间的 sleep 时长（毫秒）
    pub blocking_poll_interval_ms: u64,

    /// 预先创建的 semaphore / fence 数量，也是池中最多保留的数量
    pub sync_pool_capacity: usize,

    /// texture 上传时是否生成完整的 mip 链
    pub generate_mips: bool,

    pub model_join: ModelJoin,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            blocking_poll_interval_ms: 1,
            sync_pool_capacity: 8,
            generate_mips: true,
            model_join: ModelJoin::default(),
        }
    }
}

impl StreamConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).with_context(|| format!("读取配置文件失败: {:?}", path.as_ref()))?;

        Self::from_toml_str(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path.as_ref()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: StreamConfig = toml::from_str(content)?;
        anyhow::ensure!(config.worker_threads != Some(0), "worker_threads 不能为 0");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("序列化配置失败")
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4))
    }

    #[inline]
    pub fn blocking_poll_interval(&self) -> Duration {
        Duration::from_millis(self.blocking_poll_interval_ms)
    }
}
