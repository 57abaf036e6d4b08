//! 缓冲池配置。
//!
//! # 模块定位（Why）
//! - 把原本散落在编译期宏里的参数（描述符数量、中断预留阈值、诊断开关、告警水位）收拢为一个可序列化的结构，
//!   使宿主既能在代码里用 builder 组装，也能从 TOML 配置文件加载。
//! - [`IntegrityMode`] 取代“编译期 sanity 开关”，以运行期标志暴露同样的两种行为模式。
//!
//! # 契约说明（What）
//! - 所有字段都有默认值，TOML 中缺省的键取默认；未知键视为配置错误，避免拼写错误被静默忽略。
//! - [`PoolConfig::validate`] 是池构建前的唯一校验点，失败时不会产生任何池状态。

use serde::Deserialize;

use crate::error::PoolInitError;

/// 中断上下文获取描述符时必须保留的最小空闲数量。
pub const DEFAULT_INTERRUPT_RESERVE: usize = 3;

/// 默认描述符数量。
pub const DEFAULT_CAPACITY: usize = 64;

/// 单个缓冲的默认字节数：一帧以太网报文外加少量头部余量。
pub const DEFAULT_BUFFER_SIZE: usize = 1536;

/// 默认低水位：空闲数量降到该值及以下时发出“余量不足”事件。
pub const DEFAULT_LOW_WATERMARK: usize = 2;

/// 句柄索引使用 `u32`，并保留一个值作为“无链接”哨兵。
pub const MAX_CAPACITY: usize = (u32::MAX - 1) as usize;

/// 完整性检查模式。
///
/// # 教案式说明
/// - **意图 (Why)**：诊断构建需要在每次获取/释放时验证句柄归属并输出水位告警；
///   性能构建则信任调用方，省去这部分开销。两种模式之间的差异是一条显式、文档化的信任边界。
/// - **契约 (What)**：
///   - `Checked`：校验句柄的池标签与槽位索引，并启用水位遥测；
///   - `Trusting`：只要索引落在槽位数组内即视为有效，遥测关闭；
///   - 两种模式下重复释放检测始终生效，因为它属于释放操作本身。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityMode {
    #[default]
    Checked,
    Trusting,
}

impl IntegrityMode {
    /// 是否执行句柄归属校验与遥测。
    pub fn is_checked(self) -> bool {
        matches!(self, IntegrityMode::Checked)
    }
}

/// 迟滞告警的一对水位。
///
/// - `low`：空闲数量 `<= low` 时进入“低”状态；
/// - `high`：处于“低”状态时，空闲数量 `>= high` 才恢复。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Watermarks {
    pub low: usize,
    pub high: usize,
}

impl Watermarks {
    pub fn new(low: usize, high: usize) -> Self {
        Self { low, high }
    }

    /// 依据容量推导默认水位：低水位为 2，高水位取容量的一半。
    ///
    /// 容量过小时低水位压到 `capacity - 1`，高水位至少为 `low + 1`，
    /// 保证迟滞区间始终存在且高水位可达。
    pub fn for_capacity(capacity: usize) -> Self {
        let low = DEFAULT_LOW_WATERMARK.min(capacity.saturating_sub(1));
        let high = ((5 * capacity) / 10).max(low + 1);
        Self { low, high }
    }
}

/// 缓冲池配置。
///
/// # 契约说明（What）
/// - `capacity`：描述符数量 N，池建立后不可变；
/// - `buffer_size`：每个描述符挂载的存储字节数，池为单一尺寸；
/// - `interrupt_reserve`：中断上下文获取要求计数器当前值**严格大于**该阈值；
/// - `integrity`：见 [`IntegrityMode`]；
/// - `watermarks`：缺省时按 [`Watermarks::for_capacity`] 推导。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub capacity: usize,
    pub buffer_size: usize,
    pub interrupt_reserve: usize,
    pub integrity: IntegrityMode,
    pub watermarks: Option<Watermarks>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            buffer_size: DEFAULT_BUFFER_SIZE,
            interrupt_reserve: DEFAULT_INTERRUPT_RESERVE,
            integrity: IntegrityMode::default(),
            watermarks: None,
        }
    }
}

impl PoolConfig {
    /// 以指定容量创建配置，其余字段取默认。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn interrupt_reserve(mut self, reserve: usize) -> Self {
        self.interrupt_reserve = reserve;
        self
    }

    pub fn integrity(mut self, mode: IntegrityMode) -> Self {
        self.integrity = mode;
        self
    }

    pub fn watermarks(mut self, low: usize, high: usize) -> Self {
        self.watermarks = Some(Watermarks::new(low, high));
        self
    }

    /// 从 TOML 文本解析配置，并立即校验。
    ///
    /// ```toml
    /// capacity = 32
    /// interrupt_reserve = 3
    /// integrity = "trusting"
    ///
    /// [watermarks]
    /// low = 2
    /// high = 16
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, PoolInitError> {
        let config: PoolConfig =
            toml::from_str(text).map_err(|err| PoolInitError::InvalidConfig {
                reason: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// 实际生效的水位：显式配置优先，否则按容量推导。
    pub fn resolved_watermarks(&self) -> Watermarks {
        self.watermarks
            .unwrap_or_else(|| Watermarks::for_capacity(self.capacity))
    }

    /// 校验配置能否建立计数器与槽位数组。
    pub fn validate(&self) -> Result<(), PoolInitError> {
        if self.capacity == 0 {
            return Err(PoolInitError::EmptyPool);
        }
        if self.capacity > MAX_CAPACITY {
            return Err(PoolInitError::CapacityOverflow {
                requested: self.capacity,
            });
        }
        let marks = self.resolved_watermarks();
        // 高水位超过容量时空闲数永远到不了它，“恢复”事件将不可达。
        if marks.low >= marks.high || marks.high > self.capacity {
            return Err(PoolInitError::InvalidWatermarks {
                low: marks.low,
                high: marks.high,
            });
        }
        Ok(())
    }
}
