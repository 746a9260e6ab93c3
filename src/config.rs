//! 搜索配置和数据结构定义
//!
//! 包含网络常量、匹配条件、批量尺寸以及与 OpenCL 内核共享的内存布局。

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, SearchError};

/// Tron 地址前缀字节 (Base58 编码后对应字符 'T')
pub const ADDRESS_PREFIX_BYTE: u8 = 0x41;

/// 完整 Base58Check 地址的首字符
pub const ADDRESS_MARKER: char = 'T';

/// 完整 Base58Check 地址长度 (字符)
pub const ENCODED_ADDRESS_LEN: usize = 34;

/// 原始地址长度: 1 字节前缀 + 20 字节 Keccak 哈希尾部
pub const RAW_ADDRESS_LEN: usize = 21;

/// 完整地址中被移除的中间段起点
pub const TRIM_OFFSET: usize = 10;

/// 完整地址中被移除的中间段长度
pub const TRIM_LEN: usize = 14;

/// 文本比较窗口宽度: 前 10 个字符 + 后 10 个字符
pub const PATTERN_WIDTH: usize = ENCODED_ADDRESS_LEN - TRIM_LEN;

/// 比较窗口中前段 (或后段) 的字符数
pub const WINDOW_HALF: usize = TRIM_OFFSET;

/// 前缀/后缀匹配数上限
pub const MAX_MATCH_COUNT: usize = 10;

/// 内核编译常量 PROFANITY_MAX_SCORE
pub const PROFANITY_MAX_SCORE: usize = PATTERN_WIDTH;

/// 生成模式允许的最大地址数
pub const MAX_GENERATE_COUNT: u64 = 10_000;

/// 单次调度最多回传的结果记录数
pub const MAX_RESULTS_PER_DISPATCH: usize = 4096;

/// 前缀/后缀匹配要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCriteria {
    /// 从地址开头起至少连续匹配的字符数
    pub prefix_count: usize,
    /// 从地址末尾起至少连续匹配的字符数
    pub suffix_count: usize,
}

impl Default for MatchCriteria {
    fn default() -> Self {
        Self {
            prefix_count: 0,
            suffix_count: 6,
        }
    }
}

impl MatchCriteria {
    pub fn new(prefix_count: usize, suffix_count: usize) -> Result<Self> {
        if prefix_count > MAX_MATCH_COUNT {
            return Err(SearchError::PrefixCountOutOfRange(prefix_count));
        }
        if suffix_count > MAX_MATCH_COUNT {
            return Err(SearchError::SuffixCountOutOfRange(suffix_count));
        }
        Ok(Self {
            prefix_count,
            suffix_count,
        })
    }

    /// 不设任何要求，任何候选地址都会被接受
    pub fn any() -> Self {
        Self {
            prefix_count: 0,
            suffix_count: 0,
        }
    }
}

/// 终止策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminationPolicy {
    /// 接受这么多个匹配后停止，0 表示不限
    pub quit_count: u64,
}

impl TerminationPolicy {
    pub fn unbounded() -> Self {
        Self { quit_count: 0 }
    }

    pub fn after(quit_count: u64) -> Self {
        Self { quit_count }
    }

    pub fn is_bounded(&self) -> bool {
        self.quit_count > 0
    }
}

/// 批量尺寸参数
///
/// 每次调度处理 `inverse_size * lanes()` 个候选:
/// 每条 lane 负责 `inverse_size` 个连续私钥，共用一次批量求逆。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizing {
    /// 本地工作组大小
    pub local_work_size: usize,
    /// 每次调度的候选数上限 (0 表示 inverse_size * inverse_multiple)
    pub work_max: usize,
    /// 每次批量求逆覆盖的候选数 B
    pub inverse_size: usize,
    /// 求逆批次的倍数 M (默认的 lane 数)
    pub inverse_multiple: usize,
}

impl Default for BatchSizing {
    fn default() -> Self {
        Self {
            local_work_size: 64,
            work_max: 0,
            inverse_size: 255,
            inverse_multiple: 16384,
        }
    }
}

impl BatchSizing {
    pub fn validate(&self) -> Result<()> {
        if self.inverse_size == 0 || self.inverse_size > u32::MAX as usize {
            return Err(SearchError::InvalidSizing(format!(
                "inverse size must be in 1..={}, got {}",
                u32::MAX,
                self.inverse_size
            )));
        }
        if self.inverse_multiple == 0 {
            return Err(SearchError::InvalidSizing(String::from(
                "inverse multiple must be greater than 0",
            )));
        }
        if self.local_work_size == 0 {
            return Err(SearchError::InvalidSizing(String::from(
                "local work size must be greater than 0",
            )));
        }
        Ok(())
    }

    /// 全局工作项数量 (lane 数)
    ///
    /// `work_max` 非零时按其限制候选总数，结果向下取整到本地工作组大小的整数倍，
    /// 至少保留一个工作组。
    pub fn lanes(&self) -> usize {
        let lanes = if self.work_max == 0 {
            self.inverse_multiple
        } else {
            self.work_max / self.inverse_size
        };
        (lanes / self.local_work_size).max(1) * self.local_work_size
    }

    /// 每次调度覆盖的候选数
    pub fn candidates_per_dispatch(&self) -> u64 {
        (self.inverse_size as u64) * (self.lanes() as u64)
    }
}

/// 匹配窗口类型 (传给内核时编码为 uint)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchWindow {
    /// Base58 地址的前 10 + 后 10 个字符
    Encoded = 0,
    /// 21 字节原始地址
    Raw = 1,
}

impl MatchWindow {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn width(self) -> usize {
        match self {
            MatchWindow::Encoded => PATTERN_WIDTH,
            MatchWindow::Raw => RAW_ADDRESS_LEN,
        }
    }
}

/// 调度配置 (传递给 GPU)
///
/// 注意：必须与 OpenCL 的 dispatch_config_t 结构体完全匹配
/// OpenCL 布局 (小端): seed ulong4 @0, lanes @32, inverse_size @36, pattern_count @40,
///              pattern_width @44, prefix_count @48, suffix_count @52, window @56, _padding @60
/// 总大小: 64 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// 起始私钥 (cl_ulong4，s[0] 为最低 64 位)
    pub seed: [u64; 4],
    pub lanes: u32,
    pub inverse_size: u32,
    pub pattern_count: u32,
    pub pattern_width: u32,
    pub prefix_count: u32,
    pub suffix_count: u32,
    pub window: u32,
}

impl DispatchConfig {
    pub const SIZE: usize = 64;

    /// 把 32 字节大端私钥转换为 cl_ulong4 布局
    pub fn seed_limbs(seed: &[u8; 32]) -> [u64; 4] {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let start = 32 - (i + 1) * 8;
            *limb = byteorder::BigEndian::read_u64(&seed[start..start + 8]);
        }
        limbs
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        LittleEndian::write_u64_into(&self.seed, &mut out[..32]);
        LittleEndian::write_u32(&mut out[32..36], self.lanes);
        LittleEndian::write_u32(&mut out[36..40], self.inverse_size);
        LittleEndian::write_u32(&mut out[40..44], self.pattern_count);
        LittleEndian::write_u32(&mut out[44..48], self.pattern_width);
        LittleEndian::write_u32(&mut out[48..52], self.prefix_count);
        LittleEndian::write_u32(&mut out[52..56], self.suffix_count);
        LittleEndian::write_u32(&mut out[56..60], self.window);
        out
    }
}

/// 单条命中记录 (从 GPU 传回)
///
/// OpenCL 布局 (小端): lane @0, offset @4, pattern @8, prefix_score @12,
///              suffix_score @16, address[21] @20, _padding[3] @41
/// 总大小: 44 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultRecord {
    pub lane: u32,
    pub offset: u32,
    pub pattern: u32,
    pub prefix_score: u32,
    pub suffix_score: u32,
    pub address: [u8; RAW_ADDRESS_LEN],
}

impl ResultRecord {
    pub const SIZE: usize = 44;

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        if bytes.len() < Self::SIZE {
            anyhow::bail!(
                "result record needs {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            );
        }
        let mut address = [0u8; RAW_ADDRESS_LEN];
        address.copy_from_slice(&bytes[20..20 + RAW_ADDRESS_LEN]);
        Ok(Self {
            lane: LittleEndian::read_u32(&bytes[0..4]),
            offset: LittleEndian::read_u32(&bytes[4..8]),
            pattern: LittleEndian::read_u32(&bytes[8..12]),
            prefix_score: LittleEndian::read_u32(&bytes[12..16]),
            suffix_score: LittleEndian::read_u32(&bytes[16..20]),
            address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_network_constants() {
        assert_eq!(PATTERN_WIDTH, 20);
        assert_eq!(TRIM_OFFSET + TRIM_LEN + WINDOW_HALF, ENCODED_ADDRESS_LEN);
        assert_eq!(PROFANITY_MAX_SCORE, 20);
    }

    #[test]
    fn test_criteria_range() {
        assert!(MatchCriteria::new(0, 0).is_ok());
        assert!(MatchCriteria::new(10, 10).is_ok());
        assert!(matches!(
            MatchCriteria::new(11, 0),
            Err(SearchError::PrefixCountOutOfRange(11))
        ));
        assert!(matches!(
            MatchCriteria::new(0, 11),
            Err(SearchError::SuffixCountOutOfRange(11))
        ));
        assert_eq!(MatchCriteria::default(), MatchCriteria::new(0, 6).unwrap());
    }

    #[test]
    fn test_sizing_defaults() {
        let sizing = BatchSizing::default();
        assert!(sizing.validate().is_ok());
        assert_eq!(sizing.lanes(), 16384);
        assert_eq!(sizing.candidates_per_dispatch(), 255 * 16384);
    }

    #[test]
    fn test_sizing_work_max_rounds_to_local() {
        let sizing = BatchSizing {
            local_work_size: 64,
            work_max: 255 * 100,
            inverse_size: 255,
            inverse_multiple: 16384,
        };
        // 100 条 lane 向下取整到 64，不超过 work_max
        assert_eq!(sizing.lanes(), 64);
        assert!(sizing.candidates_per_dispatch() <= 255 * 100);

        // 不足一个工作组时保留一个工作组
        let tiny = BatchSizing {
            work_max: 255 * 10,
            ..sizing
        };
        assert_eq!(tiny.lanes(), 64);

        let exact = BatchSizing {
            work_max: 255 * 128,
            ..sizing
        };
        assert_eq!(exact.lanes(), 128);

        let zero = BatchSizing {
            inverse_size: 0,
            ..BatchSizing::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_seed_limbs() {
        let mut seed = [0u8; 32];
        seed[31] = 0x01;
        seed[0] = 0x80;
        let limbs = DispatchConfig::seed_limbs(&seed);
        assert_eq!(limbs[0], 1);
        assert_eq!(limbs[3], 0x8000_0000_0000_0000);
    }

    #[test]
    fn test_dispatch_config_layout() {
        let config = DispatchConfig {
            seed: [1, 2, 3, 4],
            lanes: 5,
            inverse_size: 255,
            pattern_count: 7,
            pattern_width: 20,
            prefix_count: 1,
            suffix_count: 6,
            window: MatchWindow::Raw.as_u32(),
        };
        let bytes = config.to_bytes();
        assert_eq!(bytes.len(), DispatchConfig::SIZE);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[24], 4);
        assert_eq!(LittleEndian::read_u32(&bytes[36..40]), 255);
        assert_eq!(LittleEndian::read_u32(&bytes[56..60]), 1);
        assert_eq!(&bytes[60..], &[0u8; 4]);
    }

    #[test]
    fn test_result_record_parse() {
        let mut bytes = [0u8; ResultRecord::SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], 3);
        LittleEndian::write_u32(&mut bytes[4..8], 254);
        LittleEndian::write_u32(&mut bytes[12..16], 2);
        LittleEndian::write_u32(&mut bytes[16..20], 6);
        bytes[20] = ADDRESS_PREFIX_BYTE;
        bytes[40] = 0xEF;

        let record = ResultRecord::from_bytes(&bytes).unwrap();
        assert_eq!(record.lane, 3);
        assert_eq!(record.offset, 254);
        assert_eq!(record.prefix_score, 2);
        assert_eq!(record.suffix_score, 6);
        assert_eq!(record.address[0], 0x41);
        assert_eq!(record.address[20], 0xEF);

        assert!(ResultRecord::from_bytes(&bytes[..10]).is_err());
    }
}
