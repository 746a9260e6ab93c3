//! 计算设备抽象
//!
//! 引擎只通过 [`ComputeDevice`] 与设备交互: 上传模式、按种子调度一批候选、取回命中记录。
//! 对种子 `s`，lane `j` 的第 `i` 个候选私钥为 `s + j * inverse_size + i`。

use secp256k1::SecretKey;

use log::warn;

use crate::config::{MAX_RESULTS_PER_DISPATCH, MatchCriteria, RAW_ADDRESS_LEN, ResultRecord};
use crate::pattern::{PatternSet, Score};

/// 工作组尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    pub local: usize,
    /// 全局工作项数量，即 lane 数
    pub global: usize,
}

/// 设备回传的一条命中
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHit {
    pub lane: u32,
    pub offset: u32,
    /// 接受该候选的模式下标
    pub pattern: u32,
    pub score: Score,
    pub address: [u8; RAW_ADDRESS_LEN],
}

impl DeviceHit {
    /// 相对种子的候选序号
    pub fn candidate_index(&self, inverse_size: usize) -> u128 {
        (self.lane as u128) * (inverse_size as u128) + self.offset as u128
    }
}

impl From<ResultRecord> for DeviceHit {
    fn from(record: ResultRecord) -> Self {
        Self {
            lane: record.lane,
            offset: record.offset,
            pattern: record.pattern,
            score: Score {
                prefix: record.prefix_score as usize,
                suffix: record.suffix_score as usize,
            },
            address: record.address,
        }
    }
}

/// 一个可调度的计算设备
pub trait ComputeDevice: Send {
    /// 日志里显示的设备名
    fn describe(&self) -> String;

    fn work_size(&self) -> WorkSize;

    /// 每条 lane 共用一次批量求逆的候选数 B
    fn inverse_size(&self) -> usize;

    /// 上传模式与匹配要求，失败的设备会被引擎排除
    fn prepare(&mut self, patterns: &PatternSet, criteria: MatchCriteria) -> anyhow::Result<()>;

    /// 阻塞执行一批并返回被接受的候选
    fn dispatch(&mut self, seed: &SecretKey) -> anyhow::Result<Vec<DeviceHit>>;

    /// 每次调度覆盖的候选数
    fn candidates_per_dispatch(&self) -> u64 {
        (self.inverse_size() as u64) * (self.work_size().global as u64)
    }

    /// 累计因结果缓冲区容量而丢弃的命中数
    fn dropped_results(&self) -> u64 {
        0
    }
}

/// 一段 lane 区间的执行结果
pub struct LaneRangeOutput {
    /// 已读回的命中，lane 相对区间起点
    pub hits: Vec<DeviceHit>,
    /// 设备报告的命中总数，可能超过缓冲区容量
    pub reported: usize,
}

/// 按 lane 区间执行一批，结果缓冲区溢出时把区间对半拆分重跑
///
/// `run(first_lane, lanes)` 执行 `[first_lane, first_lane + lanes)` 区间。
/// 返回全部命中 (lane 已换算为整批内的编号) 和无法再拆分时丢弃的命中数。
pub fn dispatch_in_ranges<F>(
    name: &str,
    lanes: usize,
    mut run: F,
) -> anyhow::Result<(Vec<DeviceHit>, u64)>
where
    F: FnMut(usize, usize) -> anyhow::Result<LaneRangeOutput>,
{
    let mut hits = Vec::new();
    let mut dropped = 0u64;
    let mut pending = vec![(0usize, lanes)];

    while let Some((first, count)) = pending.pop() {
        let output = run(first, count)?;
        if output.reported > MAX_RESULTS_PER_DISPATCH && count > 1 {
            warn!(
                "{}: {} results overflow the {} record buffer, splitting lanes {}..{}",
                name,
                output.reported,
                MAX_RESULTS_PER_DISPATCH,
                first,
                first + count
            );
            let half = count / 2;
            pending.push((first + half, count - half));
            pending.push((first, half));
            continue;
        }
        if output.reported > output.hits.len() {
            let lost = output.reported - output.hits.len();
            warn!("{}: lane {} overflowed, {} result(s) dropped", name, first, lost);
            dropped += lost as u64;
        }
        hits.extend(output.hits.into_iter().map(|mut hit| {
            hit.lane += first as u32;
            hit
        }));
    }
    Ok((hits, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_index() {
        let hit = DeviceHit {
            lane: 3,
            offset: 7,
            pattern: 0,
            score: Score::default(),
            address: [0u8; RAW_ADDRESS_LEN],
        };
        assert_eq!(hit.candidate_index(255), 3 * 255 + 7);
    }

    #[test]
    fn test_hit_from_record() {
        let record = ResultRecord {
            lane: 1,
            offset: 2,
            pattern: 4,
            prefix_score: 3,
            suffix_score: 8,
            address: [0x41; RAW_ADDRESS_LEN],
        };
        let hit = DeviceHit::from(record);
        assert_eq!(hit.pattern, 4);
        assert_eq!(hit.score, Score { prefix: 3, suffix: 8 });
    }

    fn hit(lane: u32) -> DeviceHit {
        DeviceHit {
            lane,
            offset: 0,
            pattern: 0,
            score: Score::default(),
            address: [0u8; RAW_ADDRESS_LEN],
        }
    }

    /// 每条 lane 产生 `per_lane` 个命中，缓冲区最多容纳 MAX_RESULTS_PER_DISPATCH 条
    fn saturated(per_lane: usize) -> impl FnMut(usize, usize) -> anyhow::Result<LaneRangeOutput> {
        move |_first, lanes| {
            let reported = lanes * per_lane;
            let hits = (0..reported.min(MAX_RESULTS_PER_DISPATCH))
                .map(|i| hit((i / per_lane) as u32))
                .collect();
            Ok(LaneRangeOutput { hits, reported })
        }
    }

    #[test]
    fn test_overflowing_batch_is_split_without_loss() {
        let lanes = 80;
        let per_lane = 64;
        let mut calls = 0;
        let mut run = saturated(per_lane);
        let (hits, dropped) = dispatch_in_ranges("test", lanes, |first, count| {
            calls += 1;
            run(first, count)
        })
        .unwrap();

        assert_eq!(dropped, 0);
        assert_eq!(hits.len(), lanes * per_lane);
        assert!(calls > 1);
        for lane in 0..lanes as u32 {
            assert_eq!(hits.iter().filter(|h| h.lane == lane).count(), per_lane);
        }
    }

    #[test]
    fn test_single_lane_overflow_is_counted() {
        let per_lane = MAX_RESULTS_PER_DISPATCH + 10;
        let (hits, dropped) = dispatch_in_ranges("test", 2, saturated(per_lane)).unwrap();
        assert_eq!(hits.len(), 2 * MAX_RESULTS_PER_DISPATCH);
        assert_eq!(dropped, 20);
    }

    #[test]
    fn test_range_error_propagates() {
        let result = dispatch_in_ranges("test", 4, |_, _| anyhow::bail!("CL_INVALID_KERNEL"));
        assert!(result.is_err());
    }
}
