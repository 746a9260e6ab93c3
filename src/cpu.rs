//! 主机端计算设备
//!
//! 与 OpenCL 内核遵循相同的调度约定，用于没有加速卡的环境和引擎测试。

use anyhow::Context;
use secp256k1::SecretKey;

use crate::address::CandidateAddress;
use crate::config::{BatchSizing, MatchCriteria};
use crate::curve::{AffinePoint, JacobianPoint, batch_normalize};
use crate::device::{ComputeDevice, DeviceHit, WorkSize};
use crate::keyspace::offset_key;
use crate::pattern::PatternSet;

/// 主机设备每批的 lane 数上限，单批耗时保持在百毫秒量级以便及时响应停止
pub const MAX_HOST_LANES: usize = 64;

fn public_point(key: &SecretKey) -> anyhow::Result<AffinePoint> {
    AffinePoint::mul_generator(&key.secret_bytes()).context("scalar outside the curve order")
}

fn walk_lane(lane_seed: &SecretKey, count: usize) -> anyhow::Result<Vec<JacobianPoint>> {
    let generator = AffinePoint::generator();
    let mut points = Vec::with_capacity(count);
    if count == 0 {
        return Ok(points);
    }

    let mut current = JacobianPoint::from(public_point(lane_seed)?);
    points.push(current);
    for i in 1..count {
        current = match current.add_affine(&generator) {
            Some(next) => next,
            None => {
                let key = offset_key(lane_seed, i as u128)?;
                JacobianPoint::from(public_point(&key)?)
            }
        };
        points.push(current);
    }
    Ok(points)
}

/// 一条 lane 的 `count` 个公钥 (`lane_seed + i`)，整条 lane 只做一次域求逆
pub fn lane_points(lane_seed: &SecretKey, count: usize) -> anyhow::Result<Vec<AffinePoint>> {
    let points = walk_lane(lane_seed, count)?;
    batch_normalize(&points).context("zero Z coordinate in lane batch")
}

/// 与 [`lane_points`] 相同，但每个点单独求逆
pub fn lane_points_unbatched(
    lane_seed: &SecretKey,
    count: usize,
) -> anyhow::Result<Vec<AffinePoint>> {
    walk_lane(lane_seed, count)?
        .iter()
        .map(|point| point.to_affine().context("zero Z coordinate"))
        .collect()
}

/// 在主机线程上执行批次的设备
pub struct CpuDevice {
    index: usize,
    work_size: WorkSize,
    inverse_size: usize,
    prepared: Option<(PatternSet, MatchCriteria)>,
}

impl CpuDevice {
    pub fn new(index: usize, sizing: &BatchSizing) -> Self {
        Self::with_work_size(
            index,
            sizing.inverse_size,
            sizing.lanes().min(MAX_HOST_LANES),
        )
    }

    pub fn with_work_size(index: usize, inverse_size: usize, lanes: usize) -> Self {
        Self {
            index,
            work_size: WorkSize {
                local: 1,
                global: lanes,
            },
            inverse_size,
            prepared: None,
        }
    }
}

impl ComputeDevice for CpuDevice {
    fn describe(&self) -> String {
        format!("CPU-{}", self.index)
    }

    fn work_size(&self) -> WorkSize {
        self.work_size
    }

    fn inverse_size(&self) -> usize {
        self.inverse_size
    }

    fn prepare(&mut self, patterns: &PatternSet, criteria: MatchCriteria) -> anyhow::Result<()> {
        if self.inverse_size == 0 || self.work_size.global == 0 {
            anyhow::bail!("{} has an empty batch", self.describe());
        }
        self.prepared = Some((patterns.clone(), criteria));
        Ok(())
    }

    fn dispatch(&mut self, seed: &SecretKey) -> anyhow::Result<Vec<DeviceHit>> {
        let (patterns, criteria) = self
            .prepared
            .as_ref()
            .context("device used before prepare")?;

        let mut hits = Vec::new();
        for lane in 0..self.work_size.global {
            let lane_seed = offset_key(seed, (lane as u128) * (self.inverse_size as u128))?;
            let points = lane_points(&lane_seed, self.inverse_size)?;

            for (offset, point) in points.iter().enumerate() {
                let candidate = CandidateAddress::from_public_xy(&point.to_xy_bytes());
                let window = candidate.window(patterns.window());
                if let Some((pattern, score)) = patterns.evaluate(&window, criteria) {
                    hits.push(DeviceHit {
                        lane: lane as u32,
                        offset: offset as u32,
                        pattern: pattern as u32,
                        score,
                        address: *candidate.raw(),
                    });
                }
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ADDRESS_PREFIX_BYTE, MAX_RESULTS_PER_DISPATCH};
    use crate::keyspace::random_secret_key;
    use pretty_assertions::assert_eq;
    use secp256k1::{PublicKey, SECP256K1};

    fn reference_point(key: &SecretKey) -> AffinePoint {
        AffinePoint::from_public_key(&PublicKey::from_secret_key(SECP256K1, key)).unwrap()
    }

    #[test]
    fn test_lane_points_match_scalar_multiplication() {
        let seed = random_secret_key();
        let points = lane_points(&seed, 6).unwrap();
        for (i, point) in points.iter().enumerate() {
            let key = offset_key(&seed, i as u128).unwrap();
            assert_eq!(*point, reference_point(&key), "candidate {} differs", i);
        }
    }

    #[test]
    fn test_empty_lane() {
        assert!(lane_points(&random_secret_key(), 0).unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_reports_every_candidate_when_unconstrained() {
        let mut device = CpuDevice::with_work_size(0, 3, 2);
        device
            .prepare(&PatternSet::generate(), MatchCriteria::any())
            .unwrap();
        let seed = random_secret_key();
        let hits = device.dispatch(&seed).unwrap();
        assert_eq!(hits.len(), 6);
        assert!(hits.iter().all(|hit| hit.address[0] == ADDRESS_PREFIX_BYTE));

        let hit = hits[4];
        let key = offset_key(&seed, hit.candidate_index(3)).unwrap();
        let expected = CandidateAddress::from_public_key(&PublicKey::from_secret_key(SECP256K1, &key));
        assert_eq!(&hit.address, expected.raw());
    }

    #[test]
    fn test_dispatch_returns_hits_beyond_result_buffer() {
        let mut device = CpuDevice::with_work_size(0, 64, 80);
        device
            .prepare(&PatternSet::generate(), MatchCriteria::any())
            .unwrap();
        let per_dispatch = device.candidates_per_dispatch() as usize;
        assert!(per_dispatch > MAX_RESULTS_PER_DISPATCH);

        let hits = device.dispatch(&random_secret_key()).unwrap();
        assert_eq!(hits.len(), per_dispatch);
        assert_eq!(hits.last().map(|h| (h.lane, h.offset)), Some((79, 63)));
        assert_eq!(device.dropped_results(), 0);
    }

    #[test]
    fn test_host_lanes_are_capped() {
        let device = CpuDevice::new(0, &BatchSizing::default());
        assert_eq!(device.work_size().global, MAX_HOST_LANES);
        assert_eq!(device.inverse_size(), 255);

        let small = BatchSizing {
            local_work_size: 1,
            work_max: 0,
            inverse_size: 4,
            inverse_multiple: 2,
        };
        assert_eq!(CpuDevice::new(1, &small).work_size().global, 2);
    }

    #[test]
    fn test_dispatch_requires_prepare() {
        let mut device = CpuDevice::with_work_size(0, 2, 1);
        assert!(device.dispatch(&random_secret_key()).is_err());
        assert_eq!(device.candidates_per_dispatch(), 2);
    }
}
