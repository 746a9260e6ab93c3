//! 测试公共模块
//!
//! 提供测试用的公共函数和模拟设备

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use secp256k1::{PublicKey, SECP256K1, SecretKey};

use tron_profanity::device::{ComputeDevice, DeviceHit, WorkSize};
use tron_profanity::keyspace::offset_key;
use tron_profanity::{CandidateAddress, CpuDevice, MatchCriteria, PatternSet, SearchControl};

/// 由小整数构造私钥
pub fn key(value: u64) -> SecretKey {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&value.to_be_bytes());
    SecretKey::from_slice(&bytes).expect("valid small scalar")
}

/// 用 secp256k1 crate 直接计算地址 (参考实现)
pub fn reference_address(secret: &SecretKey) -> CandidateAddress {
    CandidateAddress::from_public_key(&PublicKey::from_secret_key(SECP256K1, secret))
}

/// 记录每次调度覆盖的全部私钥，再交给内部 CPU 设备执行
pub struct RecordingDevice {
    inner: CpuDevice,
    pub seen: Arc<Mutex<Vec<[u8; 32]>>>,
}

impl RecordingDevice {
    pub fn new(index: usize, inverse_size: usize, lanes: usize) -> Self {
        Self {
            inner: CpuDevice::with_work_size(index, inverse_size, lanes),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ComputeDevice for RecordingDevice {
    fn describe(&self) -> String {
        format!("recording {}", self.inner.describe())
    }

    fn work_size(&self) -> WorkSize {
        self.inner.work_size()
    }

    fn inverse_size(&self) -> usize {
        self.inner.inverse_size()
    }

    fn prepare(&mut self, patterns: &PatternSet, criteria: MatchCriteria) -> anyhow::Result<()> {
        self.inner.prepare(patterns, criteria)
    }

    fn dispatch(&mut self, seed: &SecretKey) -> anyhow::Result<Vec<DeviceHit>> {
        {
            let mut seen = self.seen.lock();
            for i in 0..self.candidates_per_dispatch() {
                seen.push(offset_key(seed, i as u128)?.secret_bytes());
            }
        }
        self.inner.dispatch(seed)
    }
}

/// 准备阶段失败的设备 (模拟程序构建失败)
pub struct BrokenBuildDevice;

impl ComputeDevice for BrokenBuildDevice {
    fn describe(&self) -> String {
        String::from("broken build")
    }

    fn work_size(&self) -> WorkSize {
        WorkSize {
            local: 1,
            global: 1,
        }
    }

    fn inverse_size(&self) -> usize {
        1
    }

    fn prepare(&mut self, _patterns: &PatternSet, _criteria: MatchCriteria) -> anyhow::Result<()> {
        anyhow::bail!("clBuildProgram failed")
    }

    fn dispatch(&mut self, _seed: &SecretKey) -> anyhow::Result<Vec<DeviceHit>> {
        unreachable!("excluded devices are never dispatched")
    }
}

/// 前若干次调度正常，之后每次调度都失败
pub struct FlakyDevice {
    inner: CpuDevice,
    remaining: usize,
}

impl FlakyDevice {
    pub fn new(index: usize, healthy_dispatches: usize) -> Self {
        Self {
            inner: CpuDevice::with_work_size(index, 2, 1),
            remaining: healthy_dispatches,
        }
    }
}

impl ComputeDevice for FlakyDevice {
    fn describe(&self) -> String {
        format!("flaky {}", self.inner.describe())
    }

    fn work_size(&self) -> WorkSize {
        self.inner.work_size()
    }

    fn inverse_size(&self) -> usize {
        self.inner.inverse_size()
    }

    fn prepare(&mut self, patterns: &PatternSet, criteria: MatchCriteria) -> anyhow::Result<()> {
        self.inner.prepare(patterns, criteria)
    }

    fn dispatch(&mut self, seed: &SecretKey) -> anyhow::Result<Vec<DeviceHit>> {
        if self.remaining == 0 {
            anyhow::bail!("CL_OUT_OF_RESOURCES");
        }
        self.remaining -= 1;
        // 不返回命中，只消耗批次
        self.inner.dispatch(seed).map(|_| Vec::new())
    }
}

/// 调度进行中收到停止请求 (模拟批次执行期间按下 Ctrl-C)
pub struct StopDuringDispatch {
    inner: CpuDevice,
    control: Arc<SearchControl>,
}

impl StopDuringDispatch {
    pub fn new(
        index: usize,
        inverse_size: usize,
        lanes: usize,
        control: Arc<SearchControl>,
    ) -> Self {
        Self {
            inner: CpuDevice::with_work_size(index, inverse_size, lanes),
            control,
        }
    }
}

impl ComputeDevice for StopDuringDispatch {
    fn describe(&self) -> String {
        format!("stopping {}", self.inner.describe())
    }

    fn work_size(&self) -> WorkSize {
        self.inner.work_size()
    }

    fn inverse_size(&self) -> usize {
        self.inner.inverse_size()
    }

    fn prepare(&mut self, patterns: &PatternSet, criteria: MatchCriteria) -> anyhow::Result<()> {
        self.inner.prepare(patterns, criteria)
    }

    fn dispatch(&mut self, seed: &SecretKey) -> anyhow::Result<Vec<DeviceHit>> {
        self.control.request_stop();
        self.inner.dispatch(seed)
    }
}
