//! 私钥空间划分
//!
//! 一次运行只抽取一个随机起点，之后每个设备会话的每个批次都占用互不重叠的一段:
//! 会话 `d` 的第 `k` 批起始于 `base + (k * sessions + d) * stride`。

use anyhow::Context;
use rand::RngCore;
use rand::rngs::OsRng;
use secp256k1::{Scalar, SecretKey};

/// 在私钥上加一个偏移 (模 n)
pub fn offset_key(base: &SecretKey, offset: u128) -> anyhow::Result<SecretKey> {
    if offset == 0 {
        return Ok(*base);
    }
    let mut tweak = [0u8; 32];
    tweak[16..].copy_from_slice(&offset.to_be_bytes());
    let tweak = Scalar::from_be_bytes(tweak).context("offset out of scalar range")?;
    base.add_tweak(&tweak)
        .context("offset key is not a valid secret key")
}

/// 从操作系统熵源抽取一个合法私钥
pub fn random_secret_key() -> SecretKey {
    let mut bytes = [0u8; 32];
    loop {
        OsRng.fill_bytes(&mut bytes);
        if let Ok(key) = SecretKey::from_slice(&bytes) {
            return key;
        }
    }
}

/// 各设备会话的种子序列
#[derive(Debug, Clone)]
pub struct SeedSchedule {
    base: SecretKey,
    sessions: u128,
    stride: u128,
}

impl SeedSchedule {
    /// `stride` 必须不小于任一会话单次调度覆盖的候选数
    pub fn new(base: SecretKey, sessions: usize, stride: u64) -> Self {
        Self {
            base,
            sessions: sessions.max(1) as u128,
            stride: stride.max(1) as u128,
        }
    }

    pub fn base(&self) -> &SecretKey {
        &self.base
    }

    /// 会话 `session` 第 `batch` 批的起始私钥
    pub fn seed_for(&self, session: usize, batch: u64) -> anyhow::Result<SecretKey> {
        let offset = (batch as u128)
            .checked_mul(self.sessions)
            .and_then(|slot| slot.checked_add(session as u128))
            .and_then(|slot| slot.checked_mul(self.stride))
            .context("key space exhausted for this seed base")?;
        offset_key(&self.base, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(value: u8) -> SecretKey {
        let mut bytes = [0u8; 32];
        bytes[31] = value;
        SecretKey::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_offset_key() {
        let base = key(5);
        assert_eq!(offset_key(&base, 0).unwrap(), base);
        assert_eq!(offset_key(&base, 10).unwrap(), key(15));
    }

    #[test]
    fn test_schedule_interleaves_sessions() {
        let schedule = SeedSchedule::new(key(1), 2, 8);
        assert_eq!(schedule.seed_for(0, 0).unwrap(), key(1));
        assert_eq!(schedule.seed_for(1, 0).unwrap(), key(9));
        assert_eq!(schedule.seed_for(0, 1).unwrap(), key(17));
        assert_eq!(schedule.seed_for(1, 1).unwrap(), key(25));
    }

    #[test]
    fn test_random_keys_differ() {
        assert_ne!(random_secret_key(), random_secret_key());
    }
}
