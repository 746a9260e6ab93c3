//! 批量求逆一致性测试
//! 批量路径、逐个求逆路径与 secp256k1 crate 的标量乘法必须得到完全相同的地址

mod common;

use pretty_assertions::assert_eq;
use rand::Rng;

use common::{key, reference_address};
use tron_profanity::CandidateAddress;
use tron_profanity::cpu::{lane_points, lane_points_unbatched};
use tron_profanity::curve::{
    AffinePoint, FieldElement, JacobianPoint, batch_invert, batch_normalize, field_from_bytes,
};
use tron_profanity::keyspace::{offset_key, random_secret_key};

const BATCH: usize = 64;

#[test]
fn test_batched_matches_unbatched_and_reference() {
    let seed = random_secret_key();
    let batched = lane_points(&seed, BATCH).unwrap();
    let unbatched = lane_points_unbatched(&seed, BATCH).unwrap();
    assert_eq!(batched.len(), BATCH);

    for i in 0..BATCH {
        let from_batch = CandidateAddress::from_public_xy(&batched[i].to_xy_bytes());
        let from_single = CandidateAddress::from_public_xy(&unbatched[i].to_xy_bytes());
        let reference = reference_address(&offset_key(&seed, i as u128).unwrap());

        assert_eq!(from_batch.raw(), from_single.raw(), "candidate {} differs", i);
        assert_eq!(from_batch.raw(), reference.raw(), "candidate {} differs", i);
        assert_eq!(from_batch.encoded(), reference.encoded());
    }
}

#[test]
fn test_small_scalars() {
    // 从 1 开始: 1G, 2G (第一次加法时 self == G 的情况由标量乘法兜底)
    let points = lane_points(&key(1), 8).unwrap();
    for (i, point) in points.iter().enumerate() {
        let expected = reference_address(&key(i as u64 + 1));
        assert_eq!(
            CandidateAddress::from_public_xy(&point.to_xy_bytes()).raw(),
            expected.raw()
        );
    }
}

#[test]
fn test_batch_invert_random_elements() {
    let mut rng = rand::thread_rng();
    let values: Vec<FieldElement> = (0..BATCH)
        .map(|_| {
            let mut bytes = [0u8; 32];
            rng.fill(&mut bytes);
            bytes[0] &= 0x7F;
            bytes[31] |= 1;
            field_from_bytes(&bytes).unwrap()
        })
        .collect();

    let mut inverses = values.clone();
    assert!(batch_invert(&mut inverses));
    for (value, inverse) in values.iter().zip(&inverses) {
        assert_eq!(
            value.mul(inverse).normalize().to_bytes(),
            FieldElement::ONE.to_bytes()
        );
    }
}

#[test]
fn test_batch_normalize_of_scaled_points() {
    // 同一个点的不同 Jacobian 表示必须还原为同一个仿射点
    let g = AffinePoint::generator();
    let mut points = Vec::new();
    for k in 1..=5u64 {
        let z = FieldElement::from_u64(k * 31);
        let z2 = z.square();
        let z3 = z2.mul(&z);
        points.push(JacobianPoint {
            x: g.x.mul(&z2),
            y: g.y.mul(&z3),
            z,
        });
    }
    let normalized = batch_normalize(&points).unwrap();
    assert!(normalized.iter().all(|p| *p == g));
}
