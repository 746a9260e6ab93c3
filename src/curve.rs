//! secp256k1 点运算与批量求逆
//!
//! 域运算由 k256 提供。候选公钥以 Jacobian 坐标逐个加 G 得到 (不需要求逆)，
//! 最后用一次批量求逆把整批点转换回仿射坐标。
//!
//! k256 的域元素采用惰性规约并跟踪量级 (magnitude)，这里的每个中间结果都先
//! `normalize_weak` 到量级 1 再参与减法。

use k256::elliptic_curve::PrimeField;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{ProjectivePoint, Scalar};
use secp256k1::PublicKey;

pub use k256::FieldElement;

fn add(a: &FieldElement, b: &FieldElement) -> FieldElement {
    (*a + *b).normalize_weak()
}

fn sub(a: &FieldElement, b: &FieldElement) -> FieldElement {
    (*a + b.normalize_weak().negate(1)).normalize_weak()
}

fn double(a: &FieldElement) -> FieldElement {
    a.double().normalize_weak()
}

fn is_zero(a: &FieldElement) -> bool {
    bool::from(a.normalizes_to_zero())
}

/// 32 字节大端表示转域元素，不小于 p 时返回 None
pub fn field_from_bytes(bytes: &[u8; 32]) -> Option<FieldElement> {
    Option::from(FieldElement::from_bytes(&(*bytes).into()))
}

fn field_to_bytes(element: &FieldElement) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&element.normalize().to_bytes());
    out
}

/// 仿射坐标点，坐标保持完全规约
#[derive(Debug, Clone, Copy)]
pub struct AffinePoint {
    pub x: FieldElement,
    pub y: FieldElement,
}

impl PartialEq for AffinePoint {
    fn eq(&self, other: &Self) -> bool {
        self.to_xy_bytes() == other.to_xy_bytes()
    }
}

impl Eq for AffinePoint {}

impl AffinePoint {
    pub fn generator() -> Self {
        // G 的 SEC1 编码恒为 65 字节
        Self::from_uncompressed(k256::AffinePoint::GENERATOR.to_encoded_point(false).as_bytes())
            .unwrap_or(Self {
                x: FieldElement::ZERO,
                y: FieldElement::ZERO,
            })
    }

    /// 解析 `04 || x || y`，无穷远点或其他长度返回 None
    fn from_uncompressed(encoded: &[u8]) -> Option<Self> {
        if encoded.len() != 65 || encoded[0] != 0x04 {
            return None;
        }
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&encoded[1..33]);
        y.copy_from_slice(&encoded[33..65]);
        Some(Self {
            x: field_from_bytes(&x)?,
            y: field_from_bytes(&y)?,
        })
    }

    pub fn from_public_key(public_key: &PublicKey) -> Option<Self> {
        Self::from_uncompressed(&public_key.serialize_uncompressed())
    }

    /// 标量乘 k·G，标量为零或不小于群阶时返回 None
    pub fn mul_generator(scalar: &[u8; 32]) -> Option<Self> {
        let scalar = Scalar::from_repr_vartime((*scalar).into())?;
        let point = (ProjectivePoint::GENERATOR * scalar).to_affine();
        Self::from_uncompressed(point.to_encoded_point(false).as_bytes())
    }

    /// x || y，地址派生的哈希输入
    pub fn to_xy_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&field_to_bytes(&self.x));
        out[32..].copy_from_slice(&field_to_bytes(&self.y));
        out
    }
}

/// Jacobian 坐标点 (X / Z^2, Y / Z^3)
#[derive(Debug, Clone, Copy)]
pub struct JacobianPoint {
    pub x: FieldElement,
    pub y: FieldElement,
    pub z: FieldElement,
}

impl From<AffinePoint> for JacobianPoint {
    fn from(point: AffinePoint) -> Self {
        Self {
            x: point.x,
            y: point.y,
            z: FieldElement::ONE,
        }
    }
}

impl JacobianPoint {
    /// 混合加法 self + q (madd-2007-bl, a = 0)
    ///
    /// self == ±q 时公式退化，返回 None，由调用方改用标量乘法。
    pub fn add_affine(&self, q: &AffinePoint) -> Option<Self> {
        let z1z1 = self.z.square();
        let u2 = q.x.mul(&z1z1);
        let s2 = q.y.mul(&self.z).mul(&z1z1);
        let h = sub(&u2, &self.x);
        if is_zero(&h) {
            return None;
        }
        let hh = h.square();
        let i = double(&double(&hh));
        let j = h.mul(&i);
        let r = double(&sub(&s2, &self.y));
        let v = self.x.mul(&i);

        let x3 = sub(&sub(&r.square(), &j), &double(&v));
        let y3 = sub(&r.mul(&sub(&v, &x3)), &double(&self.y.mul(&j)));
        let z3 = sub(&sub(&add(&self.z, &h).square(), &z1z1), &hh);

        Some(Self {
            x: x3,
            y: y3,
            z: z3,
        })
    }

    /// 用给定的 Z 逆元转换到仿射坐标
    pub fn to_affine_with(&self, z_inv: &FieldElement) -> AffinePoint {
        let z_inv2 = z_inv.square();
        let z_inv3 = z_inv2.mul(z_inv);
        AffinePoint {
            x: self.x.mul(&z_inv2).normalize(),
            y: self.y.mul(&z_inv3).normalize(),
        }
    }

    /// 单独求逆的转换 (非批量参考路径)
    pub fn to_affine(&self) -> Option<AffinePoint> {
        let z_inv: Option<FieldElement> = self.z.normalize().invert().into();
        z_inv.map(|z_inv| self.to_affine_with(&z_inv))
    }
}

/// 批量求逆: 累乘前缀积，只求一次逆，再反向回代出每个元素的逆
///
/// 任一元素为零时返回 false，且不修改输入。
pub fn batch_invert(values: &mut [FieldElement]) -> bool {
    if values.is_empty() {
        return true;
    }

    let mut prefix = Vec::with_capacity(values.len());
    let mut acc = FieldElement::ONE;
    for value in values.iter() {
        acc = acc.mul(value);
        prefix.push(acc);
    }

    let inv: Option<FieldElement> = acc.normalize().invert().into();
    let Some(mut inv) = inv else {
        return false;
    };

    for i in (1..values.len()).rev() {
        let original = values[i];
        values[i] = inv.mul(&prefix[i - 1]).normalize();
        inv = inv.mul(&original);
    }
    values[0] = inv.normalize();
    true
}

/// 整批 Jacobian 点转换到仿射坐标，只做一次域求逆
pub fn batch_normalize(points: &[JacobianPoint]) -> Option<Vec<AffinePoint>> {
    let mut z_inverses: Vec<FieldElement> = points.iter().map(|p| p.z).collect();
    if !batch_invert(&mut z_inverses) {
        return None;
    }
    Some(
        points
            .iter()
            .zip(&z_inverses)
            .map(|(point, z_inv)| point.to_affine_with(z_inv))
            .collect(),
    )
}
