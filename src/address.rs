//! Tron 地址派生
//!
//! 公钥 -> Keccak-256 -> 0x41 前缀原始地址 -> Base58Check 文本地址。

use std::borrow::Cow;

use secp256k1::PublicKey;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::config::{ADDRESS_PREFIX_BYTE, MatchWindow, PATTERN_WIDTH, RAW_ADDRESS_LEN, WINDOW_HALF};

/// 未压缩公钥去掉 0x04 标记后的 64 字节 (x || y)
pub fn public_xy(public_key: &PublicKey) -> [u8; 64] {
    let uncompressed = public_key.serialize_uncompressed();
    let mut xy = [0u8; 64];
    xy.copy_from_slice(&uncompressed[1..]);
    xy
}

/// 原始地址: 0x41 || keccak256(x || y)[12..32]
pub fn raw_address(public_xy: &[u8; 64]) -> [u8; RAW_ADDRESS_LEN] {
    let hash = Keccak256::digest(public_xy);
    let mut raw = [0u8; RAW_ADDRESS_LEN];
    raw[0] = ADDRESS_PREFIX_BYTE;
    raw[1..].copy_from_slice(&hash[12..]);
    raw
}

/// 双 SHA-256 校验和的前 4 字节
pub fn checksum(raw: &[u8; RAW_ADDRESS_LEN]) -> [u8; 4] {
    let first = Sha256::digest(raw);
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}

/// Base58Check 编码
pub fn encode(raw: &[u8; RAW_ADDRESS_LEN]) -> String {
    let mut payload = [0u8; RAW_ADDRESS_LEN + 4];
    payload[..RAW_ADDRESS_LEN].copy_from_slice(raw);
    payload[RAW_ADDRESS_LEN..].copy_from_slice(&checksum(raw));
    bs58::encode(payload).into_string()
}

/// 文本比较窗口: 前 10 个字符 + 后 10 个字符
pub fn match_window(encoded: &str) -> [u8; PATTERN_WIDTH] {
    let bytes = encoded.as_bytes();
    let mut window = [0u8; PATTERN_WIDTH];
    let head = bytes.len().min(WINDOW_HALF);
    window[..head].copy_from_slice(&bytes[..head]);
    let tail = bytes.len().min(WINDOW_HALF);
    window[PATTERN_WIDTH - tail..].copy_from_slice(&bytes[bytes.len() - tail..]);
    window
}

/// 一个候选的原始地址和文本地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateAddress {
    raw: [u8; RAW_ADDRESS_LEN],
    encoded: String,
}

impl CandidateAddress {
    pub fn from_raw(raw: [u8; RAW_ADDRESS_LEN]) -> Self {
        Self {
            encoded: encode(&raw),
            raw,
        }
    }

    pub fn from_public_xy(public_xy: &[u8; 64]) -> Self {
        Self::from_raw(raw_address(public_xy))
    }

    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self::from_public_xy(&public_xy(public_key))
    }

    pub fn raw(&self) -> &[u8; RAW_ADDRESS_LEN] {
        &self.raw
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn into_parts(self) -> ([u8; RAW_ADDRESS_LEN], String) {
        (self.raw, self.encoded)
    }

    /// 指定窗口下参与比较的字节
    pub fn window(&self, kind: MatchWindow) -> Cow<'_, [u8]> {
        match kind {
            MatchWindow::Encoded => Cow::Owned(match_window(&self.encoded).to_vec()),
            MatchWindow::Raw => Cow::Borrowed(&self.raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ENCODED_ADDRESS_LEN;
    use pretty_assertions::assert_eq;
    use secp256k1::{SECP256K1, SecretKey};

    fn key_one() -> PublicKey {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let secret = SecretKey::from_slice(&bytes).unwrap();
        PublicKey::from_secret_key(SECP256K1, &secret)
    }

    #[test]
    fn test_raw_address_of_key_one() {
        // 私钥 1 对应的以太坊地址 0x7e5f4552091a69125d5dfcb7b8c2659029395bdf
        let candidate = CandidateAddress::from_public_key(&key_one());
        assert_eq!(
            hex::encode(candidate.raw()),
            "417e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_encoded_address_shape() {
        let candidate = CandidateAddress::from_public_key(&key_one());
        let encoded = candidate.encoded();
        assert_eq!(encoded.len(), ENCODED_ADDRESS_LEN);
        assert!(encoded.starts_with('T'));

        let decoded = bs58::decode(encoded).into_vec().unwrap();
        assert_eq!(decoded.len(), RAW_ADDRESS_LEN + 4);
        assert_eq!(&decoded[..RAW_ADDRESS_LEN], candidate.raw().as_slice());
        assert_eq!(&decoded[RAW_ADDRESS_LEN..], checksum(candidate.raw()).as_slice());
    }

    #[test]
    fn test_match_window() {
        let window = match_window("TUqEg3dzVEJNQSVW2HY98z5X8SBdhmao8D");
        assert_eq!(&window, b"TUqEg3dzVE8SBdhmao8D");
    }

    #[test]
    fn test_window_kinds() {
        let candidate = CandidateAddress::from_public_key(&key_one());
        assert_eq!(candidate.window(MatchWindow::Raw).len(), RAW_ADDRESS_LEN);
        let encoded = candidate.window(MatchWindow::Encoded);
        assert_eq!(encoded.len(), PATTERN_WIDTH);
        assert_eq!(encoded[0], b'T');
    }
}
