//! nkey 密钥对
//!
//! 代理凭证使用的 Ed25519 密钥方案：公钥和种子都编码为带前缀
//! 字节和 CRC16 校验的 Base32 字符串（种子 `SA…`/`SU…`，账户公钥
//! `A…`，用户公钥 `U…`）。

use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use ring::signature::{Ed25519KeyPair, KeyPair as _, UnparsedPublicKey, ED25519};

use crate::errors::DomainError;

/// 种子前缀字节（Base32 下首字符为 `S`）
pub const PREFIX_BYTE_SEED: u8 = 18 << 3;
/// 账户前缀字节（Base32 下首字符为 `A`）
pub const PREFIX_BYTE_ACCOUNT: u8 = 0;
/// 用户前缀字节（Base32 下首字符为 `U`）
pub const PREFIX_BYTE_USER: u8 = 20 << 3;

/// Ed25519 种子长度
const SEED_LEN: usize = 32;

/// 一对 nkey 密钥
pub struct KeyPair {
    seed: [u8; SEED_LEN],
    public_prefix: u8,
    inner: Ed25519KeyPair,
}

impl KeyPair {
    /// 由原始种子构建密钥对
    pub fn from_raw_seed(public_prefix: u8, seed: [u8; SEED_LEN]) -> Result<Self, DomainError> {
        let inner = Ed25519KeyPair::from_seed_unchecked(&seed)
            .map_err(|e| DomainError::invalid_key(format!("种子无效: {}", e)))?;

        Ok(Self {
            seed,
            public_prefix,
            inner,
        })
    }

    /// 由编码后的种子字符串（`SA…`/`SU…`）恢复密钥对
    pub fn from_seed(encoded: &str) -> Result<Self, DomainError> {
        let (public_prefix, seed) = decode_seed(encoded)?;
        Self::from_raw_seed(public_prefix, seed)
    }

    /// 生成一对新的用户密钥
    pub fn create_user() -> Result<Self, DomainError> {
        Self::create(PREFIX_BYTE_USER)
    }

    /// 生成一对新的账户密钥
    pub fn create_account() -> Result<Self, DomainError> {
        Self::create(PREFIX_BYTE_ACCOUNT)
    }

    fn create(public_prefix: u8) -> Result<Self, DomainError> {
        let mut seed = [0u8; SEED_LEN];
        rand::rng().fill_bytes(&mut seed);
        Self::from_raw_seed(public_prefix, seed)
    }

    /// 编码后的公钥（`A…`/`U…`）
    pub fn public_key(&self) -> String {
        encode(self.public_prefix, self.inner.public_key().as_ref())
    }

    /// 编码后的种子（`SA…`/`SU…`），属于机密材料
    pub fn seed(&self) -> String {
        encode_seed(self.public_prefix, &self.seed)
    }

    /// 对数据签名，返回 64 字节签名
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.inner.sign(data).as_ref().to_vec()
    }
}

/// 用编码后的公钥验证签名
pub fn verify(public_key: &str, data: &[u8], signature: &[u8]) -> Result<(), DomainError> {
    let (_, raw) = decode(public_key)?;
    UnparsedPublicKey::new(&ED25519, raw)
        .verify(data, signature)
        .map_err(|_| DomainError::SignatureVerification)
}

/// 带前缀和 CRC 的 Base32 编码
fn encode(prefix: u8, payload: &[u8]) -> String {
    let mut raw = Vec::with_capacity(payload.len() + 3);
    raw.push(prefix);
    raw.extend_from_slice(payload);
    let crc = crc16(&raw);
    raw.extend_from_slice(&crc.to_le_bytes());
    BASE32_NOPAD.encode(&raw)
}

/// 解码并校验，返回 (前缀字节, 载荷)
fn decode(encoded: &str) -> Result<(u8, Vec<u8>), DomainError> {
    let raw = BASE32_NOPAD
        .decode(encoded.as_bytes())
        .map_err(|e| DomainError::invalid_key(format!("Base32 解码失败: {}", e)))?;

    if raw.len() < 4 {
        return Err(DomainError::invalid_key("编码数据过短"));
    }

    let (body, crc_bytes) = raw.split_at(raw.len() - 2);
    let expected = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    if crc16(body) != expected {
        return Err(DomainError::invalid_key("CRC 校验失败"));
    }

    Ok((body[0], body[1..].to_vec()))
}

/// 种子编码：前缀字节拆分到前两个字节，保证 Base32 前两个字符可读
fn encode_seed(public_prefix: u8, seed: &[u8; SEED_LEN]) -> String {
    let b1 = PREFIX_BYTE_SEED | (public_prefix >> 5);
    let b2 = (public_prefix & 0x1f) << 3;

    let mut raw = Vec::with_capacity(SEED_LEN + 4);
    raw.push(b1);
    raw.push(b2);
    raw.extend_from_slice(seed);
    let crc = crc16(&raw);
    raw.extend_from_slice(&crc.to_le_bytes());
    BASE32_NOPAD.encode(&raw)
}

/// 解码种子，返回 (公钥前缀, 原始种子)
fn decode_seed(encoded: &str) -> Result<(u8, [u8; SEED_LEN]), DomainError> {
    let raw = BASE32_NOPAD
        .decode(encoded.as_bytes())
        .map_err(|e| DomainError::invalid_key(format!("Base32 解码失败: {}", e)))?;

    if raw.len() != SEED_LEN + 4 {
        return Err(DomainError::invalid_key("种子长度错误"));
    }

    let (body, crc_bytes) = raw.split_at(raw.len() - 2);
    let expected = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    if crc16(body) != expected {
        return Err(DomainError::invalid_key("种子 CRC 校验失败"));
    }

    if body[0] & 0xf8 != PREFIX_BYTE_SEED {
        return Err(DomainError::invalid_key("不是种子编码"));
    }

    let public_prefix = ((body[0] & 0x07) << 5) | ((body[1] & 0xf8) >> 3);
    let mut seed = [0u8; SEED_LEN];
    seed.copy_from_slice(&body[2..]);

    Ok((public_prefix, seed))
}

/// CRC16/XMODEM（多项式 0x1021，初值 0）
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_xmodem_vector() {
        // "123456789" 的 CRC16/XMODEM 标准校验值
        assert_eq!(crc16(b"123456789"), 0x31c3);
    }

    #[test]
    fn test_user_key_prefixes() {
        let pair = KeyPair::create_user().unwrap();
        assert!(pair.public_key().starts_with('U'));
        assert!(pair.seed().starts_with("SU"));
    }

    #[test]
    fn test_account_key_prefixes() {
        let pair = KeyPair::create_account().unwrap();
        assert!(pair.public_key().starts_with('A'));
        assert!(pair.seed().starts_with("SA"));
    }

    #[test]
    fn test_seed_roundtrip_derives_same_public_key() {
        let pair = KeyPair::create_user().unwrap();
        let restored = KeyPair::from_seed(&pair.seed()).unwrap();
        assert_eq!(pair.public_key(), restored.public_key());
    }

    #[test]
    fn test_corrupted_seed_rejected() {
        let pair = KeyPair::create_user().unwrap();
        let mut seed = pair.seed();
        // 篡改中间一个字符
        let mid = seed.len() / 2;
        let replacement = if seed.as_bytes()[mid] == b'A' { 'B' } else { 'A' };
        seed.replace_range(mid..mid + 1, &replacement.to_string());

        assert!(KeyPair::from_seed(&seed).is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = KeyPair::create_account().unwrap();
        let data = b"header.claim";
        let signature = pair.sign(data);

        assert!(verify(&pair.public_key(), data, &signature).is_ok());
        assert!(verify(&pair.public_key(), b"tampered", &signature).is_err());
    }

    #[test]
    fn test_verify_with_wrong_key_fails() {
        let signer = KeyPair::create_account().unwrap();
        let other = KeyPair::create_account().unwrap();
        let signature = signer.sign(b"data");

        assert!(verify(&other.public_key(), b"data", &signature).is_err());
    }
}
