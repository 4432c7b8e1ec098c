//! 加密与签名工具
//!
//! - `FieldEncryptor`：AES-256-GCM 字段级加密，用于提现银行账号等敏感字段落库
//! - HMAC / SHA-256 签名：Paystack 回调验签、Cloudinary 上传签名
//! - 随机令牌与脱敏函数
//!
//! 密文格式: `base64(nonce[12] || ciphertext || tag[16])`。未配置密钥时进入
//! passthrough 模式，仅用于本地开发。

use aes_gcm::{
    Aes256Gcm, AeadCore, KeyInit,
    aead::Aead,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("加密失败: {0}")]
    EncryptionFailed(String),

    #[error("解密失败: {0}")]
    DecryptionFailed(String),

    #[error("无效的密钥: {0}")]
    InvalidKey(String),

    #[error("无效的密文格式: {0}")]
    InvalidCiphertext(String),
}

impl From<CryptoError> for crate::error::AgriError {
    fn from(err: CryptoError) -> Self {
        Self::Crypto(err.to_string())
    }
}

const NONCE_SIZE: usize = 12;

/// 字段级加密器
#[derive(Clone)]
pub struct FieldEncryptor {
    /// None 表示 passthrough 模式
    cipher: Option<Aes256Gcm>,
}

impl std::fmt::Debug for FieldEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldEncryptor")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl FieldEncryptor {
    /// 从 32 字节密钥创建加密器
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "预期 32 字节, 实际 {} 字节",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self {
            cipher: Some(cipher),
        })
    }

    pub fn passthrough() -> Self {
        Self { cipher: None }
    }

    /// 从 64 字符 hex 密钥创建（对应 security.encryption_key）
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Self::new(&bytes)
    }

    /// 按配置构造：有密钥则加密，否则 passthrough
    pub fn from_config(key: Option<&str>) -> Result<Self, CryptoError> {
        match key.filter(|k| !k.is_empty()) {
            Some(k) => Self::from_hex(k),
            None => Ok(Self::passthrough()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let Some(ref cipher) = self.cipher else {
            return Ok(plaintext.to_string());
        };

        let nonce = Aes256Gcm::generate_nonce(&mut aes_gcm::aead::OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let Some(ref cipher) = self.cipher else {
            return Ok(ciphertext.to_string());
        };

        let combined = BASE64
            .decode(ciphertext)
            .map_err(|e| CryptoError::InvalidCiphertext(format!("base64 解码失败: {e}")))?;

        if combined.len() < NONCE_SIZE {
            return Err(CryptoError::InvalidCiphertext(format!(
                "密文过短: 实际 {} 字节",
                combined.len()
            )));
        }

        let (nonce_bytes, ciphertext_bytes) = combined.split_at(NONCE_SIZE);
        let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext_bytes)
            .map_err(|_| CryptoError::DecryptionFailed("密文损坏或密钥不匹配".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("解密结果非 UTF-8: {e}")))
    }
}

// ============================================================
// 签名
// ============================================================

/// hex(HMAC-SHA512(secret, payload))
pub fn hmac_sha512_hex(secret: &[u8], payload: &[u8]) -> String {
    // HMAC 接受任意长度密钥，new_from_slice 不会失败
    let mut mac = <HmacSha512 as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// 常量时间校验 HMAC-SHA512 签名（hex 编码，大小写不敏感）
pub fn verify_hmac_sha512(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let Ok(provided) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = <HmacSha512 as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

/// hex(SHA-256(input))
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// 常量时间字符串比较
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// 生成 URL 安全的随机令牌（CSRF token 等）
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

// ============================================================
// 脱敏辅助函数
// ============================================================

/// 邮箱脱敏：保留首字符和 @ 后域名
///
/// 示例: `ada@farm.ng` -> `a***@farm.ng`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => match local.chars().next() {
            Some(first) => format!("{first}***@{domain}"),
            None => format!("***@{domain}"),
        },
        None => "***".to_string(),
    }
}

/// 手机号脱敏：保留前 3 位和后 4 位，不足 7 位全部遮蔽
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 7 {
        return "****".to_string();
    }
    let prefix: String = digits[..3].iter().collect();
    let suffix: String = digits[digits.len() - 4..].iter().collect();
    format!("{prefix}****{suffix}")
}

/// 银行账号脱敏：仅保留后 4 位
///
/// 示例: `0123456789` -> `******6789`
pub fn mask_account_number(account: &str) -> String {
    let chars: Vec<char> = account.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{visible}", "*".repeat(chars.len() - 4))
}

/// IP 地址脱敏：保留前两段
pub fn mask_ip(ip: &str) -> String {
    let v4: Vec<&str> = ip.split('.').collect();
    if v4.len() == 4 {
        return format!("{}.{}.*.*", v4[0], v4[1]);
    }
    let v6: Vec<&str> = ip.split(':').collect();
    if v6.len() >= 3 {
        return format!("{}:{}:*:*", v6[0], v6[1]);
    }
    "***".to_string()
}
