//! Cloudinary 签名直传
//!
//! 服务端只负责签名，文件由客户端直接上传到 Cloudinary。

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use agri_shared::config::CloudinaryConfig;
use agri_shared::crypto::sha256_hex;

use crate::error::MarketError;

const ROOT_FOLDER: &str = "agricompass";

/// 上传用途，决定存放目录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPurpose {
    Listing,
    Avatar,
    Verification,
}

impl UploadPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Avatar => "avatar",
            Self::Verification => "verification",
        }
    }

    pub fn folder(&self) -> String {
        format!("{}/{}", ROOT_FOLDER, self.as_str())
    }
}

impl FromStr for UploadPurpose {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listing" => Ok(Self::Listing),
            "avatar" => Ok(Self::Avatar),
            "verification" => Ok(Self::Verification),
            other => Err(MarketError::Validation(format!("不支持的上传用途: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSignature {
    pub cloud_name: String,
    pub api_key: String,
    pub timestamp: i64,
    pub folder: String,
    pub signature: String,
    pub signature_algorithm: &'static str,
}

#[derive(Debug, Clone)]
pub struct CloudinarySigner {
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

impl CloudinarySigner {
    /// 三项配置不全时返回 None
    pub fn from_config(config: &CloudinaryConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        Some(Self {
            cloud_name: config.cloud_name.clone()?,
            api_key: config.api_key.clone()?,
            api_secret: config.api_secret.clone()?,
        })
    }

    pub fn sign_upload(&self, purpose: UploadPurpose, now: DateTime<Utc>) -> UploadSignature {
        let timestamp = now.timestamp();
        let folder = purpose.folder();

        let mut params = BTreeMap::new();
        params.insert("folder", folder.clone());
        params.insert("timestamp", timestamp.to_string());

        UploadSignature {
            cloud_name: self.cloud_name.clone(),
            api_key: self.api_key.clone(),
            timestamp,
            folder,
            signature: sign_params(&params, &self.api_secret),
            signature_algorithm: "sha256",
        }
    }
}

/// hex(SHA-256(按键名排序的 `k=v` 以 `&` 连接 + api_secret))
pub fn sign_params(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let joined = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    sha256_hex(&format!("{joined}{api_secret}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn configured() -> CloudinaryConfig {
        CloudinaryConfig {
            cloud_name: Some("demo".to_string()),
            api_key: Some("1234567890".to_string()),
            api_secret: Some("secret".to_string()),
        }
    }

    #[test]
    fn test_unconfigured_signer_is_none() {
        assert!(CloudinarySigner::from_config(&CloudinaryConfig::default()).is_none());

        let partial = CloudinaryConfig {
            api_secret: None,
            ..configured()
        };
        assert!(CloudinarySigner::from_config(&partial).is_none());
    }

    #[test]
    fn test_sign_upload() {
        let signer = CloudinarySigner::from_config(&configured()).unwrap();
        let now = Utc.timestamp_opt(1_717_236_000, 0).unwrap();

        let sig = signer.sign_upload(UploadPurpose::Listing, now);
        assert_eq!(sig.cloud_name, "demo");
        assert_eq!(sig.timestamp, 1_717_236_000);
        assert_eq!(sig.folder, "agricompass/listing");
        assert_eq!(sig.signature_algorithm, "sha256");
        assert_eq!(
            sig.signature,
            sha256_hex("folder=agricompass/listing&timestamp=1717236000secret")
        );
    }

    #[test]
    fn test_sign_params_sorted_and_skips_empty() {
        let mut params = BTreeMap::new();
        params.insert("timestamp", "1".to_string());
        params.insert("eager", String::new());
        params.insert("folder", "f".to_string());
        assert_eq!(sign_params(&params, "s"), sha256_hex("folder=f&timestamp=1s"));
    }

    #[test]
    fn test_upload_purpose_parse() {
        assert_eq!("avatar".parse::<UploadPurpose>().unwrap(), UploadPurpose::Avatar);
        assert_eq!(UploadPurpose::Verification.folder(), "agricompass/verification");
        assert!("video".parse::<UploadPurpose>().is_err());
    }
}
