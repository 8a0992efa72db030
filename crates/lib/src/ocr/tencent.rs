//! Tencent Cloud `GeneralBasicOCR` client (API v3, TC3-HMAC-SHA256 signing).

use super::{OcrClient, OcrError};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

const SERVICE: &str = "ocr";
const ACTION: &str = "GeneralBasicOCR";
const VERSION: &str = "2018-11-19";
const ALGORITHM: &str = "TC3-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: ResponseBody,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(rename = "TextDetections", default)]
    text_detections: Vec<TextDetection>,
    #[serde(rename = "Error", default)]
    error: Option<ApiError>,
    #[serde(rename = "RequestId", default)]
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct TextDetection {
    #[serde(rename = "DetectedText", default)]
    detected_text: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "Code", default)]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

/// OCR over Tencent Cloud. One signed POST per image, no retry.
pub struct TencentOcrClient {
    endpoint: String,
    host: String,
    region: String,
    secret_id: String,
    secret_key: String,
    client: reqwest::Client,
}

impl TencentOcrClient {
    pub fn new(
        endpoint: &str,
        region: &str,
        secret_id: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Self, OcrError> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let host = endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&endpoint)
            .to_string();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint,
            host,
            region: region.to_string(),
            secret_id: secret_id.to_string(),
            secret_key: secret_key.to_string(),
            client,
        })
    }
}

#[async_trait]
impl OcrClient for TencentOcrClient {
    async fn recognize(&self, image_url: &str) -> Result<Vec<String>, OcrError> {
        let payload = serde_json::json!({ "ImageUrl": image_url }).to_string();
        let timestamp = chrono::Utc::now().timestamp();
        let authorization = authorization(
            &self.secret_id,
            &self.secret_key,
            &self.host,
            &payload,
            timestamp,
        );
        let res = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("Authorization", authorization)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-TC-Action", ACTION)
            .header("X-TC-Version", VERSION)
            .header("X-TC-Region", &self.region)
            .header("X-TC-Timestamp", timestamp.to_string())
            .body(payload)
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        let envelope: Envelope = serde_json::from_str(&body).map_err(|e| {
            OcrError::Decode(format!("{} (status {})", e, status.as_u16()))
        })?;
        let response = envelope.response;
        if let Some(err) = response.error {
            return Err(OcrError::Api {
                code: err.code,
                message: err.message,
                request_id: response.request_id,
            });
        }
        Ok(response
            .text_detections
            .into_iter()
            .map(|t| t.detected_text)
            .collect())
    }
}

fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match Hmac::<Sha256>::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Build the `Authorization` header for a JSON POST to `/` at `timestamp` (unix seconds).
pub fn authorization(
    secret_id: &str,
    secret_key: &str,
    host: &str,
    payload: &str,
    timestamp: i64,
) -> String {
    let date = chrono::DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string();
    let signed_headers = "content-type;host";
    let canonical_request = format!(
        "POST\n/\n\ncontent-type:{}\nhost:{}\n\n{}\n{}",
        CONTENT_TYPE,
        host,
        signed_headers,
        sha256_hex(payload)
    );
    let scope = format!("{}/{}/tc3_request", date, SERVICE);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        timestamp,
        scope,
        sha256_hex(&canonical_request)
    );
    let secret_date = hmac_sha256(format!("TC3{}", secret_key).as_bytes(), &date);
    let secret_service = hmac_sha256(&secret_date, SERVICE);
    let secret_signing = hmac_sha256(&secret_service, "tc3_request");
    let signature = hex::encode(hmac_sha256(&secret_signing, &string_to_sign));
    format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, secret_id, scope, signed_headers, signature
    )
}
