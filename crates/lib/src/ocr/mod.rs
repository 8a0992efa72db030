//! Text recognition for inbound pictures.
//!
//! The provider is behind [`OcrClient`]; [`reply_for_image`] turns its result into the
//! text reply, surfacing provider errors to the user verbatim.

mod tencent;

pub use tencent::{authorization, TencentOcrClient};

use crate::wechat::Reply;
use async_trait::async_trait;

/// First line of every successful OCR reply.
pub const OCR_BANNER: &str = "检测到以下文本:\n\n";

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("request api error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("an API error has returned: [TencentCloudSDKError] Code={code}, Message={message}, RequestId={request_id}")]
    Api {
        code: String,
        message: String,
        request_id: String,
    },
    #[error("request api error: malformed response: {0}")]
    Decode(String),
}

/// Image URL in, detected text lines out (provider order).
#[async_trait]
pub trait OcrClient: Send + Sync {
    async fn recognize(&self, image_url: &str) -> Result<Vec<String>, OcrError>;
}

/// Banner followed by one line per detection.
pub fn format_detections(lines: &[String]) -> String {
    let mut out = String::from(OCR_BANNER);
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Run OCR on `pic_url` and build the reply. Never fails: errors become the reply text.
pub async fn reply_for_image(ocr: &dyn OcrClient, pic_url: &str) -> Reply {
    log::debug!("ocr: recognizing {}", pic_url);
    match ocr.recognize(pic_url).await {
        Ok(lines) => Reply::text(format_detections(&lines)),
        Err(e) => {
            log::warn!("ocr failed for {}: {}", pic_url, e);
            Reply::text(e.to_string())
        }
    }
}
