//! Collaborators shared by every handler invocation.
//!
//! Built once at startup and handed to the dispatcher by reference; handlers never reach for globals.

use crate::animal::{AnimalFetcher, HttpAnimalFetcher};
use crate::config::Config;
use crate::ocr::{OcrClient, TencentOcrClient};
use crate::wechat::{MediaUploader, WechatMediaClient};
use anyhow::{Context, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct BotContext {
    pub ocr: Arc<dyn OcrClient>,
    pub animals: Arc<dyn AnimalFetcher>,
    pub media: Arc<dyn MediaUploader>,
}

impl BotContext {
    pub fn new(
        ocr: Arc<dyn OcrClient>,
        animals: Arc<dyn AnimalFetcher>,
        media: Arc<dyn MediaUploader>,
    ) -> Self {
        Self { ocr, animals, media }
    }

    /// Real clients: Tencent OCR, the animal API and the official account media library.
    pub fn from_config(config: &Config) -> Result<Self> {
        let ocr = TencentOcrClient::new(
            &config.endpoints.ocr,
            &config.endpoints.ocr_region,
            &config.tencent.secret_id,
            &config.tencent.secret_key,
            config.timeouts.ocr(),
        )
        .context("building ocr client")?;
        let animals = HttpAnimalFetcher::new(&config.endpoints.animal_api, config.timeouts.fetch())
            .context("building animal fetcher")?;
        let media = WechatMediaClient::new(
            &config.endpoints.wechat_api,
            &config.wechat.app_id,
            &config.wechat.app_secret,
            config.timeouts.fetch(),
        )
        .context("building wechat media client")?;
        if config.tencent.secret_id.is_empty() || config.tencent.secret_key.is_empty() {
            log::warn!("tencent credentials not set; image messages will get an OCR error reply");
        }
        if config.wechat.app_id.is_empty() || config.wechat.app_secret.is_empty() {
            log::warn!("wechat app_id/app_secret not set; image replies cannot be uploaded");
        }
        Ok(Self::new(Arc::new(ocr), Arc::new(animals), Arc::new(media)))
    }
}
