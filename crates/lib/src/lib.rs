//! wxbot core library: WeChat callback handling, dispatch, OCR and media upload,
//! used by the `wxbot` binary.

pub mod animal;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod gateway;
pub mod ocr;
pub mod wechat;
