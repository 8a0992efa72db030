//! Inbound message dispatch.
//!
//! Two closed tables: [`Route`] picks a handler by message type, [`Command`] picks a text
//! command by exact content. Both are plain enums resolved with exhaustive matches, so a new
//! message type or keyword has to be handled explicitly.

use crate::animal;
use crate::context::BotContext;
use crate::ocr;
use crate::wechat::{EventType, InboundMessage, MsgType, Reply};

/// Default informational reply; also sent as the welcome message on subscribe.
pub const DEFAULT_REPLY: &str = "这是默认的回复: \n\n- 发送图片可以识别图片中的文本\n- 发送「动物」获取一张随机动物图片\n";

pub const ANIMAL_KEYWORD: &str = "动物";

/// Handler selected for an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Text content.
    Text(&'a str),
    /// Picture URL.
    Image(&'a str),
    /// Event subtype, if the callback carried one.
    Event(Option<&'a EventType>),
    /// Wire name of a type with no handler.
    Unsupported(&'a str),
}

impl<'a> Route<'a> {
    pub fn of(msg: &'a InboundMessage) -> Self {
        match &msg.msg_type {
            MsgType::Text => Route::Text(&msg.content),
            MsgType::Image => Route::Image(&msg.pic_url),
            MsgType::Event => Route::Event(msg.event.as_ref()),
            MsgType::Voice
            | MsgType::Video
            | MsgType::ShortVideo
            | MsgType::Location
            | MsgType::Link
            | MsgType::Other(_) => Route::Unsupported(msg.msg_type.as_str()),
        }
    }
}

/// Text commands, matched on the exact message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Animal,
}

impl Command {
    pub fn parse(content: &str) -> Option<Self> {
        match content {
            ANIMAL_KEYWORD => Some(Command::Animal),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Command::Animal => ANIMAL_KEYWORD,
        }
    }
}

/// Select and run the handler for `msg`. `None` means "no reply", which is not an error.
pub async fn dispatch(ctx: &BotContext, msg: &InboundMessage) -> Option<Reply> {
    let route = Route::of(msg);
    log::debug!("dispatch: {:?} from {}", route, msg.from_user_name);
    match route {
        Route::Text(content) => Some(handle_text(ctx, content).await),
        Route::Image(pic_url) => Some(ocr::reply_for_image(ctx.ocr.as_ref(), pic_url).await),
        Route::Event(event) => handle_event(event),
        Route::Unsupported(msg_type) => Some(unsupported(msg_type)),
    }
}

async fn handle_text(ctx: &BotContext, content: &str) -> Reply {
    match Command::parse(content) {
        Some(Command::Animal) => {
            animal::reply_for_animal(ctx.animals.as_ref(), ctx.media.as_ref()).await
        }
        None => Reply::text(DEFAULT_REPLY),
    }
}

/// Welcome on subscribe; every other event is acknowledged without a reply.
pub fn handle_event(event: Option<&EventType>) -> Option<Reply> {
    match event {
        Some(EventType::Subscribe) => Some(Reply::text(DEFAULT_REPLY)),
        Some(_) | None => None,
    }
}

pub fn unsupported(msg_type: &str) -> Reply {
    Reply::text(format!("不支持处理的消息类型: {}", msg_type))
}
