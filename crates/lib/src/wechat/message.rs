//! Inbound callback XML and passive reply XML.

use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed message xml: {0}")]
    Decode(#[from] quick_xml::de::DeError),
    #[error("encoding reply xml: {0}")]
    Encode(String),
}

/// Message type as delivered in `<MsgType>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgType {
    Text,
    Image,
    Voice,
    Video,
    ShortVideo,
    Location,
    Link,
    Event,
    Other(String),
}

impl MsgType {
    pub fn parse(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            "image" => Self::Image,
            "voice" => Self::Voice,
            "video" => Self::Video,
            "shortvideo" => Self::ShortVideo,
            "location" => Self::Location,
            "link" => Self::Link,
            "event" => Self::Event,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name, untranslated.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Voice => "voice",
            Self::Video => "video",
            Self::ShortVideo => "shortvideo",
            Self::Location => "location",
            Self::Link => "link",
            Self::Event => "event",
            Self::Other(s) => s,
        }
    }
}

/// Event subtype from `<Event>`. WeChat mixes cases (`subscribe`, `SCAN`), so parsing ignores case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    Subscribe,
    Unsubscribe,
    Scan,
    Location,
    Click,
    View,
    Other(String),
}

impl EventType {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "scan" => Self::Scan,
            "location" => Self::Location,
            "click" => Self::Click,
            "view" => Self::View,
            _ => Self::Other(s.to_string()),
        }
    }
}

/// Raw callback body. Every field is optional on the wire; missing ones become empty.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawMessage {
    #[serde(default)]
    to_user_name: String,
    #[serde(default)]
    from_user_name: String,
    #[serde(default)]
    create_time: i64,
    #[serde(default)]
    msg_type: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    pic_url: String,
    #[serde(default)]
    media_id: String,
    #[serde(default)]
    msg_id: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    event_key: String,
}

/// A parsed callback. Immutable and dropped once the reply is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// The official account (our side).
    pub to_user_name: String,
    /// The user's OpenID.
    pub from_user_name: String,
    pub create_time: i64,
    pub msg_id: String,
    pub msg_type: MsgType,
    /// Text messages only.
    pub content: String,
    /// Image messages only.
    pub pic_url: String,
    pub media_id: String,
    /// Event messages only.
    pub event: Option<EventType>,
    pub event_key: String,
}

impl InboundMessage {
    pub fn from_xml(body: &str) -> Result<Self, MessageError> {
        let raw: RawMessage = quick_xml::de::from_str(body)?;
        Ok(Self {
            to_user_name: raw.to_user_name,
            from_user_name: raw.from_user_name,
            create_time: raw.create_time,
            msg_id: raw.msg_id,
            msg_type: MsgType::parse(raw.msg_type.trim()),
            content: raw.content,
            pic_url: raw.pic_url,
            media_id: raw.media_id,
            event: raw.event.as_deref().map(|e| EventType::parse(e.trim())),
            event_key: raw.event_key,
        })
    }

    /// Plain text message, used when building fixtures.
    pub fn text(from: &str, to: &str, content: &str) -> Self {
        Self {
            to_user_name: to.to_string(),
            from_user_name: from.to_string(),
            create_time: 0,
            msg_id: String::new(),
            msg_type: MsgType::Text,
            content: content.to_string(),
            pic_url: String::new(),
            media_id: String::new(),
            event: None,
            event_key: String::new(),
        }
    }
}

/// The single outbound payload for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text { content: String },
    Image { media_id: String },
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn image(media_id: impl Into<String>) -> Self {
        Self::Image {
            media_id: media_id.into(),
        }
    }

    fn msg_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
        }
    }

    /// Serialize as a passive reply to `inbound`: sender and receiver are swapped.
    pub fn to_xml(&self, inbound: &InboundMessage, create_time: i64) -> Result<String, MessageError> {
        let mut w = Writer::new(Vec::new());
        start(&mut w, "xml")?;
        cdata_element(&mut w, "ToUserName", &inbound.from_user_name)?;
        cdata_element(&mut w, "FromUserName", &inbound.to_user_name)?;
        text_element(&mut w, "CreateTime", &create_time.to_string())?;
        cdata_element(&mut w, "MsgType", self.msg_type())?;
        match self {
            Self::Text { content } => cdata_element(&mut w, "Content", content)?,
            Self::Image { media_id } => {
                start(&mut w, "Image")?;
                cdata_element(&mut w, "MediaId", media_id)?;
                end(&mut w, "Image")?;
            }
        }
        end(&mut w, "xml")?;
        String::from_utf8(w.into_inner()).map_err(|e| MessageError::Encode(e.to_string()))
    }
}

fn write(w: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), MessageError> {
    w.write_event(event)
        .map_err(|e| MessageError::Encode(e.to_string()))
}

pub(super) fn start(w: &mut Writer<Vec<u8>>, name: &str) -> Result<(), MessageError> {
    write(w, Event::Start(BytesStart::new(name)))
}

pub(super) fn end(w: &mut Writer<Vec<u8>>, name: &str) -> Result<(), MessageError> {
    write(w, Event::End(BytesEnd::new(name)))
}

pub(super) fn text_element(w: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<(), MessageError> {
    start(w, name)?;
    write(w, Event::Text(BytesText::new(value)))?;
    end(w, name)
}

/// CDATA cannot contain `]]>`; such values fall back to escaped text.
pub(super) fn cdata_element(w: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<(), MessageError> {
    start(w, name)?;
    if value.contains("]]>") {
        write(w, Event::Text(BytesText::new(value)))?;
    } else {
        write(w, Event::CData(BytesCData::new(value)))?;
    }
    end(w, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT_XML: &str = "<xml>\
        <ToUserName><![CDATA[gh_account]]></ToUserName>\
        <FromUserName><![CDATA[openid_user]]></FromUserName>\
        <CreateTime>1348831860</CreateTime>\
        <MsgType><![CDATA[text]]></MsgType>\
        <Content><![CDATA[动物]]></Content>\
        <MsgId>1234567890123456</MsgId>\
        </xml>";

    #[test]
    fn parses_text_message() {
        let msg = InboundMessage::from_xml(TEXT_XML).unwrap();
        assert_eq!(msg.msg_type, MsgType::Text);
        assert_eq!(msg.content, "动物");
        assert_eq!(msg.from_user_name, "openid_user");
        assert_eq!(msg.to_user_name, "gh_account");
        assert_eq!(msg.create_time, 1348831860);
        assert_eq!(msg.msg_id, "1234567890123456");
        assert!(msg.event.is_none());
    }

    #[test]
    fn parses_image_message() {
        let xml = "<xml><ToUserName><![CDATA[a]]></ToUserName><FromUserName><![CDATA[b]]></FromUserName>\
            <CreateTime>1</CreateTime><MsgType><![CDATA[image]]></MsgType>\
            <PicUrl><![CDATA[http://mmbiz.example/pic.jpg]]></PicUrl><MediaId><![CDATA[m1]]></MediaId>\
            <MsgId>2</MsgId></xml>";
        let msg = InboundMessage::from_xml(xml).unwrap();
        assert_eq!(msg.msg_type, MsgType::Image);
        assert_eq!(msg.pic_url, "http://mmbiz.example/pic.jpg");
        assert_eq!(msg.media_id, "m1");
    }

    #[test]
    fn parses_event_case_insensitively() {
        let xml = "<xml><ToUserName><![CDATA[a]]></ToUserName><FromUserName><![CDATA[b]]></FromUserName>\
            <CreateTime>1</CreateTime><MsgType><![CDATA[event]]></MsgType><Event><![CDATA[SCAN]]></Event>\
            <EventKey><![CDATA[qr_1]]></EventKey></xml>";
        let msg = InboundMessage::from_xml(xml).unwrap();
        assert_eq!(msg.msg_type, MsgType::Event);
        assert_eq!(msg.event, Some(EventType::Scan));
        assert_eq!(msg.event_key, "qr_1");
    }

    #[test]
    fn unknown_type_keeps_wire_name() {
        let xml = "<xml><MsgType><![CDATA[miniprogrampage]]></MsgType></xml>";
        let msg = InboundMessage::from_xml(xml).unwrap();
        assert_eq!(msg.msg_type, MsgType::Other("miniprogrampage".to_string()));
        assert_eq!(msg.msg_type.as_str(), "miniprogrampage");
        assert_eq!(MsgType::parse("voice").as_str(), "voice");
    }

    #[test]
    fn garbage_body_is_an_error() {
        assert!(InboundMessage::from_xml("not xml at all <").is_err());
    }

    #[test]
    fn text_reply_swaps_users() {
        let inbound = InboundMessage::from_xml(TEXT_XML).unwrap();
        let xml = Reply::text("hello").to_xml(&inbound, 42).unwrap();
        assert_eq!(
            xml,
            "<xml><ToUserName><![CDATA[openid_user]]></ToUserName>\
             <FromUserName><![CDATA[gh_account]]></FromUserName>\
             <CreateTime>42</CreateTime>\
             <MsgType><![CDATA[text]]></MsgType>\
             <Content><![CDATA[hello]]></Content></xml>"
        );
    }

    #[test]
    fn image_reply_nests_media_id() {
        let inbound = InboundMessage::text("u", "gh", "");
        let xml = Reply::image("M123").to_xml(&inbound, 1).unwrap();
        assert!(xml.contains("<MsgType><![CDATA[image]]></MsgType>"));
        assert!(xml.contains("<Image><MediaId><![CDATA[M123]]></MediaId></Image>"));
    }

    #[test]
    fn cdata_terminator_in_content_is_escaped() {
        let inbound = InboundMessage::text("u", "gh", "");
        let xml = Reply::text("a]]>b").to_xml(&inbound, 1).unwrap();
        assert!(xml.contains("<Content>a]]&gt;b</Content>"));
    }
}
