//! supervisord용 최소 XML-RPC 코덱
//!
//! supervisord는 `/RPC2`에서 XML-RPC만 말합니다. 실제로 오가는 타입은
//! int/boolean/string/struct/array(+fault)가 전부라서, 외부 XML 크레이트 없이
//! 이 부분집합만 직접 처리합니다. (RCON 프레이밍을 직접 구현한 것과 같은 접근)

use super::ProtocolError;
use std::collections::BTreeMap;

/// XML-RPC 값
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// struct 멤버 조회
    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Struct(members) => members.get(name),
            _ => None,
        }
    }

    /// struct 멤버를 문자열로 조회 (없거나 타입이 다르면 None)
    pub fn member_str(&self, name: &str) -> Option<&str> {
        self.member(name).and_then(Value::as_str)
    }

    /// struct 멤버를 정수로 조회
    pub fn member_i64(&self, name: &str) -> Option<i64> {
        self.member(name).and_then(Value::as_i64)
    }
}

/// methodCall 문서 생성
pub fn request(method: &str, params: &[Value]) -> String {
    let mut body = String::with_capacity(256);
    body.push_str("<?xml version=\"1.0\"?>");
    body.push_str("<methodCall><methodName>");
    body.push_str(&escape(method));
    body.push_str("</methodName><params>");
    for param in params {
        body.push_str("<param>");
        write_value(&mut body, param);
        body.push_str("</param>");
    }
    body.push_str("</params></methodCall>");
    body
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(n) => {
            out.push_str("<int>");
            out.push_str(&n.to_string());
            out.push_str("</int>");
        }
        Value::Bool(b) => {
            out.push_str("<boolean>");
            out.push_str(if *b { "1" } else { "0" });
            out.push_str("</boolean>");
        }
        Value::Str(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s));
            out.push_str("</string>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name));
                out.push_str("</name>");
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// methodResponse 문서 파싱
///
/// fault 응답은 `ProtocolError::RemoteFault`로, 문서 구조가 깨진 경우는
/// 프로토콜 수준 실패이므로 `ConnectionError`로 변환합니다.
pub fn parse_response(xml: &str) -> Result<Value, ProtocolError> {
    let mut parser = Parser { src: xml, pos: 0 };

    parser.expect_open("methodResponse")?;
    if parser.peek_open("fault") {
        parser.expect_open("fault")?;
        let fault = parser.parse_value()?;
        let code = fault.member_i64("faultCode").unwrap_or(0);
        let message = fault
            .member_str("faultString")
            .unwrap_or("unknown fault")
            .to_string();
        return Err(ProtocolError::RemoteFault { code, message });
    }

    parser.expect_open("params")?;
    parser.expect_open("param")?;
    parser.parse_value()
}

/// 커서 기반의 단순 파서 — 태그 사이 공백은 무시
struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn malformed(&self, what: &str) -> ProtocolError {
        ProtocolError::ConnectionError(format!("Malformed XML-RPC response: {}", what))
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.src[self.pos..].chars().next() {
            if ch.is_whitespace() {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
        // XML 선언(<?xml ...?>) 건너뛰기
        if self.src[self.pos..].starts_with("<?") {
            if let Some(end) = self.src[self.pos..].find("?>") {
                self.pos += end + 2;
                self.skip_ws();
            }
        }
    }

    /// 다음 여는 태그가 `name`인지 확인 (소비하지 않음)
    fn peek_open(&mut self, name: &str) -> bool {
        self.skip_ws();
        let rest = &self.src[self.pos..];
        rest.starts_with(&format!("<{}>", name)) || rest.starts_with(&format!("<{}/>", name))
    }

    fn expect_open(&mut self, name: &str) -> Result<(), ProtocolError> {
        self.skip_ws();
        let tag = format!("<{}>", name);
        if self.src[self.pos..].starts_with(&tag) {
            self.pos += tag.len();
            Ok(())
        } else {
            Err(self.malformed(&format!("expected <{}>", name)))
        }
    }

    fn expect_close(&mut self, name: &str) -> Result<(), ProtocolError> {
        self.skip_ws();
        let tag = format!("</{}>", name);
        if self.src[self.pos..].starts_with(&tag) {
            self.pos += tag.len();
            Ok(())
        } else {
            Err(self.malformed(&format!("expected </{}>", name)))
        }
    }

    /// 현재 위치부터 `close` 태그 직전까지의 텍스트를 소비
    fn take_text_until(&mut self, close: &str) -> Result<&'a str, ProtocolError> {
        let end = self.src[self.pos..]
            .find(close)
            .ok_or_else(|| self.malformed(&format!("missing {}", close)))?;
        let text = &self.src[self.pos..self.pos + end];
        self.pos += end + close.len();
        Ok(text)
    }

    fn parse_value(&mut self) -> Result<Value, ProtocolError> {
        self.expect_open("value")?;
        self.skip_ws();
        let rest = &self.src[self.pos..];

        let value = if rest.starts_with("<int>") || rest.starts_with("<i4>") {
            let tag = if rest.starts_with("<int>") { "int" } else { "i4" };
            self.expect_open(tag)?;
            let text = self.take_text_until(&format!("</{}>", tag))?;
            let n = text
                .trim()
                .parse::<i64>()
                .map_err(|_| self.malformed("invalid integer"))?;
            Value::Int(n)
        } else if rest.starts_with("<boolean>") {
            self.expect_open("boolean")?;
            let text = self.take_text_until("</boolean>")?;
            Value::Bool(text.trim() == "1")
        } else if rest.starts_with("<string>") {
            self.expect_open("string")?;
            let text = self.take_text_until("</string>")?;
            Value::Str(unescape(text))
        } else if rest.starts_with("<array>") {
            self.expect_open("array")?;
            self.expect_open("data")?;
            let mut items = Vec::new();
            while self.peek_open("value") {
                items.push(self.parse_value()?);
            }
            self.expect_close("data")?;
            self.expect_close("array")?;
            Value::Array(items)
        } else if rest.starts_with("<struct>") {
            self.expect_open("struct")?;
            let mut members = BTreeMap::new();
            while self.peek_open("member") {
                self.expect_open("member")?;
                self.expect_open("name")?;
                let name = unescape(self.take_text_until("</name>")?);
                let member = self.parse_value()?;
                self.expect_close("member")?;
                members.insert(name, member);
            }
            self.expect_close("struct")?;
            Value::Struct(members)
        } else if rest.starts_with("<nil/>") {
            self.pos += "<nil/>".len();
            Value::Nil
        } else if rest.starts_with("</value>") {
            // <value></value> — 빈 문자열
            Value::Str(String::new())
        } else if rest.starts_with('<') {
            // 알 수 없는 스칼라 태그(double 등)는 문자열로 강등
            let name_end = rest
                .find('>')
                .ok_or_else(|| self.malformed("unterminated tag"))?;
            let tag = rest[1..name_end].to_string();
            self.pos += name_end + 1;
            let text = self.take_text_until(&format!("</{}>", tag))?;
            Value::Str(unescape(text))
        } else {
            // 태그 없는 <value>텍스트</value>는 문자열로 취급
            let text = self.take_text_until("</value>")?;
            return Ok(Value::Str(unescape(text)));
        };

        self.expect_close("value")?;
        Ok(value)
    }
}
