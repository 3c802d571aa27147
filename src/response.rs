// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应模块
//!
//! - [`ResponseBuffer`]：每个请求一个的内存缓冲区。处理器写入的头部、正文和状态码在
//!   处理器结束之前都不会到达真实连接。
//! - [`Response`]：处理器结束后定稿的响应。状态行和 `Content-Length` 直到此时才确定：
//!   正文为空时不声明长度，否则声明精确的字节数。

use std::io::{self, Write};

use bytes::Bytes;
use chrono::prelude::*;
use log::warn;

use crate::{headers::Headers, param::*};

/// 由框架在定稿时写出的头部，处理器设置的同名头部会被丢弃
const FRAMING_HEADERS: [&str; 4] = ["Content-Length", "Date", "Server", "Connection"];

/// 单次使用的响应缓冲区
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    headers: Headers,
    body: Vec<u8>,
    status: Option<u16>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// 显式设置状态码。未设置时使用动作的返回值。
    pub fn set_status(&mut self, code: u16) -> &mut Self {
        self.status = Some(code);
        self
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// 已写入的正文字节数
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.body
    }

    /// 丢弃已缓冲的头部、正文与状态码
    pub fn reset(&mut self) {
        self.headers.clear();
        self.body.clear();
        self.status = None;
    }

    /// 定稿：`returned` 为动作返回的状态码，显式设置的状态码优先。
    pub fn into_response(self, returned: u16) -> Response {
        let status_code = self.status.unwrap_or(returned);
        Response::new(status_code, self.headers, self.body)
    }
}

impl Write for ResponseBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 定稿后的 HTTP 响应
#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    date: DateTime<Utc>,
    server_name: String,
    headers: Headers,
    content: Option<Bytes>,
}

impl Response {
    pub fn new(status_code: u16, mut headers: Headers, body: Vec<u8>) -> Self {
        for name in FRAMING_HEADERS {
            if headers.contains(name) {
                warn!("处理器设置的{}头部由框架管理，已忽略", name);
                headers.remove(name);
            }
        }
        Self {
            version: HttpVersion::V1_1,
            status_code,
            information: reason_phrase(status_code).to_string(),
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            headers,
            content: match body.is_empty() {
                true => None,
                false => Some(Bytes::from(body)),
            },
        }
    }

    /// 仅带状态码、没有正文的响应，用于请求无法解析等连接层错误
    pub fn from_status_code(code: u16) -> Self {
        Self::new(code, Headers::new(), Vec::new())
    }

    /// 状态行与全部响应头，以空行结束。
    ///
    /// 正文为空时不输出 `Content-Length`；连接在响应后关闭，客户端据此判定正文结束。
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/{} {} {}{}",
            self.version, self.status_code, self.information, CRLF
        );
        head.push_str(&["Date: ", &format_date(&self.date), CRLF].concat());
        head.push_str(&["Server: ", &self.server_name, CRLF].concat());
        for (name, value) in self.headers.iter() {
            head.push_str(&[name, ": ", value, CRLF].concat());
        }
        if let Some(length) = self.content_length() {
            head.push_str(&["Content-Length: ", &length.to_string(), CRLF].concat());
        }
        head.push_str(&["Connection: close", CRLF, CRLF].concat());
        head.into_bytes()
    }

    /// 完整的响应报文
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = self.head_bytes();
        if let Some(c) = &self.content {
            bytes.extend_from_slice(c);
        }
        bytes
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    /// 声明的正文长度；`None` 表示没有正文
    pub fn content_length(&self) -> Option<usize> {
        self.content.as_ref().map(|c| c.len())
    }
}

/// IMF-fixdate，例如 `Sun, 06 Nov 1994 08:49:37 GMT`
fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_date() {
        let date = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(format_date(&date), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_empty_buffer_has_no_declared_length() {
        let buffer = ResponseBuffer::new();
        let response = buffer.into_response(204);
        let text = String::from_utf8(response.as_bytes()).unwrap();

        assert_eq!(response.content_length(), None);
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_buffered_bytes_are_copied_verbatim() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let mut buffer = ResponseBuffer::new();
        buffer.write_all(&payload).unwrap();
        assert_eq!(buffer.len(), 256);

        let response = buffer.into_response(200);
        let bytes = response.as_bytes();
        let head = String::from_utf8_lossy(&response.head_bytes()).to_string();

        assert_eq!(response.content_length(), Some(256));
        assert!(head.contains("Content-Length: 256\r\n"));
        assert_eq!(&bytes[bytes.len() - 256..], payload.as_slice());
    }

    #[test]
    fn test_headers_are_emitted_before_body() {
        let mut buffer = ResponseBuffer::new();
        buffer.headers_mut().add("Content-Type", "text/plain; charset=UTF-8");
        write!(buffer, "Hello").unwrap();

        let text = String::from_utf8(buffer.into_response(200).as_bytes()).unwrap();
        let header_pos = text.find("Content-Type: text/plain; charset=UTF-8").unwrap();
        let body_pos = text.find("\r\n\r\nHello").unwrap();

        assert!(header_pos < body_pos);
        assert!(text.ends_with("Hello"));
    }

    #[test]
    fn test_framing_headers_from_handler_are_ignored() {
        let mut buffer = ResponseBuffer::new();
        buffer
            .headers_mut()
            .add("content-length", "999")
            .add("Connection", "keep-alive")
            .add("Server", "nginx")
            .add("Date", "yesterday")
            .add("Expires", "0");
        write!(buffer, "hello").unwrap();

        let response = buffer.into_response(200);
        let text = String::from_utf8(response.as_bytes()).unwrap();

        assert_eq!(text.matches("Content-Length").count(), 1);
        assert!(text.contains("Content-Length: 5\r\n"));
        assert_eq!(text.matches("Connection").count(), 1);
        assert!(text.contains("Connection: close\r\n"));
        assert!(!text.contains("nginx"));
        assert!(!text.contains("yesterday"));
        assert_eq!(response.headers().get("Expires"), Some("0"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_handler_content_length_on_empty_body_is_dropped() {
        let mut buffer = ResponseBuffer::new();
        buffer.headers_mut().add("Content-Length", "10");
        let text = String::from_utf8(buffer.into_response(204).as_bytes()).unwrap();
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn test_explicit_status_overrides_returned() {
        let mut buffer = ResponseBuffer::new();
        buffer.set_status(201);
        assert_eq!(buffer.into_response(200).status_code(), 201);

        let buffer = ResponseBuffer::new();
        assert_eq!(buffer.into_response(200).status_code(), 200);
    }

    #[test]
    fn test_reset_discards_everything() {
        let mut buffer = ResponseBuffer::new();
        buffer.headers_mut().add("Expires", "0");
        buffer.set_status(418);
        write!(buffer, "partial").unwrap();

        buffer.reset();

        assert!(buffer.is_empty());
        assert!(buffer.headers().is_empty());
        assert_eq!(buffer.status(), None);
    }

    #[test]
    fn test_response_status_line_and_standard_headers() {
        let text = String::from_utf8(Response::from_status_code(404).as_bytes()).unwrap();

        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Server: webrouter\r\n"));
        assert!(text.contains("Date: "));
        assert!(text.contains("Connection: close\r\n"));
    }

    #[test]
    fn test_unregistered_status_code_has_empty_reason() {
        let response = Response::from_status_code(299);
        assert_eq!(response.information(), "");
        assert!(String::from_utf8(response.as_bytes()).unwrap().starts_with("HTTP/1.1 299 \r\n"));
    }
}
