// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求解析模块
//!
//! 负责把从 TCP 流中读到的请求头字节解析为 `Request`：
//! 1. 请求行（Request-Line）的解析（方法记号、路径与查询串、版本）。
//! 2. 全部请求头按原始顺序保存在 [`Headers`] 中。
//! 3. 请求体由连接层按 `Content-Length` 读取后通过 [`Request::with_body`] 附加。
//!
//! 方法记号在这里不做校验：未知方法要交给路由阶段转为 501，而不是在解析阶段拒绝。

use std::net::SocketAddr;

use bytes::Bytes;
use log::error;

use crate::{exception::Exception, headers::Headers, param::*, util::percent_decode};

/// 请求头与请求体之间的分隔符
pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// 一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// 原始方法记号，未做大小写转换
    method: String,
    /// 解码后的路径部分（不含查询串）
    path: String,
    /// 原始查询串（不含 `?`）
    query: Option<String>,
    /// HTTP 协议版本
    version: HttpVersion,
    headers: Headers,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// 缓冲区中若包含 `\r\n\r\n`，只解析其之前的请求头部分；之后的字节由调用方按
    /// `Content-Length` 作为请求体处理。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 请求序号，用于在多任务环境下追踪日志。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let head = match find_head_end(buffer) {
            Some(end) => &buffer[..end],
            None => buffer,
        };
        let request_string = match std::str::from_utf8(head) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut request_lines = request_string.split(CRLF);

        // 1. 解析请求行 (e.g., "GET /greeting?who=Ada HTTP/1.1")
        let request_line = request_lines.next().unwrap_or("");
        let parts: Vec<&str> = request_line.split(' ').filter(|p| !p.is_empty()).collect();
        if parts.len() != 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
            return Err(Exception::MalformedRequest);
        }

        let method = parts[0].to_string();

        let version = match parts[2].to_uppercase().as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            other => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, other);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        let (path, query) = match parts[1].split_once('?') {
            Some((p, q)) => (percent_decode(p), Some(q.to_string())),
            None => (percent_decode(parts[1]), None),
        };

        // 2. 逐行解析 Headers，遇到空行即结束
        let mut headers = Headers::new();
        for line in request_lines {
            if line.is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.add(name.trim(), value.trim());
                }
                None => {
                    error!("[ID{}]HTTP请求头格式不正确：{}", id, line);
                    return Err(Exception::MalformedRequest);
                }
            }
        }

        Ok(Self {
            method,
            path,
            query,
            version,
            headers,
            body: Bytes::new(),
            remote_addr: None,
        })
    }

    /// 附加请求体
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// 附加对端地址
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// `Content-Length` 声明的请求体长度，缺失时为 0。
    pub fn content_length(&self) -> Result<usize, Exception> {
        match self.headers.get("Content-Length") {
            Some(v) => v.parse::<usize>().map_err(|_| Exception::MalformedRequest),
            None => Ok(0),
        }
    }
}

// --- Getter 访问器实现 ---

impl Request {
    /// 获取原始方法记号
    pub fn method(&self) -> &str {
        &self.method
    }

    /// 获取解码后的路径（不含查询串）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 获取原始查询串
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// 获取 HTTP 协议版本
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// 获取用户代理字符串
    pub fn user_agent(&self) -> &str {
        self.headers.get("User-Agent").unwrap_or("")
    }
}

/// 返回请求头结束位置（不含 `\r\n\r\n`）
pub fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}
