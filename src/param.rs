// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由器协议参数与常量模块
//!
//! 该模块定义了 `webrouter` 遵循的 HTTP 协议相关常量和数据结构，包括：
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - 兜底处理器（404/405/500/501）使用的保留键与固定 HTML 片段。
//! - HTTP 方法与版本的强类型枚举。

use std::{collections::HashMap, fmt, str::FromStr};

use lazy_static::lazy_static;

use crate::exception::Exception;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "webrouter";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 根上下文路径。路由表中始终存在该键（可能没有任何方法）。
pub const ROOT_CONTEXT_PATH: &str = "/";

/// 兜底处理器在路由表中的保留键。它们不以 `/` 开头，因此不会出现在对外的路由快照里。
pub const NOT_FOUND_KEY: &str = "404";
pub const METHOD_NOT_ALLOWED_KEY: &str = "405";
pub const INTERNAL_SERVER_ERROR_KEY: &str = "500";
pub const NOT_IMPLEMENTED_KEY: &str = "501";

/// 默认兜底响应体。已有客户端依赖这些文本，修改时需保持逐字节一致。
pub const NOT_FOUND_HTML: &str = "<h1>404 Not Found</h1>No handler found for request URI.";
pub const METHOD_NOT_ALLOWED_HTML: &str =
    "<h1>405 Not Allowed</h1>Request method not allowed for this request URI.";
pub const INTERNAL_SERVER_ERROR_HTML_HEAD: &str = "<h1>500 Internal Server Error</h1>\n<pre><code>";
pub const INTERNAL_SERVER_ERROR_HTML_TAIL: &str = "</code></pre>";
pub const NOT_IMPLEMENTED_HTML: &str = "<h1>501 Not Implemented</h1>Unknown request method.";

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 1xx: 信息响应 (Informational)
        map.insert(100, "Continue");
        map.insert(101, "Switching Protocols");

        // 2xx: 成功响应 (Successful)
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(203, "Non-Authoritative Information");
        map.insert(204, "No Content");
        map.insert(205, "Reset Content");
        map.insert(206, "Partial Content");

        // 3xx: 重定向 (Redirection)
        map.insert(300, "Multiple Choices");
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        // 4xx: 客户端错误 (Client Error)
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(402, "Payment Required");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(406, "Not Acceptable");
        map.insert(408, "Request Timeout");
        map.insert(409, "Conflict");
        map.insert(410, "Gone");
        map.insert(411, "Length Required");
        map.insert(412, "Precondition Failed");
        map.insert(413, "Content Too Large");
        map.insert(414, "URI Too Long");
        map.insert(415, "Unsupported Media Type");
        map.insert(418, "I'm a teapot");
        map.insert(422, "Unprocessable Content");
        map.insert(426, "Upgrade Required");
        map.insert(431, "Request Header Fields Too Large");

        // 5xx: 服务端错误 (Server Error)
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(504, "Gateway Timeout");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

/// 查询状态码的原因短语，未登记的状态码返回空串。
pub fn reason_phrase(code: u16) -> &'static str {
    STATUS_CODES.get(&code).copied().unwrap_or("")
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    /// HTTP/1.0 版本
    V1_0,
    /// HTTP/1.1 版本
    V1_1,
}

/// 路由器能够识别的 HTTP 方法全集。
///
/// 变体的声明顺序就是路由表中的排序顺序，`Allow` 头按此顺序输出。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpRequestMethod {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Post,
    Put,
    Trace,
}

impl HttpRequestMethod {
    /// 按声明顺序列出全部方法
    pub const ALL: [HttpRequestMethod; 8] = [
        HttpRequestMethod::Connect,
        HttpRequestMethod::Delete,
        HttpRequestMethod::Get,
        HttpRequestMethod::Head,
        HttpRequestMethod::Options,
        HttpRequestMethod::Post,
        HttpRequestMethod::Put,
        HttpRequestMethod::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match *self {
            HttpRequestMethod::Connect => "CONNECT",
            HttpRequestMethod::Delete => "DELETE",
            HttpRequestMethod::Get => "GET",
            HttpRequestMethod::Head => "HEAD",
            HttpRequestMethod::Options => "OPTIONS",
            HttpRequestMethod::Post => "POST",
            HttpRequestMethod::Put => "PUT",
            HttpRequestMethod::Trace => "TRACE",
        }
    }
}

impl FromStr for HttpRequestMethod {
    type Err = Exception;

    /// 大小写不敏感地解析方法名，不在方法集合中的记号返回 `UnknownMethod`。
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        HttpRequestMethod::ALL
            .iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(token))
            .copied()
            .ok_or_else(|| Exception::UnknownMethod(token.to_string()))
    }
}

impl fmt::Display for HttpVersion {
    /// 将枚举格式化为 HTTP 报文中的版本字符串
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "1.0"),
            HttpVersion::V1_1 => write!(f, "1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 以 `", "` 拼接方法列表，用于 `Allow` 头
pub fn join_methods(methods: &[HttpRequestMethod]) -> String {
    methods
        .iter()
        .map(HttpRequestMethod::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
