// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了路由器在配置、路由、处理与收尾各阶段可能出现的异常情况。
//!
//! ## 分类
//! - **配置错误**：非法的上下文路径、非法端口、无法绑定端口。启动阶段即失败，进程不会开始服务。
//! - **路由错误**：未知方法、路径未匹配、方法未注册。由兜底阶梯在本地恢复，总能生成合法响应。
//! - **处理器失败**：动作返回的任意错误或动作中的 panic，统一包装为 [`HandlerFailure`] 并转换为 500 响应。
//! - **收尾失败**：写出已经确定的响应时发生的 I/O 错误，只记录日志，不重试。

use std::{error::Error, fmt, sync::Arc};

use crate::param::{join_methods, HttpRequestMethod};

/// 处理器动作可返回的任意错误类型
pub type BoxError = Box<dyn Error + Send + Sync>;

/// 路由器处理请求过程中发生的异常类型。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 客户端发送的请求头无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行或请求头格式不正确。对应 `400 Bad Request`。
    MalformedRequest,
    /// 客户端使用了不支持的 HTTP 协议版本（仅支持 HTTP/1.0 与 HTTP/1.1）。
    UnsupportedHttpVersion,
    /// 请求头或请求体超过配置上限。
    RequestTooLarge,
    /// 方法记号不在方法集合中。对应 `501 Not Implemented`。
    UnknownMethod(String),
    /// 上下文路径不以 `/` 开头。属于配置错误。
    InvalidPath(String),
    /// 请求路径下没有注册任何方法。对应 `404 Not Found`。
    RouteNotFound,
    /// 请求路径存在，但没有为该方法注册动作。携带已注册的方法，对应 `405`。
    MethodNotAllowed(Vec<HttpRequestMethod>),
    /// 配置文件缺失或内容非法。
    InvalidConfig(String),
    /// 无法绑定监听端口。
    BindFailed { port: u16, reason: String },
    /// 动作执行中发生 panic，携带 panic 消息。与动作返回的错误一样转换为 500。
    HandlerPanicked(String),
    /// 写出最终响应时失败，该请求无法恢复。
    FinalizationFailure(String),
}

use Exception::*;

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequest => write!(f, "Malformed HTTP request"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            RequestTooLarge => write!(f, "Request exceeds the configured size limit"),
            UnknownMethod(token) => write!(f, "Unknown request method: {}", token),
            InvalidPath(path) => write!(f, "`contextPath` needs to start with `/`: {}", path),
            RouteNotFound => write!(f, "No handler found for request URI (404)"),
            MethodNotAllowed(allowed) => {
                write!(f, "Request method not allowed (405), allowed: {}", join_methods(allowed))
            }
            InvalidConfig(reason) => write!(f, "Invalid configuration: {}", reason),
            BindFailed { port, reason } => write!(f, "Couldn't bind port {}: {}", port, reason),
            HandlerPanicked(message) => write!(f, "Handler panicked: {}", message),
            FinalizationFailure(reason) => write!(f, "Couldn't write response: {}", reason),
        }
    }
}

impl Error for Exception {}

/// 动作执行失败时保留下来的原始错误。
///
/// 原始错误以 `Arc` 形式同时挂在请求上下文上，供 500 处理器渲染诊断信息；
/// 500 处理器自身再次失败时，该错误作为被抑制的错误附加在这里，而不是替换原始错误。
pub struct HandlerFailure {
    cause: Arc<dyn Error + Send + Sync>,
    suppressed: Vec<BoxError>,
}

impl HandlerFailure {
    pub fn new(cause: BoxError) -> Self {
        Self {
            cause: Arc::from(cause),
            suppressed: Vec::new(),
        }
    }

    /// 原始错误
    pub fn cause(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    pub(crate) fn shared_cause(&self) -> Arc<dyn Error + Send + Sync> {
        Arc::clone(&self.cause)
    }

    /// 500 处理器执行期间发生的次生错误
    pub fn suppressed(&self) -> &[BoxError] {
        &self.suppressed
    }

    pub fn add_suppressed(&mut self, secondary: BoxError) {
        self.suppressed.push(secondary);
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)?;
        for secondary in &self.suppressed {
            write!(f, " (suppressed: {})", secondary)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFailure")
            .field("cause", &self.cause)
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

impl Error for HandlerFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.cause.as_ref())
    }
}
