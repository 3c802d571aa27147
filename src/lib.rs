// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # webrouter
//!
//! 嵌入式 HTTP 路由器：在启动阶段把 (上下文路径, 方法) 映射到处理器动作，冻结为只读路由表后
//! 开始服务。每个请求的响应在内存中缓冲，处理器结束后才确定状态码与 `Content-Length`。
//! 路由失败与处理器失败都由兜底阶梯转换为合法的 HTTP 响应（404、405、500、501）。

pub mod config;
pub mod dispatch;
pub mod exception;
pub mod exchange;
pub mod headers;
pub mod param;
pub mod request;
pub mod response;
pub mod route;
pub mod server;
pub mod util;

pub use config::Config;
pub use dispatch::{DispatchOutcome, Dispatched, Dispatcher, Routing};
pub use exception::{BoxError, Exception, HandlerFailure};
pub use exchange::{Controller, Exchange};
pub use headers::{accept_languages, Headers, LanguageRange, Locale};
pub use param::{HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::{Response, ResponseBuffer};
pub use route::{Handler, Route, RouteTableBuilder, RouteTableSnapshot};
pub use server::HttpServer;
