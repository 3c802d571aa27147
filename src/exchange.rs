// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求上下文模块
//!
//! [`Exchange`] 是一次请求独占的上下文：请求数据、按需解析好的查询参数和语言偏好、
//! 当前请求的响应缓冲区、只读的路由快照，以及处理失败时挂上的原始错误。
//!
//! 处理器实例（[`Controller`]）由调用方提供的工厂函数用 `Exchange` 构建，每个请求一次；
//! 动作结束后通过 [`Controller::into_exchange`] 交还上下文，由分发器定稿响应。

use std::{collections::BTreeMap, error::Error, io::Write, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use log::warn;
use serde::Serialize;

use crate::{
    exception::{BoxError, HandlerFailure},
    headers::{accept_languages, Headers, LanguageRange},
    param::{HttpRequestMethod, ROOT_CONTEXT_PATH},
    request::Request,
    response::{Response, ResponseBuffer},
    route::RouteTableSnapshot,
    util::parse_query,
};

/// 每个请求构建一次的处理器实例。
///
/// 实现者通常持有 `Exchange` 以及自身的依赖，动作以 `&mut Self` 访问它们。
pub trait Controller: Send + 'static {
    /// 交还请求上下文
    fn into_exchange(self) -> Exchange;
}

/// `Exchange` 本身即可作为处理器类型使用，适合不需要额外依赖的动作。
impl Controller for Exchange {
    fn into_exchange(self) -> Exchange {
        self
    }
}

pub struct Exchange {
    id: u128,
    request: Request,
    context_path: String,
    params: BTreeMap<String, Vec<String>>,
    languages: Vec<LanguageRange>,
    routes: Arc<RouteTableSnapshot>,
    allowed: Vec<HttpRequestMethod>,
    failure: Option<Arc<dyn Error + Send + Sync>>,
    response: ResponseBuffer,
}

impl Exchange {
    /// 为请求创建上下文，上下文路径取路由快照中与请求路径匹配的最长前缀。
    pub fn new(request: Request, routes: Arc<RouteTableSnapshot>, id: u128) -> Self {
        let context_path = routes
            .context_path_for(request.path())
            .unwrap_or(ROOT_CONTEXT_PATH)
            .to_string();
        let params = parse_query(request.query());
        let languages = accept_languages(request.headers().get("Accept-Language"));
        Self {
            id,
            request,
            context_path,
            params,
            languages,
            routes,
            allowed: Vec::new(),
            failure: None,
            response: ResponseBuffer::new(),
        }
    }

    pub(crate) fn set_allowed_methods(&mut self, allowed: Vec<HttpRequestMethod>) {
        self.allowed = allowed;
    }

    /// 记录处理失败并丢弃此前缓冲的响应
    pub(crate) fn fail(&mut self, failure: &HandlerFailure) {
        self.failure = Some(failure.shared_cause());
        self.response.reset();
    }

    pub(crate) fn reset_response(&mut self) {
        self.response.reset();
    }

    pub(crate) fn into_response(self, returned: u16) -> Response {
        self.response.into_response(returned)
    }
}

// --- 请求侧访问器 ---

impl Exchange {
    /// 请求序号
    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// 原始方法记号
    pub fn request_method(&self) -> &str {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    /// 命中的上下文路径
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn query(&self) -> Option<&str> {
        self.request.query()
    }

    pub fn request_headers(&self) -> &Headers {
        self.request.headers()
    }

    pub fn request_body(&self) -> &Bytes {
        self.request.body()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.request.remote_addr()
    }

    /// 全部查询参数
    pub fn request_params(&self) -> &BTreeMap<String, Vec<String>> {
        &self.params
    }

    /// 查询参数的第一个值
    pub fn request_param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn request_param_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.request_param(name).unwrap_or(default)
    }

    /// 由 `Accept-Language` 解析出的语言偏好，按权重降序
    pub fn accept_languages(&self) -> &[LanguageRange] {
        &self.languages
    }

    /// 服务开始时冻结的路由快照
    pub fn routes(&self) -> &RouteTableSnapshot {
        &self.routes
    }

    /// 请求路径上已注册的方法。仅在 405 兜底处理中非空。
    pub fn allowed_methods(&self) -> &[HttpRequestMethod] {
        &self.allowed
    }

    /// 处理过程中发生的原始错误。仅在 500 兜底处理中存在。
    pub fn failure(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.failure.as_deref()
    }
}

// --- 响应侧访问器 ---

impl Exchange {
    pub fn response_headers(&mut self) -> &mut Headers {
        self.response.headers_mut()
    }

    /// 响应正文写入端
    pub fn response_body(&mut self) -> &mut ResponseBuffer {
        &mut self.response
    }

    pub fn set_status(&mut self, code: u16) {
        self.response.set_status(code);
    }

    /// 设置 `Content-Type: text/plain; charset=UTF-8` 并返回正文写入端
    pub fn text_plain_utf8(&mut self) -> &mut ResponseBuffer {
        self.with_content_type("text/plain; charset=UTF-8")
    }

    /// 设置 `Content-Type: text/html; charset=UTF-8` 并返回正文写入端
    pub fn text_html_utf8(&mut self) -> &mut ResponseBuffer {
        self.with_content_type("text/html; charset=UTF-8")
    }

    /// 设置 `Content-Type: application/json` 并把 `value` 序列化写入正文
    pub fn application_json<T: Serialize>(&mut self, value: &T) -> Result<(), BoxError> {
        let sink = self.with_content_type("application/json");
        serde_json::to_writer(&mut *sink, value)?;
        sink.flush()?;
        Ok(())
    }

    // 头部必须在第一个正文字节之前确定
    fn with_content_type(&mut self, value: &str) -> &mut ResponseBuffer {
        if !self.response.is_empty() {
            warn!("[ID{}]正文写入后才设置Content-Type：{}", self.id, value);
        }
        self.response.headers_mut().set("Content-Type", value);
        &mut self.response
    }
}
