// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由表模块
//!
//! 路由表分为两个类型：
//! - [`RouteTableBuilder`]：启动阶段在单线程上使用的可变构建器，链式注册路由。
//! - [`RouteTableSnapshot`]：服务开始时冻结的只读快照，可在任意多个请求任务间共享。
//!
//! 构建器在 `build`/`start` 时被消费，之后不可再被访问。
//!
//! ```no_run
//! use webrouter::{Exchange, RouteTableBuilder};
//!
//! # fn main() -> Result<(), webrouter::Exception> {
//! let dispatcher = RouteTableBuilder::new()
//!     .with(|x: Exchange| x)
//!     .route("/greeting")?
//!     .get(|_x: &mut Exchange| Ok(200))
//!     .post(|_x: &mut Exchange| Ok(204))
//!     .build();
//! # Ok(())
//! # }
//! ```

use std::{any::type_name, collections::BTreeMap, fmt, sync::Arc};

use log::{debug, warn};

use crate::{
    dispatch::{Dispatcher, Fallbacks},
    exception::{BoxError, Exception},
    exchange::{Controller, Exchange},
    param::*,
};

/// 类型擦除后的请求处理器：用请求上下文构建处理器实例并执行动作。
///
/// 返回交还的上下文，以及动作给出的状态码或错误。
#[cfg_attr(test, mockall::automock)]
pub trait Handler: Send + Sync {
    fn apply(&self, exchange: Exchange) -> (Exchange, Result<u16, BoxError>);
}

type Factory<C> = Arc<dyn Fn(Exchange) -> C + Send + Sync>;
type Action<C> = Arc<dyn Fn(&mut C) -> Result<u16, BoxError> + Send + Sync>;

/// 处理器工厂与动作的组合
pub(crate) struct ControllerHandler<C> {
    factory: Factory<C>,
    action: Action<C>,
}

impl<C: Controller> ControllerHandler<C> {
    pub(crate) fn new(factory: Factory<C>, action: Action<C>) -> Self {
        Self { factory, action }
    }
}

impl<C: Controller> Handler for ControllerHandler<C> {
    fn apply(&self, exchange: Exchange) -> (Exchange, Result<u16, BoxError>) {
        let mut controller = (self.factory)(exchange);
        let result = (self.action)(&mut controller);
        (controller.into_exchange(), result)
    }
}

/// 一条不可变的路由：(上下文路径, 方法) → 处理器
#[derive(Clone)]
pub struct Route {
    context_path: String,
    method: HttpRequestMethod,
    controller: &'static str,
    handler: Arc<dyn Handler>,
}

impl Route {
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 处理器类型名
    pub fn controller(&self) -> &'static str {
        self.controller
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("context_path", &self.context_path)
            .field("method", &self.method)
            .field("controller", &self.controller)
            .finish()
    }
}

type RouteMap = BTreeMap<String, BTreeMap<HttpRequestMethod, Route>>;

/// 路由表构建器。
///
/// 构建器始终有一个当前上下文路径：初始为 `/`，每次 `with` 都重置为 `/`，
/// `route` 将其设置为给定路径。方法注册总是绑定到当前上下文路径上。
/// 同一 (路径, 方法) 重复注册时后者覆盖前者。
pub struct RouteTableBuilder<C> {
    handlers: RouteMap,
    factory: Factory<C>,
    context_path: String,
}

impl RouteTableBuilder<Exchange> {
    /// 以 `Exchange` 本身作为处理器类型开始注册
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            factory: Arc::new(|exchange| exchange),
            context_path: ROOT_CONTEXT_PATH.to_string(),
        }
    }
}

impl Default for RouteTableBuilder<Exchange> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Controller> RouteTableBuilder<C> {
    /// 切换处理器类型，`factory` 在每个请求上调用一次以构建处理器实例。
    pub fn with<D, F>(self, factory: F) -> RouteTableBuilder<D>
    where
        D: Controller,
        F: Fn(Exchange) -> D + Send + Sync + 'static,
    {
        RouteTableBuilder {
            handlers: self.handlers,
            factory: Arc::new(factory),
            context_path: ROOT_CONTEXT_PATH.to_string(),
        }
    }

    /// 设置当前上下文路径。路径必须以 `/` 开头。
    pub fn route(mut self, context_path: &str) -> Result<Self, Exception> {
        if !context_path.starts_with('/') {
            return Err(Exception::InvalidPath(context_path.to_string()));
        }
        self.context_path = context_path.to_string();
        Ok(self)
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn connect<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.method(HttpRequestMethod::Connect, action)
    }

    pub fn delete<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.method(HttpRequestMethod::Delete, action)
    }

    pub fn get<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.method(HttpRequestMethod::Get, action)
    }

    pub fn head<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.method(HttpRequestMethod::Head, action)
    }

    pub fn options<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.method(HttpRequestMethod::Options, action)
    }

    pub fn post<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.method(HttpRequestMethod::Post, action)
    }

    pub fn put<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.method(HttpRequestMethod::Put, action)
    }

    pub fn trace<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.method(HttpRequestMethod::Trace, action)
    }

    /// 在当前上下文路径上为任意方法注册动作
    pub fn method<A>(self, method: HttpRequestMethod, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        let context_path = self.context_path.clone();
        self.invoke(&context_path, method, action)
    }

    /// 覆盖 404 兜底处理器，与当前上下文路径无关
    pub fn not_found<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.invoke(NOT_FOUND_KEY, HttpRequestMethod::Get, action)
    }

    /// 覆盖 405 兜底处理器
    pub fn method_not_allowed<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.invoke(METHOD_NOT_ALLOWED_KEY, HttpRequestMethod::Get, action)
    }

    /// 覆盖 500 兜底处理器
    pub fn internal_server_error<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.invoke(INTERNAL_SERVER_ERROR_KEY, HttpRequestMethod::Get, action)
    }

    /// 覆盖 501 兜底处理器
    pub fn not_implemented<A>(self, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        self.invoke(NOT_IMPLEMENTED_KEY, HttpRequestMethod::Get, action)
    }

    fn invoke<A>(self, context_path: &str, method: HttpRequestMethod, action: A) -> Self
    where
        A: Fn(&mut C) -> Result<u16, BoxError> + Send + Sync + 'static,
    {
        let handler = ControllerHandler::new(Arc::clone(&self.factory), Arc::new(action));
        self.bind(context_path, method, type_name::<C>(), Arc::new(handler))
    }

    pub(crate) fn bind(
        mut self,
        context_path: &str,
        method: HttpRequestMethod,
        controller: &'static str,
        handler: Arc<dyn Handler>,
    ) -> Self {
        let route = Route {
            context_path: context_path.to_string(),
            method,
            controller,
            handler,
        };
        let previous = self
            .handlers
            .entry(context_path.to_string())
            .or_default()
            .insert(method, route);
        match previous {
            Some(old) => warn!(
                "路由 {} {} 被重复注册，{} 覆盖了 {}",
                method, context_path, controller, old.controller
            ),
            None => debug!("注册路由 {} {} -> {}", method, context_path, controller),
        }
        self
    }

    /// 只含真实路径（`/` 开头）的只读快照，`/` 总是存在。
    pub fn snapshot(&self) -> RouteTableSnapshot {
        let mut routes: RouteMap = self
            .handlers
            .iter()
            .filter(|(path, _)| path.starts_with('/'))
            .map(|(path, methods)| (path.clone(), methods.clone()))
            .collect();
        routes.entry(ROOT_CONTEXT_PATH.to_string()).or_default();
        RouteTableSnapshot { routes }
    }

    /// 冻结路由表并生成分发器。未覆盖的兜底槽位使用默认处理器。
    pub fn build(self) -> Dispatcher {
        let routes = Arc::new(self.snapshot());
        let fallback = |key: &str| {
            self.handlers
                .get(key)
                .and_then(|methods| methods.get(&HttpRequestMethod::Get))
                .map(|route| Arc::clone(&route.handler))
        };
        let fallbacks = Fallbacks::with_overrides(
            fallback(NOT_FOUND_KEY),
            fallback(METHOD_NOT_ALLOWED_KEY),
            fallback(INTERNAL_SERVER_ERROR_KEY),
            fallback(NOT_IMPLEMENTED_KEY),
        );
        Dispatcher::new(routes, fallbacks)
    }
}

/// 冻结后的路由表：上下文路径 → 方法 → 路由
#[derive(Clone, Default)]
pub struct RouteTableSnapshot {
    routes: RouteMap,
}

impl RouteTableSnapshot {
    /// 某个上下文路径下的全部路由
    pub fn get(&self, context_path: &str) -> Option<&BTreeMap<HttpRequestMethod, Route>> {
        self.routes.get(context_path)
    }

    pub fn route(&self, context_path: &str, method: HttpRequestMethod) -> Option<&Route> {
        self.routes.get(context_path)?.get(&method)
    }

    /// 上下文路径上已注册的方法，按方法枚举顺序排列
    pub fn methods(&self, context_path: &str) -> Vec<HttpRequestMethod> {
        self.routes
            .get(context_path)
            .map(|methods| methods.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn context_paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// 全部路由，按路径再按方法排序
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values().flat_map(|methods| methods.values())
    }

    /// 路由条数
    pub fn len(&self) -> usize {
        self.routes.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 请求路径以之为前缀的最长上下文路径
    pub fn context_path_for(&self, request_path: &str) -> Option<&str> {
        self.routes
            .keys()
            .filter(|path| request_path.starts_with(path.as_str()))
            .max_by_key(|path| path.len())
            .map(String::as_str)
    }

    /// 路由匹配。
    ///
    /// 方法记号非法时返回 `UnknownMethod`；路径下没有任何路由时返回 `RouteNotFound`；
    /// 路径下有路由但没有该方法时返回携带已注册方法的 `MethodNotAllowed`。
    pub fn resolve(&self, method: &str, request_path: &str) -> Result<&Route, Exception> {
        let method = method.parse::<HttpRequestMethod>()?;
        let methods = self
            .context_path_for(request_path)
            .and_then(|path| self.routes.get(path))
            .filter(|methods| !methods.is_empty())
            .ok_or(Exception::RouteNotFound)?;
        methods
            .get(&method)
            .ok_or_else(|| Exception::MethodNotAllowed(methods.keys().copied().collect()))
    }
}

impl fmt::Debug for RouteTableSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
