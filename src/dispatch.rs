// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求分发模块
//!
//! [`Dispatcher`] 持有冻结的路由快照与四个兜底处理器，把一个已解析的请求变成一个已定稿的
//! 响应。兜底阶梯：
//!
//! | 情形 | 处理器 | 状态码 |
//! |---|---|---|
//! | 方法记号未知 | `not_implemented` | 501 |
//! | 路径下没有任何路由 | `not_found` | 404 |
//! | 路径存在但方法未注册 | `method_not_allowed` | 405 |
//! | 动作返回错误或 panic | `internal_server_error` | 500 |
//!
//! 分发本身不做 I/O，写出响应由连接层负责。

use std::{
    any::Any,
    io::Write,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};

use log::{debug, error, warn};

use crate::{
    exception::{BoxError, Exception, HandlerFailure},
    exchange::Exchange,
    param::*,
    request::Request,
    response::Response,
    route::{ControllerHandler, Handler, RouteTableSnapshot},
    util::{describe_failure, escape_html},
};

/// 默认 404 动作
pub fn not_found(x: &mut Exchange) -> Result<u16, BoxError> {
    x.text_html_utf8().write_all(NOT_FOUND_HTML.as_bytes())?;
    Ok(404)
}

/// 默认 405 动作，`Allow` 列出请求路径上已注册的方法
pub fn method_not_allowed(x: &mut Exchange) -> Result<u16, BoxError> {
    let allow = join_methods(x.allowed_methods());
    x.response_headers().set("Allow", &allow);
    x.text_html_utf8().write_all(METHOD_NOT_ALLOWED_HTML.as_bytes())?;
    Ok(405)
}

/// 默认 500 动作，正文为转义后的错误链
pub fn internal_server_error(x: &mut Exchange) -> Result<u16, BoxError> {
    let trace = match x.failure() {
        Some(cause) => escape_html(&describe_failure(cause)),
        None => String::new(),
    };
    let body = x.text_html_utf8();
    body.write_all(INTERNAL_SERVER_ERROR_HTML_HEAD.as_bytes())?;
    body.write_all(trace.as_bytes())?;
    body.write_all(INTERNAL_SERVER_ERROR_HTML_TAIL.as_bytes())?;
    Ok(500)
}

/// 默认 501 动作
pub fn not_implemented(x: &mut Exchange) -> Result<u16, BoxError> {
    x.text_html_utf8().write_all(NOT_IMPLEMENTED_HTML.as_bytes())?;
    Ok(501)
}

fn default_handler(action: fn(&mut Exchange) -> Result<u16, BoxError>) -> Arc<dyn Handler> {
    Arc::new(ControllerHandler::<Exchange>::new(
        Arc::new(|x: Exchange| x),
        Arc::new(action),
    ))
}

/// 四个兜底处理器槽位
pub struct Fallbacks {
    not_found: Arc<dyn Handler>,
    method_not_allowed: Arc<dyn Handler>,
    internal_server_error: Arc<dyn Handler>,
    not_implemented: Arc<dyn Handler>,
}

impl Fallbacks {
    /// 未覆盖的槽位使用默认动作
    pub(crate) fn with_overrides(
        not_found: Option<Arc<dyn Handler>>,
        method_not_allowed: Option<Arc<dyn Handler>>,
        internal_server_error: Option<Arc<dyn Handler>>,
        not_implemented: Option<Arc<dyn Handler>>,
    ) -> Self {
        Self {
            not_found: not_found.unwrap_or_else(|| default_handler(self::not_found)),
            method_not_allowed: method_not_allowed
                .unwrap_or_else(|| default_handler(self::method_not_allowed)),
            internal_server_error: internal_server_error
                .unwrap_or_else(|| default_handler(self::internal_server_error)),
            not_implemented: not_implemented
                .unwrap_or_else(|| default_handler(self::not_implemented)),
        }
    }
}

impl Default for Fallbacks {
    fn default() -> Self {
        Self::with_overrides(None, None, None, None)
    }
}

/// 路由阶段的结论
#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    /// 命中已注册的路由
    Matched {
        context_path: String,
        method: HttpRequestMethod,
    },
    NotFound,
    MethodNotAllowed(Vec<HttpRequestMethod>),
    NotImplemented(String),
}

impl Routing {
    fn from_exception(e: Exception) -> Self {
        match e {
            Exception::UnknownMethod(token) => Routing::NotImplemented(token),
            Exception::MethodNotAllowed(allowed) => Routing::MethodNotAllowed(allowed),
            _ => Routing::NotFound,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Routing::Matched { .. })
    }
}

/// 动作的执行结果。`failure` 存在时 `status_code` 没有意义，分发器总是以 500 应答。
#[derive(Debug)]
pub struct DispatchOutcome {
    pub status_code: u16,
    pub failure: Option<BoxError>,
}

impl From<Result<u16, BoxError>> for DispatchOutcome {
    fn from(result: Result<u16, BoxError>) -> Self {
        match result {
            Ok(status_code) => Self {
                status_code,
                failure: None,
            },
            Err(cause) => Self {
                status_code: 500,
                failure: Some(cause),
            },
        }
    }
}

/// 一次分发的结果
#[derive(Debug)]
pub struct Dispatched {
    /// 已定稿、待写出的响应
    pub response: Response,
    pub routing: Routing,
    /// 动作失败时的原始错误及被抑制的次生错误
    pub failure: Option<HandlerFailure>,
}

/// 请求分发器，构建后只读，可在全部连接任务间共享。
pub struct Dispatcher {
    routes: Arc<RouteTableSnapshot>,
    fallbacks: Fallbacks,
}

impl Dispatcher {
    pub(crate) fn new(routes: Arc<RouteTableSnapshot>, fallbacks: Fallbacks) -> Self {
        Self { routes, fallbacks }
    }

    pub fn routes(&self) -> &RouteTableSnapshot {
        &self.routes
    }

    /// 分发一个请求。
    ///
    /// 总是返回一个响应：路由失败走兜底阶梯，动作失败走 500 处理器，
    /// 500 处理器再失败时返回空正文的 500。
    pub fn dispatch(&self, request: Request, id: u128) -> Dispatched {
        let start_time = Instant::now();
        let mut exchange = Exchange::new(request, Arc::clone(&self.routes), id);

        let resolved = self
            .routes
            .resolve(exchange.request_method(), exchange.path());
        let (handler, routing) = match resolved {
            Ok(route) => {
                debug!(
                    "[ID{}]命中路由 {} {} -> {}",
                    id,
                    route.method(),
                    route.context_path(),
                    route.controller()
                );
                let routing = Routing::Matched {
                    context_path: route.context_path().to_string(),
                    method: route.method(),
                };
                (Arc::clone(route.handler()), routing)
            }
            Err(e) => {
                warn!(
                    "[ID{}]{} {} 未能路由：{}",
                    id,
                    exchange.request_method(),
                    exchange.path(),
                    e
                );
                let handler = Arc::clone(self.fallback_for(&e));
                if let Exception::MethodNotAllowed(allowed) = &e {
                    exchange.set_allowed_methods(allowed.clone());
                }
                (handler, Routing::from_exception(e))
            }
        };

        let request = exchange.request().clone();
        let (exchange, result) = match apply_caught(handler.as_ref(), exchange) {
            Ok(applied) => applied,
            Err(panicked) => {
                error!("[ID{}]处理器发生panic：{}", id, panicked);
                let exchange = Exchange::new(request, Arc::clone(&self.routes), id);
                (exchange, Err(panicked))
            }
        };
        let (response, failure) = match DispatchOutcome::from(result) {
            DispatchOutcome {
                status_code,
                failure: None,
            } => (exchange.into_response(status_code), None),
            DispatchOutcome {
                failure: Some(cause),
                ..
            } => self.recover(exchange, cause, id),
        };

        debug!(
            "[ID{}]分发完成，状态码{}，用时{}ms",
            id,
            response.status_code(),
            start_time.elapsed().as_millis()
        );
        Dispatched {
            response,
            routing,
            failure,
        }
    }

    fn fallback_for(&self, e: &Exception) -> &Arc<dyn Handler> {
        match e {
            Exception::UnknownMethod(_) => &self.fallbacks.not_implemented,
            Exception::MethodNotAllowed(_) => &self.fallbacks.method_not_allowed,
            _ => &self.fallbacks.not_found,
        }
    }

    // 丢弃已缓冲的响应后交给 500 处理器；状态码固定为 500
    fn recover(
        &self,
        mut exchange: Exchange,
        cause: BoxError,
        id: u128,
    ) -> (Response, Option<HandlerFailure>) {
        let mut failure = HandlerFailure::new(cause);
        exchange.fail(&failure);

        let handler = self.fallbacks.internal_server_error.as_ref();
        let response = match apply_caught(handler, exchange) {
            Ok((mut exchange, result)) => {
                if let Err(secondary) = result {
                    error!("[ID{}]500处理器执行失败：{}", id, secondary);
                    failure.add_suppressed(secondary);
                    exchange.reset_response();
                }
                exchange.set_status(500);
                exchange.into_response(500)
            }
            Err(panicked) => {
                error!("[ID{}]500处理器发生panic：{}", id, panicked);
                failure.add_suppressed(panicked);
                Response::from_status_code(500)
            }
        };
        (response, Some(failure))
    }
}

/// 执行处理器并捕获 panic。发生 panic 时请求上下文随之丢失，只返回由 panic 消息构成的错误。
fn apply_caught(
    handler: &dyn Handler,
    exchange: Exchange,
) -> Result<(Exchange, Result<u16, BoxError>), BoxError> {
    panic::catch_unwind(AssertUnwindSafe(|| handler.apply(exchange)))
        .map_err(|payload| Exception::HandlerPanicked(panic_message(payload.as_ref())).into())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{MockHandler, RouteTableBuilder};
    use std::{error::Error, fmt};

    fn request(raw: &str) -> Request {
        Request::try_from(raw.as_bytes(), 0).unwrap()
    }

    fn body(response: &Response) -> String {
        response
            .content()
            .map(|c| String::from_utf8_lossy(c).to_string())
            .unwrap_or_default()
    }

    fn greeting() -> Dispatcher {
        RouteTableBuilder::new()
            .route("/greeting")
            .unwrap()
            .get(|x: &mut Exchange| {
                let who = x.request_param_or("who", "world").to_string();
                write!(x.text_plain_utf8(), "Hello, {}!", who)?;
                Ok(200)
            })
            .post(|x: &mut Exchange| {
                x.response_headers().add("Expires", "0");
                Ok(204)
            })
            .build()
    }

    #[test]
    fn test_matched_route() {
        let dispatched = greeting().dispatch(request("GET /greeting?who=Ada HTTP/1.1\r\n\r\n"), 0);

        assert_eq!(dispatched.response.status_code(), 200);
        assert_eq!(body(&dispatched.response), "Hello, Ada!");
        assert!(dispatched.routing.is_matched());
        assert!(dispatched.failure.is_none());
    }

    #[test]
    fn test_method_token_is_case_insensitive() {
        let dispatched = greeting().dispatch(request("get /greeting HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(dispatched.response.status_code(), 200);
        assert_eq!(body(&dispatched.response), "Hello, world!");
    }

    #[test]
    fn test_empty_body_has_no_content() {
        let dispatched = greeting().dispatch(request("POST /greeting HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(dispatched.response.status_code(), 204);
        assert_eq!(dispatched.response.content_length(), None);
        assert_eq!(dispatched.response.headers().get("Expires"), Some("0"));
    }

    #[test]
    fn test_method_not_allowed() {
        let dispatched = greeting().dispatch(request("PUT /greeting HTTP/1.1\r\n\r\n"), 0);
        let response = &dispatched.response;

        assert_eq!(response.status_code(), 405);
        assert_eq!(response.headers().get("Allow"), Some("GET, POST"));
        assert_eq!(response.headers().get("Content-Type"), Some("text/html; charset=UTF-8"));
        assert_eq!(body(response), METHOD_NOT_ALLOWED_HTML);
        assert_eq!(
            dispatched.routing,
            Routing::MethodNotAllowed(vec![HttpRequestMethod::Get, HttpRequestMethod::Post])
        );
    }

    #[test]
    fn test_not_found() {
        let dispatched = greeting().dispatch(request("GET /missing HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(dispatched.response.status_code(), 404);
        assert_eq!(body(&dispatched.response), NOT_FOUND_HTML);
        assert_eq!(dispatched.routing, Routing::NotFound);
    }

    #[test]
    fn test_not_implemented() {
        let dispatched = greeting().dispatch(request("FOOBAR /greeting HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(dispatched.response.status_code(), 501);
        assert_eq!(body(&dispatched.response), NOT_IMPLEMENTED_HTML);
        assert_eq!(
            dispatched.routing,
            Routing::NotImplemented("FOOBAR".to_string())
        );
    }

    #[test]
    fn test_root_route_serves_unmatched_paths() {
        let dispatcher = RouteTableBuilder::new()
            .get(|_: &mut Exchange| Ok(200))
            .build();

        let dispatched = dispatcher.dispatch(request("GET /anything/else HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(dispatched.response.status_code(), 200);
        let dispatched = dispatcher.dispatch(request("POST /anything HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(dispatched.response.status_code(), 405);
        assert_eq!(dispatched.response.headers().get("Allow"), Some("GET"));
    }

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom <script>")
        }
    }

    impl Error for Boom {}

    #[test]
    fn test_failure_becomes_internal_server_error() {
        let dispatcher = RouteTableBuilder::new()
            .route("/greeting")
            .unwrap()
            .get(|x: &mut Exchange| {
                x.response_headers().add("X-greeting", "Hello");
                x.set_status(201);
                write!(x.response_body(), "partial")?;
                Err(Boom.into())
            })
            .build();

        let dispatched = dispatcher.dispatch(request("GET /greeting HTTP/1.1\r\n\r\n"), 0);
        let response = &dispatched.response;

        assert_eq!(response.status_code(), 500);
        assert_eq!(response.headers().get("X-greeting"), None);
        assert_eq!(
            body(response),
            "<h1>500 Internal Server Error</h1>\n<pre><code>boom &lt;script&gt;</code></pre>"
        );
        let failure = dispatched.failure.unwrap();
        assert_eq!(failure.cause().to_string(), "boom <script>");
        assert!(failure.suppressed().is_empty());
    }

    #[test]
    fn test_failing_error_handler_is_suppressed() {
        let dispatcher = RouteTableBuilder::new()
            .route("/greeting")
            .unwrap()
            .get(|_: &mut Exchange| Err("first".into()))
            .internal_server_error(|x: &mut Exchange| {
                write!(x.text_html_utf8(), "half")?;
                Err("second".into())
            })
            .build();

        let dispatched = dispatcher.dispatch(request("GET /greeting HTTP/1.1\r\n\r\n"), 0);

        assert_eq!(dispatched.response.status_code(), 500);
        assert!(dispatched.response.content().is_none());
        let failure = dispatched.failure.unwrap();
        assert_eq!(failure.cause().to_string(), "first");
        assert_eq!(failure.suppressed().len(), 1);
        assert_eq!(failure.to_string(), "first (suppressed: second)");
    }

    #[test]
    fn test_panicking_action_becomes_internal_server_error() {
        let dispatcher = RouteTableBuilder::new()
            .route("/panic")
            .unwrap()
            .get(|x: &mut Exchange| {
                write!(x.text_plain_utf8(), "partial")?;
                let empty: Vec<u16> = Vec::new();
                Ok(empty[0])
            })
            .build();

        let dispatched = dispatcher.dispatch(request("GET /panic HTTP/1.1\r\n\r\n"), 0);
        let response = &dispatched.response;

        assert_eq!(response.status_code(), 500);
        assert_eq!(response.headers().get("Content-Type"), Some("text/html; charset=UTF-8"));
        assert!(body(response).starts_with("<h1>500 Internal Server Error</h1>"));
        assert!(body(response).contains("Handler panicked: index out of bounds"));
        assert!(dispatched.routing.is_matched());
        let failure = dispatched.failure.unwrap();
        assert!(failure.cause().to_string().starts_with("Handler panicked"));
    }

    #[test]
    fn test_panicking_error_handler_is_suppressed() {
        let dispatcher = RouteTableBuilder::new()
            .route("/greeting")
            .unwrap()
            .get(|_: &mut Exchange| Err("first".into()))
            .internal_server_error(|_: &mut Exchange| panic!("second"))
            .build();

        let dispatched = dispatcher.dispatch(request("GET /greeting HTTP/1.1\r\n\r\n"), 0);

        assert_eq!(dispatched.response.status_code(), 500);
        assert!(dispatched.response.content().is_none());
        let failure = dispatched.failure.unwrap();
        assert_eq!(failure.cause().to_string(), "first");
        assert_eq!(failure.to_string(), "first (suppressed: Handler panicked: second)");
    }

    #[test]
    fn test_error_handler_sees_failure_and_status_is_forced() {
        let dispatcher = RouteTableBuilder::new()
            .route("/greeting")
            .unwrap()
            .get(|_: &mut Exchange| Err("database unavailable".into()))
            .internal_server_error(|x: &mut Exchange| {
                let message = x.failure().map(|e| e.to_string()).unwrap_or_default();
                write!(x.text_plain_utf8(), "sorry: {}", message)?;
                Ok(200)
            })
            .build();

        let dispatched = dispatcher.dispatch(request("GET /greeting HTTP/1.1\r\n\r\n"), 0);

        assert_eq!(dispatched.response.status_code(), 500);
        assert_eq!(body(&dispatched.response), "sorry: database unavailable");
    }

    #[test]
    fn test_explicit_status_overrides_returned_status() {
        let dispatcher = RouteTableBuilder::new()
            .route("/items")
            .unwrap()
            .post(|x: &mut Exchange| {
                x.set_status(201);
                Ok(200)
            })
            .build();

        let dispatched = dispatcher.dispatch(request("POST /items HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(dispatched.response.status_code(), 201);
    }

    #[test]
    fn test_custom_fallbacks() {
        let dispatcher = RouteTableBuilder::new()
            .route("/greeting")
            .unwrap()
            .get(|_: &mut Exchange| Ok(200))
            .not_found(|x: &mut Exchange| {
                let path = x.path().to_string();
                write!(x.text_plain_utf8(), "nothing at {}", path)?;
                Ok(404)
            })
            .method_not_allowed(|x: &mut Exchange| {
                let allowed = x.allowed_methods().len();
                write!(x.text_plain_utf8(), "{} allowed", allowed)?;
                Ok(405)
            })
            .not_implemented(|x: &mut Exchange| {
                let token = x.request_method().to_string();
                write!(x.text_plain_utf8(), "what is {}", token)?;
                Ok(501)
            })
            .build();

        let d = dispatcher.dispatch(request("GET /nope HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(body(&d.response), "nothing at /nope");
        let d = dispatcher.dispatch(request("DELETE /greeting HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(body(&d.response), "1 allowed");
        assert_eq!(d.response.headers().get("Allow"), None);
        let d = dispatcher.dispatch(request("BREW /greeting HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(body(&d.response), "what is BREW");
    }

    #[test]
    fn test_matched_handler_invoked_exactly_once() {
        let mut handler = MockHandler::new();
        handler
            .expect_apply()
            .times(1)
            .returning(|x| (x, Ok(200)));
        let mut fallback = MockHandler::new();
        fallback.expect_apply().times(0);

        let dispatcher = RouteTableBuilder::new()
            .bind("/mock", HttpRequestMethod::Get, "MockHandler", Arc::new(handler))
            .bind(NOT_FOUND_KEY, HttpRequestMethod::Get, "MockHandler", Arc::new(fallback))
            .build();

        let dispatched = dispatcher.dispatch(request("GET /mock HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(dispatched.response.status_code(), 200);
    }

    #[test]
    fn test_routing_failure_never_reaches_route_handlers() {
        let mut handler = MockHandler::new();
        handler.expect_apply().times(0);

        let dispatcher = RouteTableBuilder::new()
            .bind("/mock", HttpRequestMethod::Get, "MockHandler", Arc::new(handler))
            .build();

        let d = dispatcher.dispatch(request("POST /mock HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(d.response.status_code(), 405);
        let d = dispatcher.dispatch(request("FOOBAR /mock HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(d.response.status_code(), 501);
    }
}
