// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 服务模块
//!
//! 基于 Tokio 的监听与连接处理：
//! - 每个连接一个任务，每个连接只处理一个请求，响应后关闭连接。
//! - 处理器是同步代码，分发在阻塞线程池上执行，不占用异步工作线程。
//! - 请求头、请求体大小与读取时长受 [`Config`] 限制。
//! - 两阶段停机：收到信号后停止接受新连接，再等待全部进行中的请求完成。

use std::{
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::{self, JoinSet},
    time::timeout,
};

use crate::{
    config::Config,
    dispatch::{Dispatched, Dispatcher},
    exception::Exception,
    exchange::{Controller, Exchange},
    request::{find_head_end, Request, HEAD_TERMINATOR},
    response::Response,
    route::{RouteTableBuilder, RouteTableSnapshot},
};

/// 已绑定端口、尚未开始服务的 HTTP 服务器
pub struct HttpServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    config: Arc<Config>,
    active_connection: Arc<AtomicUsize>,
}

impl HttpServer {
    /// 以 `factory` 构建的处理器类型开始注册路由
    pub fn with<C, F>(factory: F) -> RouteTableBuilder<C>
    where
        C: Controller,
        F: Fn(Exchange) -> C + Send + Sync + 'static,
    {
        RouteTableBuilder::new().with(factory)
    }

    /// 绑定监听端口。`local` 为真时只监听回环地址。
    pub async fn bind(dispatcher: Dispatcher, config: &Config) -> Result<Self, Exception> {
        let port = config.port();
        let address = match config.local() {
            true => Ipv4Addr::new(127, 0, 0, 1),
            false => Ipv4Addr::new(0, 0, 0, 0),
        };
        info!("服务端将在{}:{}上监听Socket连接", address, port);

        let listener = match TcpListener::bind(SocketAddrV4::new(address, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("无法绑定端口：{}，错误：{}", port, e);
                return Err(Exception::BindFailed {
                    port,
                    reason: e.to_string(),
                });
            }
        };
        info!(
            "端口{}绑定完成，共{}条路由",
            port,
            dispatcher.routes().len()
        );

        Ok(Self {
            listener,
            dispatcher: Arc::new(dispatcher),
            config: Arc::new(config.clone()),
            active_connection: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// 实际监听的地址，端口配置为 0 时由此得知系统分配的端口
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn routes(&self) -> &RouteTableSnapshot {
        self.dispatcher.routes()
    }

    /// 进行中连接数的共享计数器
    pub fn active_connection(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active_connection)
    }

    /// 持续服务，直到进程结束
    pub async fn serve(self) {
        self.serve_until(std::future::pending::<()>()).await
    }

    /// 持续服务，直到 `shutdown` 完成；之后不再接受新连接，并等待进行中的请求全部完成。
    pub async fn serve_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut tasks = JoinSet::new();
        let mut id: u128 = 0;

        match self.local_addr() {
            Ok(addr) => info!("Serving HTTP/1.1 on port {}", addr.port()),
            Err(e) => warn!("无法获取监听地址：{}", e),
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("收到停机信号，停止接受新连接");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("[ID{}]TCP连接已建立：{}", id, addr);
                        let dispatcher = Arc::clone(&self.dispatcher);
                        let config = Arc::clone(&self.config);
                        let active_connection = Arc::clone(&self.active_connection);
                        tasks.spawn(async move {
                            active_connection.fetch_add(1, Ordering::SeqCst);
                            handle_connection(stream, addr, id, dispatcher, config).await;
                            active_connection.fetch_sub(1, Ordering::SeqCst);
                        });
                        id += 1;
                    }
                    Err(e) => error!("接受连接时遇到错误：{}", e),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("连接任务异常结束：{}", e);
                    }
                }
            }
        }

        drop(self.listener);
        info!("等待{}个进行中的连接完成", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("连接任务异常结束：{}", e);
            }
        }
        info!("停机完成");
    }
}

impl<C: Controller> RouteTableBuilder<C> {
    /// 冻结路由表并绑定端口
    pub async fn start(self, config: &Config) -> Result<HttpServer, Exception> {
        HttpServer::bind(self.build(), config).await
    }
}

/// # 连接处理器
///
/// 读取请求、分发、写出响应、关闭连接。任何一步失败都只影响当前连接。
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    id: u128,
    dispatcher: Arc<Dispatcher>,
    config: Arc<Config>,
) {
    serve_connection(&mut stream, addr, id, dispatcher, &config).await;
    if let Err(e) = stream.shutdown().await {
        debug!("[ID{}]关闭连接时遇到错误：{}", id, e);
    }
}

async fn serve_connection(
    stream: &mut TcpStream,
    addr: SocketAddr,
    id: u128,
    dispatcher: Arc<Dispatcher>,
    config: &Config,
) {
    let request = match timeout(config.read_timeout(), read_request(stream, id, config)).await {
        Ok(Ok(Some(request))) => request.with_remote_addr(addr),
        Ok(Ok(None)) => {
            debug!("[ID{}]客户端未发送数据即关闭连接", id);
            return;
        }
        Ok(Err(e)) => {
            let code = match e {
                Exception::RequestTooLarge => 413,
                _ => 400,
            };
            warn!("[ID{}]无法读取HTTP请求：{}，返回{}", id, e, code);
            send(stream, &Response::from_status_code(code), id).await;
            return;
        }
        Err(_) => {
            warn!("[ID{}]读取HTTP请求超时，返回408", id);
            send(stream, &Response::from_status_code(408), id).await;
            return;
        }
    };
    debug!("[ID{}]成功解析HTTP请求", id);

    let start_time = Instant::now();
    let summary = format!(
        "{}, {}, {}, {}",
        request.version(),
        request.path(),
        request.method(),
        request.user_agent()
    );
    let (response, failure) =
        match task::spawn_blocking(move || dispatcher.dispatch(request, id)).await {
            Ok(Dispatched {
                response, failure, ..
            }) => (response, failure),
            Err(e) => {
                error!("[ID{}]分发任务异常结束：{}", id, e);
                (Response::from_status_code(500), None)
            }
        };

    info!(
        "[ID{}] {}, {}, {}, {}ms",
        id,
        summary,
        response.status_code(),
        response.information(),
        start_time.elapsed().as_millis()
    );

    send(stream, &response, id).await;

    if let Some(failure) = failure {
        error!("[ID{}]请求处理失败：{}", id, failure);
    }
}

/// 读取一个完整请求：请求头读到空行为止，请求体按 `Content-Length` 读取。
///
/// 客户端在发送任何字节前关闭连接时返回 `Ok(None)`。
async fn read_request(
    stream: &mut TcpStream,
    id: u128,
    config: &Config,
) -> Result<Option<Request>, Exception> {
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = vec![0u8; 1024];

    let head_end = loop {
        if let Some(end) = find_head_end(&buffer) {
            break end;
        }
        if buffer.len() > config.max_header_size() {
            return Err(Exception::RequestTooLarge);
        }
        let n = stream.read(&mut chunk).await.map_err(|e| {
            error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
            Exception::MalformedRequest
        })?;
        if n == 0 {
            return match buffer.is_empty() {
                true => Ok(None),
                false => Err(Exception::MalformedRequest),
            };
        }
        buffer.extend_from_slice(&chunk[..n]);
    };
    if head_end > config.max_header_size() {
        return Err(Exception::RequestTooLarge);
    }

    let request = Request::try_from(&buffer[..head_end], id)?;
    let length = request.content_length()?;
    if length > config.max_body_size() {
        return Err(Exception::RequestTooLarge);
    }

    let mut body = buffer.split_off(head_end + HEAD_TERMINATOR.len());
    if body.len() < length {
        let received = body.len();
        body.resize(length, 0);
        stream
            .read_exact(&mut body[received..])
            .await
            .map_err(|e| {
                error!("[ID{}]读取请求体时遇到错误: {}", id, e);
                Exception::MalformedRequest
            })?;
    } else {
        body.truncate(length);
    }
    debug!("[ID{}]HTTP请求接收完毕，请求体{}字节", id, length);

    Ok(Some(request.with_body(Bytes::from(body))))
}

/// 写出响应：先写状态行与头部，再写正文
async fn send(stream: &mut TcpStream, response: &Response, id: u128) {
    if let Err(e) = write_response(stream, response).await {
        let e = Exception::FinalizationFailure(e.to_string());
        error!("[ID{}]{}", id, e);
    }
}

async fn write_response(stream: &mut TcpStream, response: &Response) -> io::Result<()> {
    stream.write_all(&response.head_bytes()).await?;
    if let Some(content) = response.content() {
        stream.write_all(content).await?;
    }
    stream.flush().await
}
