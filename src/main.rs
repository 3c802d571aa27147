// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 问候服务示例
//!
//! 用 webrouter 搭建的最小应用：
//! - `GET /greeting?who=...`：按 `Accept-Language` 选择本地化问候语，以 JSON 返回。
//! - `POST /greeting?who=...`：只设置 `Expires` 与 `X-greeting` 头部，返回 204。
//! - 后台管理控制台（stdin 指令交互）与 Ctrl-C 都可以触发优雅停机。

use std::{
    collections::BTreeMap,
    path::Path,
    process,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{error, info, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config as LogConfig, Root},
    encode::pattern::PatternEncoder,
};
use serde_derive::Serialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
    sync::watch,
};

use webrouter::{
    BoxError, Config, Controller, Exception, Exchange, HttpServer, LanguageRange, Locale,
    RouteTableSnapshot,
};

const LOG_CONFIG_PATH: &str = "config/log4rs.yaml";
const CONFIG_PATH: &str = "config/development.toml";

/// 按语言偏好给出本地化问候语
pub struct GreetingService {
    /// 区域 → (模板, 缺省称呼)，模板中的 `{}` 替换为称呼
    messages: BTreeMap<Locale, (&'static str, &'static str)>,
    default_locale: Locale,
}

impl GreetingService {
    pub fn new() -> Self {
        let messages = [
            ("de-AT", ("Servus, {}!", "miteinander")),
            ("en", ("Hello, {}!", "world")),
            ("de", ("Hallo, {}!", "Welt")),
            ("de-CH", ("Grüazie, {}!", "miteinander")),
            ("en-US", ("Howdy, {}!", "y'all")),
        ]
        .into_iter()
        .map(|(tag, message)| (Locale::from_tag(tag), message))
        .collect();
        Self {
            messages,
            default_locale: Locale::from_tag("en"),
        }
    }

    /// 依次尝试各语言偏好，最后尝试默认区域；`*` 视为默认区域。
    pub fn apply(&self, ranges: &[LanguageRange], who: Option<&str>) -> String {
        let found = ranges
            .iter()
            .map(LanguageRange::locale)
            .chain(std::iter::once(&self.default_locale))
            .map(|l| match l.is_undetermined() {
                true => &self.default_locale,
                false => l,
            })
            .find_map(|l| self.messages.get(l));
        match found {
            Some(&(template, subject)) => template.replace("{}", who.unwrap_or(subject)),
            None => format!("Hello, {}!", who.unwrap_or("world")),
        }
    }
}

impl Default for GreetingService {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct Greeting {
    message: String,
}

/// `/greeting` 的处理器，每个请求构建一次
pub struct GreetingController {
    exchange: Exchange,
    service: Arc<GreetingService>,
}

impl GreetingController {
    fn new(exchange: Exchange, service: Arc<GreetingService>) -> Self {
        Self { exchange, service }
    }

    fn get(&mut self) -> Result<u16, BoxError> {
        let x = &mut self.exchange;
        let message = self
            .service
            .apply(x.accept_languages(), x.request_param("who"));
        x.application_json(&Greeting { message })?;
        Ok(200)
    }

    fn post(&mut self) -> Result<u16, BoxError> {
        let x = &mut self.exchange;
        let greeting = format!("Hello, {}!", x.request_param_or("who", "world"));
        x.response_headers()
            .add("Expires", "0")
            .add("X-greeting", &greeting);
        Ok(204)
    }
}

impl Controller for GreetingController {
    fn into_exchange(self) -> Exchange {
        self.exchange
    }
}

/// # 程序入口点
///
/// 初始化日志、加载配置、按配置构建 Tokio 运行时并开始服务。
fn main() {
    init_logging();

    let config = match load_config(std::env::args().nth(1)) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    info!("配置文件已载入");

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建Tokio运行时：{}", e);
            process::exit(1);
        }
    };

    let result = runtime.block_on(run(config));
    // stdin 读取任务不会自行结束
    runtime.shutdown_timeout(Duration::from_secs(1));
    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Exception> {
    let service = Arc::new(GreetingService::new());
    let server = HttpServer::with(move |x| GreetingController::new(x, Arc::clone(&service)))
        .route("/greeting")?
        .get(GreetingController::get)
        .post(GreetingController::post)
        .start(&config)
        .await?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    tokio::spawn(console(
        server.active_connection(),
        server.routes().clone(),
        Arc::clone(&shutdown_tx),
    ));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到Ctrl-C，开始停机");
            let _ = shutdown_tx.send(true);
        }
    });

    server
        .serve_until(async move {
            while !*shutdown_rx.borrow_and_update() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
    Ok(())
}

/// 读取配置文件，可选的第一个命令行参数覆盖端口
fn load_config(port_arg: Option<String>) -> Result<Config, Exception> {
    let config = match Path::new(CONFIG_PATH).exists() {
        true => Config::from_toml(CONFIG_PATH)?,
        false => {
            warn!("找不到{}，使用默认配置", CONFIG_PATH);
            Config::new()
        }
    };
    match port_arg {
        Some(arg) => match arg.parse::<u16>() {
            Ok(port) => Ok(config.with_port(port)),
            Err(_) => Err(Exception::InvalidConfig(format!("非法端口：{}", arg))),
        },
        None => Ok(config),
    }
}

/// 从 YAML 文件初始化 log4rs；文件不可用时退回到等价的控制台配置
fn init_logging() {
    let e = match log4rs::init_file(LOG_CONFIG_PATH, Default::default()) {
        Ok(()) => return,
        Err(e) => e,
    };
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}",
        )))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match config.map(log4rs::init_config) {
        Ok(Ok(_)) => warn!("无法载入{}：{}，使用默认控制台日志配置", LOG_CONFIG_PATH, e),
        Ok(Err(e)) => eprintln!("无法初始化日志系统：{}", e),
        Err(e) => eprintln!("无法构建日志配置：{}", e),
    }
}

/// 后台管理控制台
async fn console(
    active_connection: Arc<AtomicUsize>,
    routes: RouteTableSnapshot,
    shutdown_tx: Arc<watch::Sender<bool>>,
) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match input.trim() {
            "stop" => {
                println!("停机指令已激活，服务器将在处理完进行中的请求后关闭...");
                let _ = shutdown_tx.send(true);
                break;
            }
            "status" => {
                println!("== Webrouter 状态 ===");
                println!("当前活跃连接数: {}", active_connection.load(Ordering::SeqCst));
                println!("路由条数: {}", routes.len());
                println!("====================");
            }
            "routes" => {
                println!("== Webrouter 路由 ===");
                for route in routes.iter() {
                    println!(
                        "{:<8}{:<24}{}",
                        route.method(),
                        route.context_path(),
                        route.controller()
                    );
                }
                println!("====================");
            }
            "help" => {
                println!("== Webrouter Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("routes - 列出已注册的路由");
                println!("help   - 显示此帮助信息");
                println!("====================");
            }
            "" => {}
            cmd => println!("无效的命令：{}", cmd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrouter::{accept_languages, Request};

    fn greet(header: &str, who: Option<&str>) -> String {
        GreetingService::new().apply(&accept_languages(Some(header)), who)
    }

    #[test]
    fn test_default_locale_without_preferences() {
        assert_eq!(GreetingService::new().apply(&[], None), "Hello, world!");
        assert_eq!(GreetingService::default().apply(&[], Some("Ada")), "Hello, Ada!");
    }

    #[test]
    fn test_exact_locale_match() {
        assert_eq!(greet("en-US", None), "Howdy, y'all!");
        assert_eq!(greet("de", Some("Ada")), "Hallo, Ada!");
        assert_eq!(greet("de-ch", None), "Grüazie, miteinander!");
    }

    #[test]
    fn test_weights_decide_order() {
        assert_eq!(greet("de-CH;q=0.5, de-AT", None), "Servus, miteinander!");
    }

    #[test]
    fn test_unknown_locales_fall_back_to_default() {
        assert_eq!(greet("fr, it;q=0.5", None), "Hello, world!");
        assert_eq!(greet("fr, de;q=0.5", None), "Hallo, Welt!");
    }

    #[test]
    fn test_undetermined_maps_to_default() {
        assert_eq!(greet("*, de;q=0.5", None), "Hello, world!");
    }

    #[test]
    fn test_load_config_rejects_invalid_port() {
        match load_config(Some("eighty".to_string())) {
            Err(Exception::InvalidConfig(_)) => {}
            other => panic!("Expected InvalidConfig, got {:?}", other.map(|c| c.port())),
        }
    }

    #[test]
    fn test_greeting_routes() {
        let service = Arc::new(GreetingService::new());
        let dispatcher = HttpServer::with(move |x| GreetingController::new(x, Arc::clone(&service)))
            .route("/greeting")
            .unwrap()
            .get(GreetingController::get)
            .post(GreetingController::post)
            .build();

        let request = Request::try_from(
            b"GET /greeting?who=Ada HTTP/1.1\r\nAccept-Language: de\r\n\r\n",
            0,
        )
        .unwrap();
        let response = dispatcher.dispatch(request, 0).response;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.headers().get("Content-Type"), Some("application/json"));
        assert_eq!(
            response.content().unwrap().as_ref(),
            br#"{"message":"Hallo, Ada!"}"#
        );

        let request = Request::try_from(b"POST /greeting HTTP/1.1\r\n\r\n", 1).unwrap();
        let response = dispatcher.dispatch(request, 1).response;
        assert_eq!(response.status_code(), 204);
        assert_eq!(response.headers().get("Expires"), Some("0"));
        assert_eq!(response.headers().get("X-greeting"), Some("Hello, world!"));
        assert_eq!(response.content(), None);
    }
}
