// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::warn;
use std::{fs, str::FromStr, time::Duration};

use crate::exception::Exception;

/// 服务运行参数，从 TOML 文件读取。缺失的字段取默认值。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    port: u16,
    /// 为真时只监听 127.0.0.1
    local: bool,
    /// 0 表示使用 CPU 核心数
    worker_threads: usize,
    max_header_size: usize,
    max_body_size: usize,
    read_timeout_secs: u64,
}

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_HEADER_SIZE: usize = 8192; // 8KB
const DEFAULT_MAX_BODY_SIZE: usize = 1048576; // 1MB
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            local: true,
            worker_threads: 0,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        let mut config = Self::default();
        config.normalize();
        config
    }

    /// 读取并解析配置文件。文件不存在或内容非法都视为配置错误。
    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let text = fs::read_to_string(filename).map_err(|e| {
            Exception::InvalidConfig(format!("无法读取配置文件{}：{}", filename, e))
        })?;
        text.parse()
    }

    /// 覆盖端口，0 表示由系统分配
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.max_header_size == 0 {
            warn!(
                "max_header_size被设置为0，将无法接收任何请求，因此该值将被改为{}。",
                DEFAULT_MAX_HEADER_SIZE
            );
            self.max_header_size = DEFAULT_MAX_HEADER_SIZE;
        }
        if self.read_timeout_secs == 0 {
            warn!(
                "read_timeout_secs被设置为0，该值将被改为{}。",
                DEFAULT_READ_TIMEOUT_SECS
            );
            self.read_timeout_secs = DEFAULT_READ_TIMEOUT_SECS;
        }
    }
}

impl FromStr for Config {
    type Err = Exception;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut config: Config =
            toml::from_str(text).map_err(|e| Exception::InvalidConfig(e.to_string()))?;
        config.normalize();
        Ok(config)
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn max_header_size(&self) -> usize {
        self.max_header_size
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
