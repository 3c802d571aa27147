// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 头部工具模块
//!
//! - [`Headers`]：保持插入顺序、字段名大小写不敏感的多值映射，请求与响应共用。
//! - [`accept_languages`]：解析 `Accept-Language`，按权重得到有序的语言偏好列表。
//!
//! 语言范围语法参考 [RFC 4647 2.1](https://tools.ietf.org/html/rfc4647#section-2.1)
//! 与 [RFC 7231 5.3.1](https://tools.ietf.org/html/rfc7231#section-5.3.1)。

use std::fmt;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

lazy_static! {
    /// 带 q 值的语言范围，例如 `de-CH;q=0.8`、`*;q=0.1`。权重最多三位小数，取值 [0, 1]。
    static ref QVALUE_PATTERN: Regex = Regex::new(
        r"(?i)^(?P<range>[a-z]{1,8}(?:-[a-z0-9]{1,8})*|\*)\s*;\s*q=(?P<qvalue>0(?:\.\d{0,3})?|1(?:\.0{0,3})?)$"
    )
    .expect("QVALUE_PATTERN is a valid regex");
}

/// 大小写不敏感的 HTTP 头部多值映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个头部，不影响同名的已有条目。
    ///
    /// 字段名与字段值中的 CR、LF 会被剔除，避免写出时拆分出额外的头部行。
    pub fn add(&mut self, name: &str, value: &str) -> &mut Self {
        let name = strip_line_breaks(name);
        let value = strip_line_breaks(value);
        self.entries.push((name, value));
        self
    }

    /// 替换同名的全部条目
    pub fn set(&mut self, name: &str, value: &str) -> &mut Self {
        self.remove(name);
        self.add(name, value)
    }

    /// 返回第一个同名条目的值
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

fn strip_line_breaks(text: &str) -> String {
    if !text.contains(['\r', '\n']) {
        return text.to_string();
    }
    warn!("头部中含有换行符，已剔除：{:?}", text);
    text.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

/// 由语言标签得到的区域标识，例如 `en`、`de-CH`。
///
/// 语言子标签统一小写，两位字母的地区子标签统一大写；`*` 表示未定区域。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locale(String);

impl Locale {
    pub fn from_tag(tag: &str) -> Self {
        let normalized = tag
            .trim()
            .split('-')
            .enumerate()
            .map(|(i, sub)| {
                if i > 0 && sub.len() == 2 && sub.chars().all(|c| c.is_ascii_alphabetic()) {
                    sub.to_ascii_uppercase()
                } else {
                    sub.to_ascii_lowercase()
                }
            })
            .collect::<Vec<_>>()
            .join("-");
        Locale(normalized)
    }

    /// 匹配基本语言范围 `*` 的未定区域
    pub fn undetermined() -> Self {
        Locale("*".to_string())
    }

    pub fn is_undetermined(&self) -> bool {
        self.0 == "*"
    }

    /// 主语言子标签
    pub fn language(&self) -> &str {
        self.0.split('-').next().unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 一条带权重的语言偏好
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageRange {
    locale: Locale,
    weight: f32,
}

impl LanguageRange {
    pub fn new(locale: Locale, weight: f32) -> Self {
        Self { locale, weight }
    }

    pub fn locale(&self) -> &Locale {
        &self.locale
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }
}

/// 解析 `Accept-Language` 头部的值。
///
/// 按 `,` 切分并去除空白；匹配 `;q=` 语法的条目取其权重，否则权重为 1.0（整个条目作为标签）。
/// 结果按权重稳定降序排列，同权重保持头部中的原始顺序。头部缺失或为空时返回空列表。
pub fn accept_languages(header: Option<&str>) -> Vec<LanguageRange> {
    let header = match header {
        Some(h) => h,
        None => return Vec::new(),
    };
    let mut ranges: Vec<LanguageRange> = header
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match QVALUE_PATTERN.captures(s) {
            Some(caps) => {
                let weight = caps["qvalue"].parse::<f32>().unwrap_or(1.0);
                LanguageRange::new(Locale::from_tag(&caps["range"]), weight)
            }
            None => LanguageRange::new(Locale::from_tag(s), 1.0),
        })
        .collect();
    // sort_by 是稳定排序
    ranges.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranges
}
