// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::{collections::BTreeMap, error::Error};

use percent_encoding::percent_decode_str;

/// 解析查询字符串。
///
/// 按 `&` 切分参数，再按第一个 `=` 切分键值；没有 `=` 的参数只登记键，不追加值。
/// 同名参数的值按出现顺序保存。
pub fn parse_query(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in query.unwrap_or("").split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => params
                .entry(percent_decode(key))
                .or_default()
                .push(percent_decode(value)),
            None => {
                params.entry(percent_decode(pair)).or_default();
            }
        }
    }
    params
}

/// 解码 `%XX` 转义。非法转义原样保留，解码结果按 UTF-8 有损转换。
pub fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

/// 转义 HTML 特殊字符
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// 把错误及其 `source` 链渲染为多行文本，用于 500 页面与日志
pub fn describe_failure(error: &(dyn Error + 'static)) -> String {
    let mut report = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        report.push_str("\nCaused by: ");
        report.push_str(&cause.to_string());
        source = cause.source();
    }
    report
}
