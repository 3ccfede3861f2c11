//! sitemap 语句携带的参数表。
//!
//! 参数以字符串存储，由使用方按需解析；迭代顺序按键排序，保证日志与测试输出稳定。

use std::{collections::BTreeMap, str::FromStr};

/// 有序的字符串参数表。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parameters {
    entries: BTreeMap<String, String>,
}

impl Parameters {
    /// 空参数表。
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder 风格写入，便于在测试与解释器中链式构造。
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// 写入参数，返回被覆盖的旧值。
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(name.into(), value.into())
    }

    /// 读取参数。
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// 读取参数，缺省时返回 `default`。
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// 读取并解析参数。
    ///
    /// - 参数不存在：`None`；
    /// - 存在但解析失败：`Some(Err(_))`，由调用方决定回退还是报错。
    pub fn parse<T: FromStr>(&self, name: &str) -> Option<Result<T, T::Err>> {
        self.get(name).map(|raw| raw.trim().parse())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 按键序遍历。
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Parameters
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
