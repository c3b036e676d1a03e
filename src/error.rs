//! 错误类型定义

use crate::format::Format;
use thiserror::Error;

/// 库级错误
#[derive(Debug, Error)]
pub enum Error {
    /// 容器损坏或被截断
    #[error("格式错误: {reason}{}", offset_note(.offset))]
    Format {
        reason: String,
        /// 字节或行偏移（可用时）
        offset: Option<u64>,
    },

    /// 声明的版本不在支持范围内
    #[error("不支持的版本: {format:?} 声明 {declared}, 支持 {supported}")]
    UnsupportedVersion {
        format: Format,
        declared: String,
        supported: &'static str,
    },

    /// 严格模式下未知的原始方块标识
    #[error("未知方块标识: {raw} (来源格式: {format:?})")]
    UnknownBlock { format: Format, raw: String },

    /// 规范化方块无法投影到目标格式
    #[error("无法表示的方块: {state} (目标格式: {format:?})")]
    UnrepresentableBlock { format: Format, state: String },

    /// 数组形状不合法
    #[error("数组形状错误: {0}")]
    Shape(String),

    /// 调色板缺失或索引越界
    #[error("调色板错误: {0}")]
    Palette(String),

    /// 裁剪范围不合法
    #[error("范围错误: {0}")]
    Range(String),

    /// 区域合并冲突
    #[error("区域冲突: {0}")]
    Conflict(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

fn offset_note(offset: &Option<u64>) -> String {
    match offset {
        Some(o) => format!(" (偏移 {})", o),
        None => String::new(),
    }
}

impl Error {
    /// 构造带偏移信息的格式错误
    pub fn format_at(reason: impl Into<String>, offset: Option<u64>) -> Self {
        Error::Format {
            reason: reason.into(),
            offset,
        }
    }

    /// 构造无偏移信息的格式错误
    pub fn format(reason: impl Into<String>) -> Self {
        Error::format_at(reason, None)
    }
}

impl From<fastnbt::error::Error> for Error {
    fn from(e: fastnbt::error::Error) -> Self {
        Error::format(format!("NBT 解析失败: {}", e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::format_at(format!("JSON 解析失败: {}", e), Some(e.line() as u64))
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        let offset = e.position().map(|p| p.line());
        Error::format_at(format!("CSV 解析失败: {}", e), offset)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_message_includes_offset_when_present() {
        let with = Error::format_at("数据被截断", Some(42));
        assert_eq!(with.to_string(), "格式错误: 数据被截断 (偏移 42)");
        let without = Error::format("数据被截断");
        assert_eq!(without.to_string(), "格式错误: 数据被截断");
    }
}
