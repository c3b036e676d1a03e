//! 格式枚举与编解码分发
//!
//! 封闭的格式集合，统一 `decode`/`encode` 能力接口；`.js`/`.json` 等文本
//! 容器按内容形状识别，而不只看扩展名。

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::registry::LookupOptions;
use crate::volume::Volume;
use crate::{buildpaste, csvio, grabcraft, litematic, nbt, schem, schematic, structure};

/// 支持的结构文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Litematica `.litematic`
    Litematic,
    /// Sponge `.schem`
    Schem,
    /// Schematica `.schematic`
    Schematic,
    /// 原版结构方块 `.nbt`
    Structure,
    /// BuildPaste `.json`
    BuildPaste,
    /// GrabCraft `.js` 脚本
    GrabCraft,
    /// CSV 交换格式 `.csv` / `.csv.gz`
    Csv,
}

static GRABCRAFT_ASSIGN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*(?:var|let|const)\s+\w+\s*=\s*\{").expect("内置正则不合法")
});

impl Format {
    /// 惯用文件扩展名
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Litematic => "litematic",
            Format::Schem => "schem",
            Format::Schematic => "schematic",
            Format::Structure => "nbt",
            Format::BuildPaste => "json",
            Format::GrabCraft => "js",
            Format::Csv => "csv",
        }
    }

    /// 按内容形状识别格式，路径扩展名仅作提示
    pub fn detect(path: Option<&Path>, data: &[u8]) -> Result<Format> {
        let body = nbt::maybe_gunzip(data)?;

        // NBT 家族：根复合标签以 0x0a 开头
        if body.first() == Some(&0x0a) {
            let root = nbt::read_compound(&body)?;
            if root.contains_key("Regions") {
                return Ok(Format::Litematic);
            }
            if root.contains_key("size") && root.contains_key("palette") {
                return Ok(Format::Structure);
            }
            if root.contains_key("Materials")
                || (root.contains_key("Blocks") && root.contains_key("Data"))
            {
                return Ok(Format::Schematic);
            }
            if root.contains_key("Schematic")
                || root.contains_key("Palette")
                || root.contains_key("BlockData")
            {
                return Ok(Format::Schem);
            }
            return Err(Error::format("无法识别的 NBT 结构"));
        }

        let text = std::str::from_utf8(&body)
            .map_err(|_| Error::format("内容既不是 NBT 也不是文本"))?;
        let trimmed = text.trim_start();

        if GRABCRAFT_ASSIGN.is_match(trimmed) || trimmed.contains("RenderObject") {
            return Ok(Format::GrabCraft);
        }
        if trimmed.starts_with('{') {
            let json: serde_json::Value = serde_json::from_str(trimmed)?;
            if json.get("blocks").is_some() {
                return Ok(Format::BuildPaste);
            }
            return Err(Error::format("JSON 内容缺少 blocks 字段"));
        }

        // CSV：调色板头、列头或扩展名提示
        let first_line = trimmed.lines().next().unwrap_or("");
        let ext = path
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(|s| s.to_ascii_lowercase());
        if first_line.starts_with('#')
            || first_line.replace(' ', "").starts_with("x,y,z")
            || matches!(ext.as_deref(), Some("csv") | Some("gz"))
        {
            return Ok(Format::Csv);
        }

        Err(Error::format("无法识别的文件内容"))
    }

    /// 解码为规范化结构
    pub fn decode(&self, data: &[u8], opts: &LookupOptions) -> Result<Volume> {
        match self {
            Format::Litematic => litematic::decode(data, opts),
            Format::Schem => schem::decode(data, opts),
            Format::Schematic => schematic::decode(data, opts),
            Format::Structure => structure::decode(data, opts),
            Format::BuildPaste => buildpaste::decode(data, opts),
            Format::GrabCraft => grabcraft::decode(data, opts),
            Format::Csv => csvio::decode(data, opts),
        }
    }

    /// 编码规范化结构为本格式字节
    pub fn encode(&self, volume: &Volume) -> Result<Vec<u8>> {
        match self {
            Format::Litematic => litematic::encode(volume),
            Format::Schem => schem::encode(volume),
            Format::Schematic => schematic::encode(volume),
            Format::Structure => structure::encode(volume),
            Format::BuildPaste => buildpaste::encode(volume),
            Format::GrabCraft => grabcraft::encode(volume),
            Format::Csv => csvio::encode(volume),
        }
    }
}

/// 识别并解码，一步完成
pub fn decode_auto(path: Option<&Path>, data: &[u8], opts: &LookupOptions) -> Result<(Format, Volume)> {
    let format = Format::detect(path, data)?;
    let volume = format.decode(data, opts)?;
    Ok((format, volume))
}
