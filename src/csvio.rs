//! CSV 交换格式 `.csv` / `.csv.gz` 编解码
//!
//! 文本表格：`#` 开头的指示行声明原点与调色板，随后是 `x,y,z,block,properties`
//! 列头与数据行。声明了调色板时 `block` 列为局部索引，否则为规范状态名称。
//! 扩展数据在表格中没有列位，既定有损。gzip 按魔数透明处理。

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::format::Format;
use crate::nbt;
use crate::registry::{registry, LookupOptions, RawBlock};
use crate::volume::{BlockState, Metadata, Palette, Volume};

pub fn decode(data: &[u8], opts: &LookupOptions) -> Result<Volume> {
    let body = nbt::maybe_gunzip(data)?;
    let text = std::str::from_utf8(&body)
        .map_err(|_| Error::format("内容不是合法 UTF-8"))?;

    let mut origin = (0i32, 0i32, 0i32);
    let mut declared: Vec<(usize, BlockState)> = Vec::new();
    let mut table = String::new();
    let mut directive_lines = 0u64;

    for (line_no, line) in text.lines().enumerate() {
        let line_no = line_no as u64 + 1;
        if let Some(directive) = line.strip_prefix('#') {
            if !table.is_empty() {
                return Err(Error::format_at("指示行必须位于数据之前", Some(line_no)));
            }
            directive_lines += 1;
            let fields: Vec<&str> = directive.split(',').collect();
            match fields.first().copied() {
                Some("origin") if fields.len() == 4 => {
                    origin = (
                        parse_i32(fields[1], line_no)?,
                        parse_i32(fields[2], line_no)?,
                        parse_i32(fields[3], line_no)?,
                    );
                }
                Some("palette") if fields.len() == 4 => {
                    let index = fields[1].parse::<usize>().map_err(|_| {
                        Error::format_at(
                            format!("调色板索引不是整数: {}", fields[1]),
                            Some(line_no),
                        )
                    })?;
                    let props = parse_props(fields[3], line_no)?;
                    let state =
                        registry().resolve(Format::Csv, fields[2], Some(&props), opts)?;
                    declared.push((index, state));
                }
                _ => {
                    return Err(Error::format_at(
                        format!("无法识别的指示行: #{}", directive),
                        Some(line_no),
                    ))
                }
            }
        } else {
            table.push_str(line);
            table.push('\n');
        }
    }

    // 声明的调色板按索引排列，必须从 0 起连续
    let palette = if declared.is_empty() {
        None
    } else {
        declared.sort_by_key(|(i, _)| *i);
        let mut entries = Vec::with_capacity(declared.len());
        for (expect, (index, state)) in declared.into_iter().enumerate() {
            if index != expect {
                return Err(Error::Palette(format!("调色板索引不连续: {}", index)));
            }
            entries.push(state);
        }
        Some(Palette::from_entries(entries)?)
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(table.as_bytes());
    {
        let headers = reader.headers()?;
        let expect = ["x", "y", "z", "block", "properties"];
        if headers.len() != expect.len()
            || !headers.iter().zip(expect).all(|(h, e)| h.eq_ignore_ascii_case(e))
        {
            return Err(Error::format("列头必须为 x,y,z,block,properties"));
        }
    }

    let mut cells: HashMap<(u32, u32, u32), u32> = HashMap::new();
    let mut synth = Palette::air();
    let mut cache: HashMap<(String, BTreeMap<String, String>), u32> = HashMap::new();

    for record in reader.records() {
        let record = record?;
        let line_no = record
            .position()
            .map(|p| p.line() + directive_lines)
            .unwrap_or(0);
        if record.len() != 5 {
            return Err(Error::format_at("数据行字段数不是 5", Some(line_no)));
        }
        let x = parse_u32(&record[0], line_no)?;
        let y = parse_u32(&record[1], line_no)?;
        let z = parse_u32(&record[2], line_no)?;

        let idx = match &palette {
            Some(palette) => {
                let index = record[3].parse::<u32>().map_err(|_| {
                    Error::format_at(
                        format!("block 列不是调色板索引: {}", &record[3]),
                        Some(line_no),
                    )
                })?;
                if index as usize >= palette.len() {
                    return Err(Error::Palette(format!(
                        "索引 {} 超出调色板长度 {}",
                        index,
                        palette.len()
                    )));
                }
                index
            }
            None => {
                let props = parse_props(&record[4], line_no)?;
                let key = (record[3].to_string(), props.clone());
                match cache.get(&key) {
                    Some(&idx) => idx,
                    None => {
                        let state =
                            registry().resolve(Format::Csv, &record[3], Some(&props), opts)?;
                        let idx = synth.intern(state);
                        cache.insert(key, idx);
                        idx
                    }
                }
            }
        };

        if cells.insert((x, y, z), idx).is_some() {
            return Err(Error::format_at(
                format!("坐标 ({}, {}, {}) 重复出现", x, y, z),
                Some(line_no),
            ));
        }
    }

    let palette = palette.unwrap_or(synth);
    if cells.is_empty() {
        let mut v = Volume::empty(Some(Format::Csv));
        v.metadata.origin = origin;
        return Ok(v);
    }

    let nx = cells.keys().map(|&(x, _, _)| x).max().unwrap_or(0) as usize + 1;
    let ny = cells.keys().map(|&(_, y, _)| y).max().unwrap_or(0) as usize + 1;
    let nz = cells.keys().map(|&(_, _, z)| z).max().unwrap_or(0) as usize + 1;
    let count = nbt::checked_volume(nx, ny, nz)?;

    let mut indices = vec![0u32; count];
    for ((x, y, z), idx) in cells {
        indices[(y as usize * nz + z as usize) * nx + x as usize] = idx;
    }

    let mut metadata = Metadata::new(Some(Format::Csv));
    metadata.origin = origin;
    Volume::new((nx, ny, nz), indices, palette, HashMap::new(), metadata)
}

/// 编码为调色板模式的 CSV 文本，仅写非空气行
pub fn encode(volume: &Volume) -> Result<Vec<u8>> {
    let (nx, ny, nz) = volume.dims();
    let origin = volume.metadata.origin;

    let mut out = Vec::new();
    out.extend_from_slice(
        format!("#origin,{},{},{}\n", origin.0, origin.1, origin.2).as_bytes(),
    );
    for (i, state) in volume.palette().entries().iter().enumerate() {
        let RawBlock::Name { name, properties } = registry().project(Format::Csv, state)? else {
            return Err(Error::format("投影结果类型不符"));
        };
        out.extend_from_slice(
            format!("#palette,{},{},{}\n", i, name, format_props(&properties)).as_bytes(),
        );
    }

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["x", "y", "z", "block", "properties"])?;
    for y in 0..ny {
        for z in 0..nz {
            for x in 0..nx {
                let idx = volume.indices()[volume.cell_index(x, y, z)];
                if idx == 0 {
                    continue;
                }
                writer.write_record([
                    x.to_string(),
                    y.to_string(),
                    z.to_string(),
                    idx.to_string(),
                    String::new(),
                ])?;
            }
        }
    }
    writer
        .into_inner()
        .map_err(|e| Error::format(format!("CSV 写出失败: {}", e)))
}

/// 编码并 gzip 压缩（`.csv.gz`）
pub fn encode_gz(volume: &Volume) -> Result<Vec<u8>> {
    nbt::gzip(&encode(volume)?)
}

fn parse_i32(s: &str, line_no: u64) -> Result<i32> {
    s.trim()
        .parse::<i32>()
        .map_err(|_| Error::format_at(format!("坐标不是整数: {}", s), Some(line_no)))
}

fn parse_u32(s: &str, line_no: u64) -> Result<u32> {
    s.trim()
        .parse::<u32>()
        .map_err(|_| Error::format_at(format!("坐标不是非负整数: {}", s), Some(line_no)))
}

/// 解析 `k=v;k=v` 形式的属性单元格
fn parse_props(s: &str, line_no: u64) -> Result<BTreeMap<String, String>> {
    let mut props = BTreeMap::new();
    let s = s.trim();
    if s.is_empty() {
        return Ok(props);
    }
    for pair in s.split(';') {
        let mut it = pair.splitn(2, '=');
        let key = it.next().unwrap_or("").trim();
        let value = it.next().map(str::trim);
        let (Some(value), false) = (value, key.is_empty()) else {
            return Err(Error::format_at(
                format!("属性单元格格式不合法: {}", pair),
                Some(line_no),
            ));
        };
        props.insert(key.to_string(), value.to_string());
    }
    Ok(props)
}

fn format_props(props: &BTreeMap<String, String>) -> String {
    props
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(";")
}
