//! 原版结构方块 `.nbt` 编解码
//!
//! gzip NBT 容器；调色板为状态列表，方块为稀疏的 pos/state 条目，未列出
//! 的单元格视为空气。文件中的实体列表（entities）不属于方块数据，解码时
//! 丢弃——这是本格式唯一的既定有损字段。

use std::collections::{BTreeMap, HashMap};

use fastnbt::Value;

use crate::error::{Error, Result};
use crate::format::Format;
use crate::nbt;
use crate::registry::{registry, LookupOptions, RawBlock};
use crate::volume::{Metadata, Palette, Volume};

const SUPPORTED: &str = "正整数 DataVersion";
/// 编码时声明的数据版本
const DATA_VERSION: i32 = 3700;

pub fn decode(data: &[u8], opts: &LookupOptions) -> Result<Volume> {
    let root = nbt::read_compound(data)?;

    let version = match root.get("DataVersion") {
        Some(Value::Int(v)) if *v > 0 => *v,
        Some(Value::Int(v)) => {
            return Err(Error::UnsupportedVersion {
                format: Format::Structure,
                declared: v.to_string(),
                supported: SUPPORTED,
            })
        }
        _ => {
            return Err(Error::UnsupportedVersion {
                format: Format::Structure,
                declared: "缺失".to_string(),
                supported: SUPPORTED,
            })
        }
    };

    let size = read_int_triple(&root, "size")?;
    let (nx, ny, nz) = (size.0 as usize, size.1 as usize, size.2 as usize);
    if size.0 < 0 || size.1 < 0 || size.2 < 0 {
        return Err(Error::format(format!(
            "尺寸为负: {}x{}x{}",
            size.0, size.1, size.2
        )));
    }

    let palette_tag = nbt::get_list(&root, "palette")?;
    let mut file_palette = Vec::with_capacity(palette_tag.len());
    for entry in palette_tag {
        let Value::Compound(entry) = entry else {
            return Err(Error::format("调色板条目不是复合标签"));
        };
        let name = nbt::get_str(entry, "Name")?;
        let props = read_properties(entry)?;
        file_palette.push(registry().resolve(Format::Structure, name, Some(&props), opts)?);
    }

    let count = nbt::checked_volume(nx, ny, nz)?;
    let mut palette = Palette::air();
    let mut remap: Vec<Option<u32>> = vec![None; file_palette.len()];
    let mut indices = vec![0u32; count];
    let mut filled = vec![false; count];
    let mut extra = HashMap::new();

    let blocks_tag = nbt::get_list(&root, "blocks")?;
    for block in blocks_tag {
        let Value::Compound(block) = block else {
            return Err(Error::format("方块条目不是复合标签"));
        };
        let pos = read_list_triple(block, "pos")?;
        if pos.0 < 0
            || pos.1 < 0
            || pos.2 < 0
            || pos.0 as usize >= nx
            || pos.1 as usize >= ny
            || pos.2 as usize >= nz
        {
            return Err(Error::format(format!(
                "方块坐标 ({}, {}, {}) 越界",
                pos.0, pos.1, pos.2
            )));
        }
        let state = nbt::get_int(block, "state")?;
        if state < 0 || state as usize >= file_palette.len() {
            return Err(Error::format(format!("state 索引 {} 超出调色板", state)));
        }

        let cell = (pos.1 as usize * nz + pos.2 as usize) * nx + pos.0 as usize;
        if filled[cell] {
            return Err(Error::format(format!(
                "坐标 ({}, {}, {}) 存在重复方块条目",
                pos.0, pos.1, pos.2
            )));
        }
        filled[cell] = true;

        let idx = match remap[state as usize] {
            Some(idx) => idx,
            None => {
                let idx = palette.intern(file_palette[state as usize].clone());
                remap[state as usize] = Some(idx);
                idx
            }
        };
        indices[cell] = idx;

        if let Some(Value::Compound(body)) = block.get("nbt") {
            extra.insert(
                (pos.0 as u32, pos.1 as u32, pos.2 as u32),
                Value::Compound(body.clone()),
            );
        }
    }

    let mut metadata = Metadata::new(Some(Format::Structure));
    metadata.version = Some(version);
    if let Some(Value::String(author)) = root.get("author") {
        metadata.author = Some(author.clone());
    }

    Volume::new((nx, ny, nz), indices, palette, extra, metadata)
}

pub fn encode(volume: &Volume) -> Result<Vec<u8>> {
    let (nx, ny, nz) = volume.dims();

    let mut palette_list = Vec::with_capacity(volume.palette().len());
    for state in volume.palette().entries() {
        let RawBlock::Name { name, properties } =
            registry().project(Format::Structure, state)?
        else {
            return Err(Error::format("投影结果类型不符"));
        };
        let mut entry = HashMap::new();
        entry.insert("Name".to_string(), Value::String(name));
        if !properties.is_empty() {
            let props: HashMap<String, Value> = properties
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            entry.insert("Properties".to_string(), Value::Compound(props));
        }
        palette_list.push(Value::Compound(entry));
    }

    // 只写非空气单元格；持有扩展数据的空气单元格仍需条目承载 nbt
    let mut blocks = Vec::new();
    for y in 0..ny {
        for z in 0..nz {
            for x in 0..nx {
                let idx = volume.indices()[volume.cell_index(x, y, z)];
                let coords = (x as u32, y as u32, z as u32);
                let body = volume.extra().get(&coords);
                if idx == 0 && body.is_none() {
                    continue;
                }
                let mut block = HashMap::new();
                block.insert(
                    "pos".to_string(),
                    Value::List(vec![
                        Value::Int(x as i32),
                        Value::Int(y as i32),
                        Value::Int(z as i32),
                    ]),
                );
                block.insert("state".to_string(), Value::Int(idx as i32));
                if let Some(body) = body {
                    let body = match body {
                        Value::Compound(map) => Value::Compound(map.clone()),
                        other => other.clone(),
                    };
                    block.insert("nbt".to_string(), body);
                }
                blocks.push(Value::Compound(block));
            }
        }
    }

    let mut root = HashMap::new();
    root.insert(
        "DataVersion".to_string(),
        Value::Int(volume.metadata.version.filter(|v| *v > 0).unwrap_or(DATA_VERSION)),
    );
    root.insert(
        "size".to_string(),
        Value::List(vec![
            Value::Int(nx as i32),
            Value::Int(ny as i32),
            Value::Int(nz as i32),
        ]),
    );
    root.insert("palette".to_string(), Value::List(palette_list));
    root.insert("blocks".to_string(), Value::List(blocks));
    root.insert("entities".to_string(), Value::List(Vec::new()));
    if let Some(author) = &volume.metadata.author {
        root.insert("author".to_string(), Value::String(author.clone()));
    }

    nbt::write_compound(root)
}

fn read_properties(entry: &HashMap<String, Value>) -> Result<BTreeMap<String, String>> {
    let mut props = BTreeMap::new();
    if let Some(Value::Compound(map)) = entry.get("Properties") {
        for (k, v) in map {
            let Value::String(v) = v else {
                return Err(Error::format(format!("属性 {} 不是字符串", k)));
            };
            props.insert(k.clone(), v.clone());
        }
    }
    Ok(props)
}

fn read_int_triple(map: &HashMap<String, Value>, key: &str) -> Result<(i32, i32, i32)> {
    read_list_triple(map, key)
}

fn read_list_triple(map: &HashMap<String, Value>, key: &str) -> Result<(i32, i32, i32)> {
    match map.get(key) {
        Some(Value::List(list)) if list.len() == 3 => {
            let mut out = [0i32; 3];
            for (i, v) in list.iter().enumerate() {
                let Value::Int(v) = v else {
                    return Err(Error::format(format!("{} 元素不是整数", key)));
                };
                out[i] = *v;
            }
            Ok((out[0], out[1], out[2]))
        }
        Some(Value::IntArray(arr)) if arr.len() == 3 => Ok((arr[0], arr[1], arr[2])),
        _ => Err(Error::format(format!("缺少三元组字段: {}", key))),
    }
}
