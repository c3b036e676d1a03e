//! Schematica `.schematic` 编解码
//!
//! gzip NBT 容器，方块以旧版数字 ID + data 值的字节数组存储，超出 255 的
//! ID 通过 AddBlocks 半字节扩展。身份翻译走旧版数字表。

use std::collections::{BTreeMap, HashMap};

use fastnbt::{ByteArray, Value};

use crate::error::{Error, Result};
use crate::format::Format;
use crate::nbt;
use crate::registry::{registry, LookupOptions, RawBlock};
use crate::volume::{Metadata, Palette, Volume};

const SUPPORTED: &str = "Alpha";

pub fn decode(data: &[u8], opts: &LookupOptions) -> Result<Volume> {
    let root = nbt::read_compound(data)?;

    match root.get("Materials") {
        Some(Value::String(materials)) if materials == "Alpha" => {}
        Some(Value::String(materials)) => {
            return Err(Error::UnsupportedVersion {
                format: Format::Schematic,
                declared: materials.clone(),
                supported: SUPPORTED,
            });
        }
        _ => {
            return Err(Error::UnsupportedVersion {
                format: Format::Schematic,
                declared: "缺失".to_string(),
                supported: SUPPORTED,
            });
        }
    }

    let nx = nbt::get_int(&root, "Width")? as usize;
    let ny = nbt::get_int(&root, "Height")? as usize;
    let nz = nbt::get_int(&root, "Length")? as usize;
    let count = nbt::checked_volume(nx, ny, nz)?;

    let Some(Value::ByteArray(blocks)) = root.get("Blocks") else {
        return Err(Error::format("缺少 Blocks 字段"));
    };
    let Some(Value::ByteArray(block_data)) = root.get("Data") else {
        return Err(Error::format("缺少 Data 字段"));
    };
    if blocks.len() != count {
        return Err(Error::format(format!(
            "Blocks 长度 {} 与尺寸 {}x{}x{} 不符",
            blocks.len(),
            nx,
            ny,
            nz
        )));
    }
    if block_data.len() != count {
        return Err(Error::format(format!(
            "Data 长度 {} 与方块数量 {} 不符",
            block_data.len(),
            count
        )));
    }

    let add_blocks: Option<Vec<i8>> = match root.get("AddBlocks") {
        Some(Value::ByteArray(arr)) => {
            if arr.len() < (count + 1) / 2 {
                return Err(Error::format(format!(
                    "AddBlocks 长度 {} 不足以覆盖 {} 个方块",
                    arr.len(),
                    count
                )));
            }
            Some(arr.iter().copied().collect())
        }
        _ => None,
    };

    let blocks: Vec<u8> = blocks.iter().map(|&b| b as u8).collect();
    let block_data: Vec<u8> = block_data.iter().map(|&b| b as u8).collect();

    let mut palette = Palette::air();
    let mut cache: HashMap<(u16, u8), u32> = HashMap::new();
    let mut indices = Vec::with_capacity(count);

    // 文件顺序即 (y * Length + z) * Width + x，与内部顺序一致
    for i in 0..count {
        let mut id = blocks[i] as u16;
        if let Some(add) = &add_blocks {
            let nibble = (add[i >> 1] as u8) & if i & 1 == 0 { 0x0f } else { 0xf0 };
            id |= if i & 1 == 0 {
                (nibble as u16) << 8
            } else {
                (nibble as u16) << 4
            };
        }
        let data = block_data[i] & 0x0f;

        let idx = match cache.get(&(id, data)) {
            Some(&idx) => idx,
            None => {
                let mut raw_props = BTreeMap::new();
                raw_props.insert("data".to_string(), data.to_string());
                let state = registry().resolve(
                    Format::Schematic,
                    &id.to_string(),
                    Some(&raw_props),
                    opts,
                )?;
                let idx = palette.intern(state);
                cache.insert((id, data), idx);
                idx
            }
        };
        indices.push(idx);
    }

    let mut extra = HashMap::new();
    if let Some(Value::List(entities)) = root.get("TileEntities") {
        for entity in entities {
            let Value::Compound(entity) = entity else {
                return Err(Error::format("方块实体不是复合标签"));
            };
            let (x, y, z) = nbt::get_xyz(entity)?;
            if x < 0 || y < 0 || z < 0 || x as usize >= nx || y as usize >= ny || z as usize >= nz
            {
                return Err(Error::format(format!(
                    "方块实体坐标 ({}, {}, {}) 越界",
                    x, y, z
                )));
            }
            let mut body = entity.clone();
            body.remove("x");
            body.remove("y");
            body.remove("z");
            extra.insert((x as u32, y as u32, z as u32), Value::Compound(body));
        }
    }

    let mut metadata = Metadata::new(Some(Format::Schematic));
    if let (Ok(ox), Ok(oy), Ok(oz)) = (
        nbt::get_int(&root, "WEOffsetX"),
        nbt::get_int(&root, "WEOffsetY"),
        nbt::get_int(&root, "WEOffsetZ"),
    ) {
        metadata.origin = (ox, oy, oz);
    }

    Volume::new((nx, ny, nz), indices, palette, extra, metadata)
}

pub fn encode(volume: &Volume) -> Result<Vec<u8>> {
    let (nx, ny, nz) = volume.dims();
    if nx > i16::MAX as usize || ny > i16::MAX as usize || nz > i16::MAX as usize {
        return Err(Error::format(format!(
            "尺寸 {}x{}x{} 超出 .schematic 表示范围",
            nx, ny, nz
        )));
    }

    // 调色板逐项投影为旧版 ID；无法表示的状态在此失败，不做静默丢弃
    let mut legacy: Vec<(u8, u8)> = Vec::with_capacity(volume.palette().len());
    for state in volume.palette().entries() {
        let RawBlock::Legacy { id, data } = registry().project(Format::Schematic, state)?
        else {
            return Err(Error::format("投影结果类型不符"));
        };
        legacy.push((id, data));
    }

    let mut blocks = Vec::with_capacity(volume.len());
    let mut block_data = Vec::with_capacity(volume.len());
    for &index in volume.indices() {
        let (id, data) = legacy[index as usize];
        blocks.push(id as i8);
        block_data.push(data as i8);
    }

    let mut entities = Vec::with_capacity(volume.extra().len());
    let mut keys: Vec<&(u32, u32, u32)> = volume.extra().keys().collect();
    keys.sort();
    for key in keys {
        let mut body = match &volume.extra()[key] {
            Value::Compound(map) => map.clone(),
            other => {
                let mut map = HashMap::new();
                map.insert("data".to_string(), other.clone());
                map
            }
        };
        body.insert("x".to_string(), Value::Int(key.0 as i32));
        body.insert("y".to_string(), Value::Int(key.1 as i32));
        body.insert("z".to_string(), Value::Int(key.2 as i32));
        entities.push(Value::Compound(body));
    }

    let origin = volume.metadata.origin;
    let mut root = HashMap::new();
    root.insert("Materials".to_string(), Value::String("Alpha".to_string()));
    root.insert("Width".to_string(), Value::Short(nx as i16));
    root.insert("Height".to_string(), Value::Short(ny as i16));
    root.insert("Length".to_string(), Value::Short(nz as i16));
    root.insert(
        "Blocks".to_string(),
        Value::ByteArray(ByteArray::new(blocks)),
    );
    root.insert(
        "Data".to_string(),
        Value::ByteArray(ByteArray::new(block_data)),
    );
    root.insert("TileEntities".to_string(), Value::List(entities));
    root.insert("Entities".to_string(), Value::List(Vec::new()));
    root.insert("WEOffsetX".to_string(), Value::Int(origin.0));
    root.insert("WEOffsetY".to_string(), Value::Int(origin.1));
    root.insert("WEOffsetZ".to_string(), Value::Int(origin.2));

    nbt::write_compound(root)
}
