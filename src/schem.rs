//! Sponge `.schem` 编解码
//!
//! gzip NBT 容器，版本 1..=3；调色板为「状态串 -> 索引」复合标签，方块
//! 数据为无符号变长整数序列。编码时输出版本 2。

use std::collections::HashMap;

use fastnbt::{ByteArray, IntArray, Value};

use crate::error::{Error, Result};
use crate::format::Format;
use crate::nbt;
use crate::registry::{registry, LookupOptions, RawBlock};
use crate::volume::{Metadata, Palette, Volume};

const SUPPORTED: &str = "1..=3";
const DATA_VERSION: i32 = 3700;

pub fn decode(data: &[u8], opts: &LookupOptions) -> Result<Volume> {
    let mut root = nbt::read_compound(data)?;

    // 版本 3 把全部内容包在根级 Schematic 复合标签下
    if let Some(Value::Compound(inner)) = root.remove("Schematic") {
        root = inner;
    }

    let version = match root.get("Version") {
        Some(Value::Int(v)) => *v,
        None => 1, // 版本 1 早于 Version 字段
        _ => {
            return Err(Error::format("Version 字段类型不符"));
        }
    };
    if !(1..=3).contains(&version) {
        return Err(Error::UnsupportedVersion {
            format: Format::Schem,
            declared: version.to_string(),
            supported: SUPPORTED,
        });
    }

    let nx = nbt::get_int(&root, "Width")? as usize;
    let ny = nbt::get_int(&root, "Height")? as usize;
    let nz = nbt::get_int(&root, "Length")? as usize;

    // 版本 3 的方块数据嵌套在 Blocks 复合标签下
    let (palette_tag, data_tag, entities_tag) = if version >= 3 {
        let blocks = nbt::get_compound(&root, "Blocks")?;
        (
            nbt::get_compound(blocks, "Palette")?,
            blocks.get("Data"),
            blocks.get("BlockEntities"),
        )
    } else {
        (
            nbt::get_compound(&root, "Palette")?,
            root.get("BlockData"),
            root.get("BlockEntities").or_else(|| root.get("TileEntities")),
        )
    };

    // 文件调色板：状态串 -> 文件索引
    let max_index = palette_tag
        .values()
        .filter_map(|v| match v {
            Value::Int(i) => Some(*i),
            _ => None,
        })
        .max()
        .unwrap_or(-1);
    if max_index < 0 {
        return Err(Error::format("调色板为空"));
    }
    let mut file_palette: Vec<Option<crate::volume::BlockState>> =
        vec![None; max_index as usize + 1];
    for (key, value) in palette_tag {
        let Value::Int(index) = value else {
            return Err(Error::format(format!("调色板条目 {} 不是整数", key)));
        };
        if *index < 0 {
            return Err(Error::format(format!("调色板索引为负: {}", key)));
        }
        let (name, props) = nbt::parse_state_name(key)?;
        let state = registry().resolve(Format::Schem, &name, Some(&props), opts)?;
        file_palette[*index as usize] = Some(state);
    }

    let Some(Value::ByteArray(bytes)) = data_tag else {
        return Err(Error::format("缺少方块数据字段"));
    };
    let count = nbt::checked_volume(nx, ny, nz)?;
    let raw: Vec<i8> = bytes.iter().copied().collect();
    let cells = nbt::read_varints(&raw, count)?;

    let mut palette = Palette::air();
    let mut remap: Vec<Option<u32>> = vec![None; file_palette.len()];
    let mut indices = Vec::with_capacity(cells.len());
    for (i, &cell) in cells.iter().enumerate() {
        let cell = cell as usize;
        if cell >= file_palette.len() {
            return Err(Error::format_at(
                format!("方块数据引用未定义的调色板索引 {}", cell),
                Some(i as u64),
            ));
        }
        let idx = match remap[cell] {
            Some(idx) => idx,
            None => {
                let state = file_palette[cell].clone().ok_or_else(|| {
                    Error::format(format!("调色板索引 {} 未定义", cell))
                })?;
                let idx = palette.intern(state);
                remap[cell] = Some(idx);
                idx
            }
        };
        indices.push(idx);
    }

    let mut extra = HashMap::new();
    if let Some(Value::List(entities)) = entities_tag {
        for entity in entities {
            let Value::Compound(entity) = entity else {
                return Err(Error::format("方块实体不是复合标签"));
            };
            let pos = match entity.get("Pos") {
                Some(Value::IntArray(arr)) if arr.len() == 3 => (arr[0], arr[1], arr[2]),
                _ => return Err(Error::format("方块实体缺少 Pos")),
            };
            if pos.0 < 0
                || pos.1 < 0
                || pos.2 < 0
                || pos.0 as usize >= nx
                || pos.1 as usize >= ny
                || pos.2 as usize >= nz
            {
                return Err(Error::format(format!(
                    "方块实体坐标 ({}, {}, {}) 越界",
                    pos.0, pos.1, pos.2
                )));
            }
            let mut body = entity.clone();
            body.remove("Pos");
            extra.insert(
                (pos.0 as u32, pos.1 as u32, pos.2 as u32),
                Value::Compound(body),
            );
        }
    }

    let mut metadata = Metadata::new(Some(Format::Schem));
    metadata.version = Some(version);
    if let Some(Value::IntArray(offset)) = root.get("Offset") {
        if offset.len() == 3 {
            metadata.origin = (offset[0], offset[1], offset[2]);
        }
    }
    if let Some(Value::Compound(meta)) = root.get("Metadata") {
        if let Some(Value::String(name)) = meta.get("Name") {
            metadata.name = Some(name.clone());
        }
        if let Some(Value::String(author)) = meta.get("Author") {
            metadata.author = Some(author.clone());
        }
        if let Some(Value::Long(date)) = meta.get("Date") {
            metadata.created = Some(*date);
        }
    }

    Volume::new((nx, ny, nz), indices, palette, extra, metadata)
}

pub fn encode(volume: &Volume) -> Result<Vec<u8>> {
    let (nx, ny, nz) = volume.dims();
    if nx > i16::MAX as usize || ny > i16::MAX as usize || nz > i16::MAX as usize {
        return Err(Error::format(format!(
            "尺寸 {}x{}x{} 超出 .schem 表示范围",
            nx, ny, nz
        )));
    }

    let mut palette_tag = HashMap::new();
    for (index, state) in volume.palette().entries().iter().enumerate() {
        let RawBlock::Name { name, properties } = registry().project(Format::Schem, state)?
        else {
            return Err(Error::format("投影结果类型不符"));
        };
        palette_tag.insert(
            nbt::format_state_name(&name, &properties),
            Value::Int(index as i32),
        );
    }

    let block_data = nbt::write_varints(volume.indices());

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
        body.insert(
            "Pos".to_string(),
            Value::IntArray(IntArray::new(vec![key.0 as i32, key.1 as i32, key.2 as i32])),
        );
        entities.push(Value::Compound(body));
    }

    let mut meta = HashMap::new();
    if let Some(name) = &volume.metadata.name {
        meta.insert("Name".to_string(), Value::String(name.clone()));
    }
    if let Some(author) = &volume.metadata.author {
        meta.insert("Author".to_string(), Value::String(author.clone()));
    }
    if let Some(created) = volume.metadata.created {
        meta.insert("Date".to_string(), Value::Long(created));
    }

    let origin = volume.metadata.origin;
    let mut root = HashMap::new();
    root.insert("Version".to_string(), Value::Int(2));
    root.insert("DataVersion".to_string(), Value::Int(DATA_VERSION));
    root.insert("Width".to_string(), Value::Short(nx as i16));
    root.insert("Height".to_string(), Value::Short(ny as i16));
    root.insert("Length".to_string(), Value::Short(nz as i16));
    root.insert(
        "PaletteMax".to_string(),
        Value::Int(volume.palette().len() as i32),
    );
    root.insert("Palette".to_string(), Value::Compound(palette_tag));
    root.insert(
        "BlockData".to_string(),
        Value::ByteArray(ByteArray::new(block_data)),
    );
    root.insert("BlockEntities".to_string(), Value::List(entities));
    root.insert(
        "Offset".to_string(),
        Value::IntArray(IntArray::new(vec![origin.0, origin.1, origin.2])),
    );
    if !meta.is_empty() {
        root.insert("Metadata".to_string(), Value::Compound(meta));
    }

    nbt::write_compound(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{load, ArrayProperties, Grid3};
    use crate::volume::BlockState;
    use std::collections::BTreeMap;

    fn stairs_volume() -> Volume {
        let stairs = registry().id_of("minecraft:oak_stairs").unwrap();
        let grid = Grid3::new((3, 1, 1), vec![0, 1, 2]).unwrap();
        let mut props_map = BTreeMap::new();
        props_map.insert("facing".to_string(), "west".to_string());
        let props = ArrayProperties {
            palette: Some(vec![
                BlockState::new(crate::volume::AIR),
                BlockState::new(1),
                BlockState::with_properties(stairs, props_map),
            ]),
            ..Default::default()
        };
        load(&grid, &props, false).unwrap()
    }

    #[test]
    fn roundtrip_with_properties() {
        let mut v = stairs_volume();
        v.metadata.origin = (-3, 1, 7);
        let bytes = encode(&v).unwrap();
        let back = decode(&bytes, &LookupOptions::default()).unwrap();
        assert_eq!(back.dims(), v.dims());
        assert_eq!(back.metadata.origin, (-3, 1, 7));
        // 状态串中的属性经往返后保持不变
        let state = back.get(2, 0, 0).unwrap();
        assert_eq!(state.properties.get("facing").map(String::as_str), Some("west"));
        for x in 0..3 {
            assert_eq!(back.get(x, 0, 0), v.get(x, 0, 0));
        }
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let v = stairs_volume();
        let bytes = encode(&v).unwrap();
        let mut root = nbt::read_compound(&bytes).unwrap();
        root.insert("Version".to_string(), Value::Int(4));
        let bytes = nbt::write_compound(root).unwrap();
        match decode(&bytes, &LookupOptions::default()) {
            Err(Error::UnsupportedVersion { declared, supported, .. }) => {
                assert_eq!(declared, "4");
                assert_eq!(supported, SUPPORTED);
            }
            other => panic!("意外结果: {:?}", other),
        }
    }

    #[test]
    fn truncated_block_data_reports_offset() {
        let v = stairs_volume();
        let bytes = encode(&v).unwrap();
        let mut root = nbt::read_compound(&bytes).unwrap();
        root.insert(
            "BlockData".to_string(),
            Value::ByteArray(ByteArray::new(vec![0])),
        );
        let bytes = nbt::write_compound(root).unwrap();
        match decode(&bytes, &LookupOptions::default()) {
            Err(Error::Format { offset, .. }) => assert!(offset.is_some()),
            other => panic!("意外结果: {:?}", other),
        }
    }

    #[test]
    fn missing_palette_is_format_error() {
        let v = stairs_volume();
        let bytes = encode(&v).unwrap();
        let mut root = nbt::read_compound(&bytes).unwrap();
        root.remove("Palette");
        let bytes = nbt::write_compound(root).unwrap();
        assert!(matches!(
            decode(&bytes, &LookupOptions::default()),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn block_entities_survive_roundtrip() {
        let chest = registry().id_of("minecraft:chest").unwrap();
        let grid = Grid3::filled((1, 1, 1), chest as i64).unwrap();
        let mut props = ArrayProperties::default();
        let mut body = HashMap::new();
        body.insert("CustomName".to_string(), Value::String("宝箱".to_string()));
        props.extra.insert((0, 0, 0), Value::Compound(body));
        let v = load(&grid, &props, true).unwrap();

        let bytes = encode(&v).unwrap();
        let back = decode(&bytes, &LookupOptions::default()).unwrap();
        assert_eq!(back.extra(), v.extra());
    }
}
