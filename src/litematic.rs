//! Litematica `.litematic` 编解码
//!
//! gzip NBT 容器；方块状态以位打包的长整型数组存储，位宽由调色板大小
//! 决定且条目可跨越 64 位边界。多区域文件解码时合并为一个结构，原点取
//! 合并包围盒的最小角；区域重叠视为冲突。

use std::collections::{BTreeMap, HashMap};

use fastnbt::{LongArray, Value};

use crate::error::{Error, Result};
use crate::format::Format;
use crate::nbt;
use crate::registry::{registry, LookupOptions, RawBlock};
use crate::volume::{BlockState, Metadata, Palette, Volume};

/// 支持的容器版本
const SUPPORTED: &str = "4..=6";
/// 编码时写入的默认容器版本
const DEFAULT_VERSION: i32 = 6;
/// 编码时声明的 Minecraft 数据版本
const DATA_VERSION: i32 = 3700;

struct Region {
    name: String,
    position: (i32, i32, i32),
    size: (usize, usize, usize),
    palette: Vec<BlockState>,
    /// 区域本地调色板索引，Y-Z-X 顺序
    cells: Vec<u32>,
    /// 区域本地坐标 -> 扩展数据
    extra: HashMap<(u32, u32, u32), Value>,
}

pub fn decode(data: &[u8], opts: &LookupOptions) -> Result<Volume> {
    let root = nbt::read_compound(data)?;

    let version = match root.get("Version") {
        Some(Value::Int(v)) => *v,
        _ => {
            return Err(Error::UnsupportedVersion {
                format: Format::Litematic,
                declared: "缺失".to_string(),
                supported: SUPPORTED,
            })
        }
    };
    if !(4..=6).contains(&version) {
        return Err(Error::UnsupportedVersion {
            format: Format::Litematic,
            declared: version.to_string(),
            supported: SUPPORTED,
        });
    }

    let regions_tag = nbt::get_compound(&root, "Regions")?;
    let mut names: Vec<&String> = regions_tag.keys().collect();
    names.sort();

    let mut regions = Vec::with_capacity(names.len());
    for name in names {
        let Some(Value::Compound(tag)) = regions_tag.get(name) else {
            return Err(Error::format(format!("区域 {} 不是复合标签", name)));
        };
        regions.push(decode_region(name, tag, opts)?);
    }
    if regions.is_empty() {
        return Err(Error::format("文件不包含任何区域"));
    }

    check_overlap(&regions)?;
    let mut volume = merge_regions(regions)?;

    volume.metadata.version = Some(version);
    if let Some(Value::Compound(meta)) = root.get("Metadata") {
        if let Some(Value::String(name)) = meta.get("Name") {
            volume.metadata.name = Some(name.clone());
        }
        if let Some(Value::String(author)) = meta.get("Author") {
            volume.metadata.author = Some(author.clone());
        }
        if let Some(Value::Long(created)) = meta.get("TimeCreated") {
            volume.metadata.created = Some(*created);
        }
    }
    Ok(volume)
}

fn decode_region(name: &str, tag: &HashMap<String, Value>, opts: &LookupOptions) -> Result<Region> {
    let pos = nbt::get_xyz(nbt::get_compound(tag, "Position")?)?;
    let size = nbt::get_xyz(nbt::get_compound(tag, "Size")?)?;

    // 负尺寸表示向反方向延伸，归一化为最小角 + 正尺寸
    let mut position = pos;
    let mut dims = (0usize, 0usize, 0usize);
    for axis in 0..3 {
        let (p, s) = match axis {
            0 => (&mut position.0, size.0),
            1 => (&mut position.1, size.1),
            _ => (&mut position.2, size.2),
        };
        let len = if s < 0 {
            *p += s + 1;
            (-s) as usize
        } else {
            s as usize
        };
        match axis {
            0 => dims.0 = len,
            1 => dims.1 = len,
            _ => dims.2 = len,
        }
    }

    let palette_tag = nbt::get_list(tag, "BlockStatePalette")?;
    let mut palette = Vec::with_capacity(palette_tag.len());
    for entry in palette_tag {
        let Value::Compound(entry) = entry else {
            return Err(Error::format("调色板条目不是复合标签"));
        };
        let name = nbt::get_str(entry, "Name")?;
        let props = read_properties(entry)?;
        palette.push(registry().resolve(Format::Litematic, name, Some(&props), opts)?);
    }
    if palette.is_empty() {
        return Err(Error::format(format!("区域 {} 调色板为空", name)));
    }

    let Some(Value::LongArray(packed)) = tag.get("BlockStates") else {
        return Err(Error::format(format!("区域 {} 缺少 BlockStates", name)));
    };
    let count = nbt::checked_volume(dims.0, dims.1, dims.2)?;
    let bits = bits_for(palette.len());
    let longs: Vec<i64> = packed.iter().copied().collect();
    let cells = nbt::unpack_indices(&longs, bits, count)?;
    if let Some(&bad) = cells.iter().find(|&&c| c as usize >= palette.len()) {
        return Err(Error::format(format!(
            "区域 {} 打包索引 {} 超出调色板",
            name, bad
        )));
    }

    let mut extra = HashMap::new();
    if let Some(Value::List(entities)) = tag.get("TileEntities") {
        for entity in entities {
            let Value::Compound(entity) = entity else {
                return Err(Error::format("方块实体不是复合标签"));
            };
            let (x, y, z) = nbt::get_xyz(entity)?;
            if x < 0
                || y < 0
                || z < 0
                || x as usize >= dims.0
                || y as usize >= dims.1
                || z as usize >= dims.2
            {
                return Err(Error::format(format!(
                    "方块实体坐标 ({}, {}, {}) 超出区域 {}",
                    x, y, z, name
                )));
            }
            let mut body = entity.clone();
            body.remove("x");
            body.remove("y");
            body.remove("z");
            extra.insert((x as u32, y as u32, z as u32), Value::Compound(body));
        }
    }

    Ok(Region {
        name: name.to_string(),
        position,
        size: dims,
        palette,
        cells,
        extra,
    })
}

fn check_overlap(regions: &[Region]) -> Result<()> {
    for (i, a) in regions.iter().enumerate() {
        for b in &regions[i + 1..] {
            let hit = overlap_axis(a.position.0, a.size.0, b.position.0, b.size.0)
                && overlap_axis(a.position.1, a.size.1, b.position.1, b.size.1)
                && overlap_axis(a.position.2, a.size.2, b.position.2, b.size.2);
            if hit {
                return Err(Error::Conflict(format!(
                    "区域 {} 与 {} 重叠",
                    a.name, b.name
                )));
            }
        }
    }
    Ok(())
}

fn overlap_axis(a_min: i32, a_len: usize, b_min: i32, b_len: usize) -> bool {
    let a_max = a_min + a_len as i32;
    let b_max = b_min + b_len as i32;
    a_min < b_max && b_min < a_max
}

/// 将互不重叠的区域合并进包围盒，空隙填充空气
fn merge_regions(regions: Vec<Region>) -> Result<Volume> {
    let min = (
        regions.iter().map(|r| r.position.0).min().unwrap_or(0),
        regions.iter().map(|r| r.position.1).min().unwrap_or(0),
        regions.iter().map(|r| r.position.2).min().unwrap_or(0),
    );
    let max = (
        regions
            .iter()
            .map(|r| r.position.0 + r.size.0 as i32)
            .max()
            .unwrap_or(0),
        regions
            .iter()
            .map(|r| r.position.1 + r.size.1 as i32)
            .max()
            .unwrap_or(0),
        regions
            .iter()
            .map(|r| r.position.2 + r.size.2 as i32)
            .max()
            .unwrap_or(0),
    );
    let dims = (
        (max.0 - min.0) as usize,
        (max.1 - min.1) as usize,
        (max.2 - min.2) as usize,
    );

    let mut palette = Palette::air();
    let mut indices = vec![0u32; dims.0 * dims.1 * dims.2];
    let mut extra = HashMap::new();

    for region in &regions {
        let remap: Vec<u32> = region
            .palette
            .iter()
            .map(|state| palette.intern(state.clone()))
            .collect();

        let off = (
            (region.position.0 - min.0) as usize,
            (region.position.1 - min.1) as usize,
            (region.position.2 - min.2) as usize,
        );
        let (sx, _, sz) = region.size;
        for y in 0..region.size.1 {
            for z in 0..sz {
                for x in 0..sx {
                    let src = region.cells[(y * sz + z) * sx + x];
                    let dst = ((y + off.1) * dims.2 + (z + off.2)) * dims.0 + (x + off.0);
                    indices[dst] = remap[src as usize];
                }
            }
        }
        for (&(x, y, z), value) in &region.extra {
            extra.insert(
                (
                    x + off.0 as u32,
                    y + off.1 as u32,
                    z + off.2 as u32,
                ),
                value.clone(),
            );
        }
    }

    let mut metadata = Metadata::new(Some(Format::Litematic));
    metadata.origin = min;
    Volume::new(dims, indices, palette, extra, metadata)
}

pub fn encode(volume: &Volume) -> Result<Vec<u8>> {
    let (nx, ny, nz) = volume.dims();

    let mut palette_list = Vec::with_capacity(volume.palette().len());
    for state in volume.palette().entries() {
        let RawBlock::Name { name, properties } =
            registry().project(Format::Litematic, state)?
        else {
            return Err(Error::format("投影结果类型不符"));
        };
        palette_list.push(state_tag(&name, &properties));
    }

    let bits = bits_for(volume.palette().len());
    let packed = nbt::pack_indices(volume.indices(), bits);

    let mut tile_entities = Vec::with_capacity(volume.extra().len());
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
        tile_entities.push(Value::Compound(body));
    }

    let mut region = HashMap::new();
    region.insert(
        "Position".to_string(),
        xyz_tag(volume.metadata.origin),
    );
    region.insert(
        "Size".to_string(),
        xyz_tag((nx as i32, ny as i32, nz as i32)),
    );
    region.insert(
        "BlockStatePalette".to_string(),
        Value::List(palette_list),
    );
    region.insert(
        "BlockStates".to_string(),
        Value::LongArray(LongArray::new(packed)),
    );
    region.insert("TileEntities".to_string(), Value::List(tile_entities));
    region.insert("Entities".to_string(), Value::List(Vec::new()));
    region.insert(
        "PendingBlockTicks".to_string(),
        Value::List(Vec::new()),
    );

    let region_name = volume
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| "Main".to_string());
    let created = volume.metadata.created.unwrap_or(0);

    let mut meta = HashMap::new();
    meta.insert(
        "Name".to_string(),
        Value::String(region_name.clone()),
    );
    meta.insert(
        "Author".to_string(),
        Value::String(volume.metadata.author.clone().unwrap_or_default()),
    );
    meta.insert("TimeCreated".to_string(), Value::Long(created));
    meta.insert("TimeModified".to_string(), Value::Long(created));
    meta.insert(
        "EnclosingSize".to_string(),
        xyz_tag((nx as i32, ny as i32, nz as i32)),
    );
    meta.insert("RegionCount".to_string(), Value::Int(1));
    meta.insert(
        "TotalVolume".to_string(),
        Value::Int(volume.len() as i32),
    );
    meta.insert(
        "TotalBlocks".to_string(),
        Value::Int(volume.count_blocks() as i32),
    );

    let version = volume
        .metadata
        .version
        .filter(|v| (4..=6).contains(v))
        .unwrap_or(DEFAULT_VERSION);

    let mut regions = HashMap::new();
    regions.insert(region_name, Value::Compound(region));

    let mut root = HashMap::new();
    root.insert("Version".to_string(), Value::Int(version));
    root.insert(
        "MinecraftDataVersion".to_string(),
        Value::Int(DATA_VERSION),
    );
    root.insert("Metadata".to_string(), Value::Compound(meta));
    root.insert("Regions".to_string(), Value::Compound(regions));

    nbt::write_compound(root)
}

/// 调色板位宽：最小 2 位
fn bits_for(palette_len: usize) -> usize {
    let mut bits = 2;
    while (1usize << bits) < palette_len {
        bits += 1;
    }
    bits
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

fn state_tag(name: &str, properties: &BTreeMap<String, String>) -> Value {
    let mut entry = HashMap::new();
    entry.insert("Name".to_string(), Value::String(name.to_string()));
    if !properties.is_empty() {
        let props: HashMap<String, Value> = properties
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        entry.insert("Properties".to_string(), Value::Compound(props));
    }
    Value::Compound(entry)
}

fn xyz_tag(v: (i32, i32, i32)) -> Value {
    let mut map = HashMap::new();
    map.insert("x".to_string(), Value::Int(v.0));
    map.insert("y".to_string(), Value::Int(v.1));
    map.insert("z".to_string(), Value::Int(v.2));
    Value::Compound(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{load, ArrayProperties, Grid3};

    fn sample_volume() -> Volume {
        let grid = Grid3::new((2, 2, 2), vec![1, 0, 28, 1, 0, 9, 1, 1]).unwrap();
        let mut props = ArrayProperties::default();
        let mut chest = HashMap::new();
        chest.insert(
            "Items".to_string(),
            Value::List(vec![Value::Compound(HashMap::from([(
                "id".to_string(),
                Value::String("minecraft:torch".to_string()),
            )]))]),
        );
        props.extra.insert((0, 0, 1), Value::Compound(chest));
        props.name = Some("测试结构".to_string());
        load(&grid, &props, true).unwrap()
    }

    #[test]
    fn roundtrip_preserves_content() {
        let v = sample_volume();
        let bytes = encode(&v).unwrap();
        let back = decode(&bytes, &LookupOptions::default()).unwrap();
        assert_eq!(back.dims(), v.dims());
        assert_eq!(back.indices(), v.indices());
        assert_eq!(back.palette(), v.palette());
        assert_eq!(back.extra(), v.extra());
        assert_eq!(back.metadata.origin, v.metadata.origin);
        assert_eq!(back.metadata.name.as_deref(), Some("测试结构"));
        assert_eq!(back.metadata.source, Some(Format::Litematic));
    }

    #[test]
    fn roundtrip_preserves_origin() {
        let v = sample_volume();
        let cropped = crate::ops::crop(&v, (1, 0, 0), (1, 1, 1)).unwrap();
        let bytes = encode(&cropped).unwrap();
        let back = decode(&bytes, &LookupOptions::default()).unwrap();
        assert_eq!(back.metadata.origin, (1, 0, 0));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let v = sample_volume();
        let bytes = encode(&v).unwrap();
        let mut root = nbt::read_compound(&bytes).unwrap();
        root.insert("Version".to_string(), Value::Int(9));
        let bytes = nbt::write_compound(root).unwrap();
        match decode(&bytes, &LookupOptions::default()) {
            Err(Error::UnsupportedVersion { declared, .. }) => assert_eq!(declared, "9"),
            other => panic!("意外结果: {:?}", other),
        }
    }

    #[test]
    fn missing_version_is_rejected() {
        let v = sample_volume();
        let bytes = encode(&v).unwrap();
        let mut root = nbt::read_compound(&bytes).unwrap();
        root.remove("Version");
        let bytes = nbt::write_compound(root).unwrap();
        assert!(matches!(
            decode(&bytes, &LookupOptions::default()),
            Err(Error::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn truncated_block_states_is_format_error() {
        let v = sample_volume();
        let bytes = encode(&v).unwrap();
        let mut root = nbt::read_compound(&bytes).unwrap();
        let Some(Value::Compound(regions)) = root.get_mut("Regions") else {
            panic!("缺少 Regions");
        };
        for region in regions.values_mut() {
            if let Value::Compound(tag) = region {
                tag.insert(
                    "BlockStates".to_string(),
                    Value::LongArray(LongArray::new(vec![])),
                );
            }
        }
        let bytes = nbt::write_compound(root).unwrap();
        assert!(matches!(
            decode(&bytes, &LookupOptions::default()),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn overlapping_regions_conflict() {
        // 两个同位置区域
        let v = sample_volume();
        let bytes = encode(&v).unwrap();
        let mut root = nbt::read_compound(&bytes).unwrap();
        let Some(Value::Compound(regions)) = root.get_mut("Regions") else {
            panic!("缺少 Regions");
        };
        let copy = regions.values().next().cloned().unwrap();
        regions.insert("副本".to_string(), copy);
        let bytes = nbt::write_compound(root).unwrap();
        assert!(matches!(
            decode(&bytes, &LookupOptions::default()),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn disjoint_regions_merge_with_air_gap() {
        let v = sample_volume();
        let bytes = encode(&v).unwrap();
        let mut root = nbt::read_compound(&bytes).unwrap();
        let Some(Value::Compound(regions)) = root.get_mut("Regions") else {
            panic!("缺少 Regions");
        };
        let mut copy = regions.values().next().cloned().unwrap();
        if let Value::Compound(tag) = &mut copy {
            tag.insert("Position".to_string(), xyz_tag((4, 0, 0)));
        }
        regions.insert("远处".to_string(), copy);
        let bytes = nbt::write_compound(root).unwrap();
        let merged = decode(&bytes, &LookupOptions::default()).unwrap();
        // 包围盒 0..6 x 0..2 x 0..2，中间留有空气
        assert_eq!(merged.dims(), (6, 2, 2));
        assert_eq!(merged.get(2, 0, 0).unwrap().id, crate::volume::AIR);
        assert_eq!(merged.get(4, 0, 0).unwrap(), v.get(0, 0, 0).unwrap());
    }
}
