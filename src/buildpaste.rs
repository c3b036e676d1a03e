//! BuildPaste `.json` 编解码
//!
//! UTF-8 JSON 容器，方块为带数字 ID 的坐标条目列表。数字 ID 走 BuildPaste
//! 专用表翻译；`properties` 字段承载规范属性，`nbt` 字段经紧凑 JSON 桥接
//! 承载扩展数据。

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::format::Format;
use crate::nbt;
use crate::registry::{registry, LookupOptions, RawBlock};
use crate::volume::{Metadata, Palette, Volume};

const SUPPORTED: &str = "1";

#[derive(Debug, Serialize, Deserialize)]
struct PasteFile {
    version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    size: [i64; 3],
    blocks: Vec<PasteBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PasteBlock {
    x: i64,
    y: i64,
    z: i64,
    id: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbt: Option<JsonValue>,
}

pub fn decode(data: &[u8], opts: &LookupOptions) -> Result<Volume> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::format("内容不是合法 UTF-8"))?;
    let file: PasteFile = serde_json::from_str(text)?;

    if file.version != 1 {
        return Err(Error::UnsupportedVersion {
            format: Format::BuildPaste,
            declared: file.version.to_string(),
            supported: SUPPORTED,
        });
    }

    let [sx, sy, sz] = file.size;
    if sx < 0 || sy < 0 || sz < 0 {
        return Err(Error::format(format!("尺寸为负: {}x{}x{}", sx, sy, sz)));
    }
    let (nx, ny, nz) = (sx as usize, sy as usize, sz as usize);
    let cells = nbt::checked_volume(nx, ny, nz)?;

    let mut palette = Palette::air();
    let mut cache: HashMap<(u32, Vec<(String, String)>), u32> = HashMap::new();
    let mut indices = vec![0u32; cells];
    let mut extra = HashMap::new();

    for block in &file.blocks {
        if block.x < 0
            || block.y < 0
            || block.z < 0
            || block.x as usize >= nx
            || block.y as usize >= ny
            || block.z as usize >= nz
        {
            return Err(Error::format(format!(
                "方块坐标 ({}, {}, {}) 越界",
                block.x, block.y, block.z
            )));
        }
        let (x, y, z) = (block.x as usize, block.y as usize, block.z as usize);

        let key = (
            block.id,
            block
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Vec<_>>(),
        );
        let idx = match cache.get(&key) {
            Some(&idx) => idx,
            None => {
                let mut state =
                    registry().resolve(Format::BuildPaste, &block.id.to_string(), None, opts)?;
                // 文件中的属性覆盖表行属性，按规范属性空间理解
                for (k, v) in &block.properties {
                    state.properties.insert(k.clone(), v.clone());
                }
                let idx = palette.intern(state);
                cache.insert(key, idx);
                idx
            }
        };
        indices[(y * nz + z) * nx + x] = idx;

        if let Some(body) = &block.nbt {
            extra.insert((x as u32, y as u32, z as u32), nbt::json_to_nbt(body)?);
        }
    }

    let mut metadata = Metadata::new(Some(Format::BuildPaste));
    metadata.name = file.name;
    metadata.version = Some(1);

    Volume::new((nx, ny, nz), indices, palette, extra, metadata)
}

pub fn encode(volume: &Volume) -> Result<Vec<u8>> {
    let (nx, ny, nz) = volume.dims();

    // 调色板逐项投影为数字 ID，属性原样随条目输出
    let mut projected: Vec<(u32, &BTreeMap<String, String>)> =
        Vec::with_capacity(volume.palette().len());
    for state in volume.palette().entries() {
        let RawBlock::BuildPaste { id } = registry().project(Format::BuildPaste, state)? else {
            return Err(Error::format("投影结果类型不符"));
        };
        projected.push((id, &state.properties));
    }

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
                let (id, properties) = &projected[idx as usize];
                blocks.push(PasteBlock {
                    x: x as i64,
                    y: y as i64,
                    z: z as i64,
                    id: *id,
                    properties: (*properties).clone(),
                    nbt: body.map(nbt::nbt_to_json),
                });
            }
        }
    }

    let file = PasteFile {
        version: 1,
        name: volume.metadata.name.clone(),
        size: [nx as i64, ny as i64, nz as i64],
        blocks,
    };
    Ok(serde_json::to_vec_pretty(&file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{load, ArrayProperties, Grid3};
    use fastnbt::Value;

    fn sample() -> Volume {
        let stone = registry().id_of("minecraft:stone").unwrap();
        let chest = registry().id_of("minecraft:chest").unwrap();
        let grid = Grid3::new((2, 1, 2), vec![stone as i64, 0, 0, chest as i64]).unwrap();
        let mut props = ArrayProperties::default();
        let mut body = HashMap::new();
        body.insert("Lock".to_string(), Value::String("钥匙".to_string()));
        props.extra.insert((1, 0, 1), Value::Compound(body));
        props.name = Some("小屋".to_string());
        load(&grid, &props, true).unwrap()
    }

    #[test]
    fn roundtrip_with_nbt_bridge() {
        let v = sample();
        let bytes = encode(&v).unwrap();
        let back = decode(&bytes, &LookupOptions::default()).unwrap();
        assert_eq!(back.dims(), v.dims());
        assert_eq!(back.extra(), v.extra());
        assert_eq!(back.metadata.name.as_deref(), Some("小屋"));
        for ((x, y, z), state) in v.iter_blocks() {
            assert_eq!(back.get(x, y, z).unwrap().id, state.id);
        }
    }

    #[test]
    fn properties_survive_roundtrip() {
        let stairs = registry().id_of("minecraft:oak_stairs").unwrap();
        let mut props = ArrayProperties::default();
        let mut facing = BTreeMap::new();
        facing.insert("facing".to_string(), "west".to_string());
        props.palette = Some(vec![
            crate::volume::BlockState::new(crate::volume::AIR),
            crate::volume::BlockState::with_properties(stairs, facing.clone()),
        ]);
        let grid = Grid3::filled((1, 1, 1), 1).unwrap();
        let v = load(&grid, &props, false).unwrap();
        let bytes = encode(&v).unwrap();
        let back = decode(&bytes, &LookupOptions::default()).unwrap();
        assert_eq!(back.get(0, 0, 0).unwrap().properties, facing);
    }

    #[test]
    fn wrong_version_is_rejected() {
        let json = br#"{"version": 2, "size": [1, 1, 1], "blocks": []}"#;
        match decode(json, &LookupOptions::default()) {
            Err(Error::UnsupportedVersion { declared, .. }) => assert_eq!(declared, "2"),
            other => panic!("意外结果: {:?}", other),
        }
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let json =
            br#"{"version": 1, "size": [3000000000, 3000000000, 3000000000], "blocks": []}"#;
        assert!(matches!(
            decode(json, &LookupOptions::default()),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn out_of_range_coords_is_format_error() {
        let json = br#"{"version": 1, "size": [1, 1, 1], "blocks": [{"x": 3, "y": 0, "z": 0, "id": 1}]}"#;
        assert!(matches!(
            decode(json, &LookupOptions::default()),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn malformed_json_reports_line() {
        let json = b"{\"version\": 1,\n  \"size\": [1, 1, 1\n";
        match decode(json, &LookupOptions::default()) {
            Err(Error::Format { offset, .. }) => assert!(offset.is_some()),
            other => panic!("意外结果: {:?}", other),
        }
    }
}
