//! GrabCraft `.js` 渲染脚本编解码
//!
//! 脚本形如 `var myRenderObject = {...};`，内嵌三层嵌套对象：外层为垂直
//! 层，中层为行，内层为列，键为从 1 开始的数字字符串，叶子带 `name`
//! 显示名称。坐标经注册表的修正参数换算到规范约定；显示名称走 GrabCraft
//! 专用表。扩展数据与元数据在本格式中没有容身之处，既定有损。

use std::collections::HashMap;

use serde_json::{json, Map, Value as JsonValue};

use crate::error::{Error, Result};
use crate::format::Format;
use crate::registry::{registry, LookupOptions, RawBlock};
use crate::volume::{Metadata, Palette, Volume};

pub fn decode(data: &[u8], opts: &LookupOptions) -> Result<Volume> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::format("内容不是合法 UTF-8"))?;

    // 赋值语句剥壳：取首个 { 到末个 } 之间的对象字面量
    let start = text
        .find('{')
        .ok_or_else(|| Error::format("脚本中找不到对象字面量"))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| Error::format("脚本中找不到对象字面量"))?;
    if end < start {
        return Err(Error::format("脚本中找不到对象字面量"));
    }
    let object: JsonValue = serde_json::from_str(&text[start..=end])?;
    let JsonValue::Object(levels) = object else {
        return Err(Error::format("渲染对象不是嵌套对象"));
    };

    let adjust = registry().coord_adjust();
    let mut entries: Vec<((i32, i32, i32), String)> = Vec::new();
    for (ykey, plane) in &levels {
        let raw_y = parse_key(ykey)?;
        let JsonValue::Object(plane) = plane else {
            return Err(Error::format(format!("层 {} 不是嵌套对象", ykey)));
        };
        for (zkey, row) in plane {
            let raw_z = parse_key(zkey)?;
            let JsonValue::Object(row) = row else {
                return Err(Error::format(format!("行 {}/{} 不是嵌套对象", ykey, zkey)));
            };
            for (xkey, leaf) in row {
                let raw_x = parse_key(xkey)?;
                let Some(name) = leaf.get("name").and_then(JsonValue::as_str) else {
                    return Err(Error::format(format!(
                        "单元格 {}/{}/{} 缺少 name 字段",
                        ykey, zkey, xkey
                    )));
                };
                let (x, y, z) = adjust.to_canonical((raw_x, raw_y, raw_z));
                if x < 0 || y < 0 || z < 0 {
                    return Err(Error::format(format!(
                        "坐标 ({}, {}, {}) 修正后为负",
                        raw_x, raw_y, raw_z
                    )));
                }
                entries.push(((x, y, z), name.to_string()));
            }
        }
    }

    if entries.is_empty() {
        return Ok(Volume::empty(Some(Format::GrabCraft)));
    }

    let nx = entries.iter().map(|((x, _, _), _)| *x).max().unwrap_or(0) as usize + 1;
    let ny = entries.iter().map(|((_, y, _), _)| *y).max().unwrap_or(0) as usize + 1;
    let nz = entries.iter().map(|((_, _, z), _)| *z).max().unwrap_or(0) as usize + 1;
    let cells = crate::nbt::checked_volume(nx, ny, nz)?;

    let mut palette = Palette::air();
    let mut cache: HashMap<String, u32> = HashMap::new();
    let mut indices = vec![0u32; cells];
    for ((x, y, z), name) in entries {
        let idx = match cache.get(&name) {
            Some(&idx) => idx,
            None => {
                let state = registry().resolve(Format::GrabCraft, &name, None, opts)?;
                let idx = palette.intern(state);
                cache.insert(name, idx);
                idx
            }
        };
        indices[(y as usize * nz + z as usize) * nx + x as usize] = idx;
    }

    Volume::new(
        (nx, ny, nz),
        indices,
        palette,
        HashMap::new(),
        Metadata::new(Some(Format::GrabCraft)),
    )
}

pub fn encode(volume: &Volume) -> Result<Vec<u8>> {
    let (nx, ny, nz) = volume.dims();

    let mut names: Vec<Option<String>> = Vec::with_capacity(volume.palette().len());
    for state in volume.palette().entries() {
        if state.is_air() {
            // 空气单元格直接省略
            names.push(None);
            continue;
        }
        let RawBlock::GrabCraft { name } = registry().project(Format::GrabCraft, state)? else {
            return Err(Error::format("投影结果类型不符"));
        };
        names.push(Some(name));
    }

    let adjust = registry().coord_adjust();
    let mut levels = Map::new();
    for y in 0..ny {
        for z in 0..nz {
            for x in 0..nx {
                let idx = volume.indices()[volume.cell_index(x, y, z)];
                let Some(name) = &names[idx as usize] else {
                    continue;
                };
                let (rx, ry, rz) = adjust.from_canonical((x as i32, y as i32, z as i32));
                let plane = levels
                    .entry(ry.to_string())
                    .or_insert_with(|| JsonValue::Object(Map::new()));
                let JsonValue::Object(plane) = plane else {
                    unreachable!()
                };
                let row = plane
                    .entry(rz.to_string())
                    .or_insert_with(|| JsonValue::Object(Map::new()));
                let JsonValue::Object(row) = row else {
                    unreachable!()
                };
                row.insert(
                    rx.to_string(),
                    json!({ "x": rx, "y": ry, "z": rz, "name": name }),
                );
            }
        }
    }

    let body = serde_json::to_string_pretty(&JsonValue::Object(levels))?;
    Ok(format!("var myRenderObject = {};\n", body).into_bytes())
}

fn parse_key(key: &str) -> Result<i32> {
    key.parse::<i32>()
        .map_err(|_| Error::format(format!("坐标键不是整数: {}", key)))
}
