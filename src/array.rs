//! 从原始三维数组构建规范化结构
//!
//! 面向数组型外部生产方（生成式/ML 流水线）的唯一接入面。

use std::collections::HashMap;

use fastnbt::Value;

use crate::error::{Error, Result};
use crate::volume::{BlockId, BlockState, Metadata, Palette, Volume, AIR};

/// 密集三维网格，单元格按 Y-Z-X 顺序排列
#[derive(Debug, Clone)]
pub struct Grid3 {
    pub dims: (usize, usize, usize),
    pub cells: Vec<i64>,
}

impl Grid3 {
    /// 由维度与展平单元格构建，长度不符时报形状错误
    pub fn new(dims: (usize, usize, usize), cells: Vec<i64>) -> Result<Self> {
        let (nx, ny, nz) = dims;
        let expect = nx
            .checked_mul(ny)
            .and_then(|v| v.checked_mul(nz))
            .ok_or_else(|| Error::Shape("体积超出寻址范围".to_string()))?;
        if cells.len() != expect {
            return Err(Error::Shape(format!(
                "单元格数量 {} 与维度 {}x{}x{} 不符",
                cells.len(),
                nx,
                ny,
                nz
            )));
        }
        Ok(Self { dims, cells })
    }

    /// 由嵌套数组构建（外层 y、中层 z、内层 x），参差不齐视为形状错误
    pub fn from_nested(nested: &[Vec<Vec<i64>>]) -> Result<Self> {
        let ny = nested.len();
        let nz = nested.first().map(|p| p.len()).unwrap_or(0);
        let nx = nested
            .first()
            .and_then(|p| p.first())
            .map(|r| r.len())
            .unwrap_or(0);
        let mut cells = Vec::with_capacity(nx * ny * nz);
        for plane in nested {
            if plane.len() != nz {
                return Err(Error::Shape("数组不是规则的三维网格".to_string()));
            }
            for row in plane {
                if row.len() != nx {
                    return Err(Error::Shape("数组不是规则的三维网格".to_string()));
                }
                cells.extend_from_slice(row);
            }
        }
        Self::new((nx, ny, nz), cells)
    }

    /// 以常数填充的网格
    pub fn filled(dims: (usize, usize, usize), value: i64) -> Result<Self> {
        let (nx, ny, nz) = dims;
        let expect = nx
            .checked_mul(ny)
            .and_then(|v| v.checked_mul(nz))
            .ok_or_else(|| Error::Shape("体积超出寻址范围".to_string()))?;
        Self::new(dims, vec![value; expect])
    }
}

/// 数组装载的附加描述
#[derive(Debug, Clone, Default)]
pub struct ArrayProperties {
    /// 局部模式下的显式调色板（`id` + 属性）
    pub palette: Option<Vec<BlockState>>,
    /// 坐标键控的稀疏扩展数据
    pub extra: HashMap<(u32, u32, u32), Value>,
    pub name: Option<String>,
    pub author: Option<String>,
}

/// 从三维数组构建 Volume
///
/// `is_global` 为真时每个单元格值直接解释为全局方块 ID，调色板按首次出现
/// 顺序合成且空气固定在索引 0；为假时必须提供显式调色板，单元格值为其下标。
pub fn load(grid: &Grid3, props: &ArrayProperties, is_global: bool) -> Result<Volume> {
    if let Some(&bad) = grid.cells.iter().find(|&&v| v < 0) {
        return Err(Error::Shape(format!("单元格值为负: {}", bad)));
    }

    let (palette, indices) = if is_global {
        synthesize_palette(&grid.cells)?
    } else {
        index_into_palette(grid, props)?
    };

    let mut metadata = Metadata::new(None);
    metadata.name = props.name.clone();
    metadata.author = props.author.clone();

    Volume::new(grid.dims, indices, palette, props.extra.clone(), metadata)
}

/// 全局模式：按首次出现顺序收集全局 ID，空气缺席时插入为首个条目
fn synthesize_palette(cells: &[i64]) -> Result<(Palette, Vec<u32>)> {
    let mut palette = Palette::air();
    let mut seen: HashMap<BlockId, u32> = HashMap::new();
    seen.insert(AIR, 0);

    let mut indices = Vec::with_capacity(cells.len());
    for &cell in cells {
        if cell > u32::MAX as i64 {
            return Err(Error::Shape(format!("全局 ID 超出范围: {}", cell)));
        }
        let id = cell as BlockId;
        let idx = match seen.get(&id) {
            Some(&idx) => idx,
            None => {
                let idx = palette.intern(BlockState::new(id));
                seen.insert(id, idx);
                idx
            }
        };
        indices.push(idx);
    }
    Ok((palette, indices))
}

/// 局部模式：单元格值直接作为显式调色板的下标
fn index_into_palette(grid: &Grid3, props: &ArrayProperties) -> Result<(Palette, Vec<u32>)> {
    let Some(entries) = &props.palette else {
        return Err(Error::Palette("局部模式必须提供调色板".to_string()));
    };
    let palette = Palette::from_entries(entries.clone())?;
    let limit = palette.len() as i64;

    let mut indices = Vec::with_capacity(grid.cells.len());
    for &cell in &grid.cells {
        if cell >= limit {
            return Err(Error::Palette(format!(
                "索引 {} 超出调色板长度 {}",
                cell, limit
            )));
        }
        indices.push(cell as u32);
    }
    Ok((palette, indices))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_uniform_array_yields_single_entry_palette() {
        let grid = Grid3::filled((3, 3, 3), 1).unwrap();
        let v = load(&grid, &ArrayProperties::default(), true).unwrap();
        // 空气占索引 0，石头为唯一非空气条目
        assert_eq!(v.palette().len(), 2);
        assert!(v.indices().iter().all(|&i| i == 1));
        assert_eq!(v.count_blocks(), 27);
    }

    #[test]
    fn global_air_only_array() {
        let grid = Grid3::filled((2, 2, 2), 0).unwrap();
        let v = load(&grid, &ArrayProperties::default(), true).unwrap();
        assert_eq!(v.palette().len(), 1);
        assert_eq!(v.count_blocks(), 0);
    }

    #[test]
    fn global_palette_order_is_first_occurrence() {
        let grid = Grid3::new((4, 1, 1), vec![7, 1, 7, 3]).unwrap();
        let v = load(&grid, &ArrayProperties::default(), true).unwrap();
        let ids: Vec<u32> = v.palette().entries().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 7, 1, 3]);
    }

    #[test]
    fn negative_cell_is_shape_error() {
        let grid = Grid3::new((1, 1, 2), vec![0, -3]).unwrap();
        assert!(matches!(
            load(&grid, &ArrayProperties::default(), true),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn ragged_nested_array_is_shape_error() {
        let nested = vec![vec![vec![0, 0], vec![0]]];
        assert!(matches!(Grid3::from_nested(&nested), Err(Error::Shape(_))));
    }

    #[test]
    fn local_mode_requires_palette() {
        let grid = Grid3::filled((1, 1, 1), 0).unwrap();
        assert!(matches!(
            load(&grid, &ArrayProperties::default(), false),
            Err(Error::Palette(_))
        ));
    }

    #[test]
    fn local_mode_checks_index_range() {
        let grid = Grid3::filled((1, 1, 1), 5).unwrap();
        let props = ArrayProperties {
            palette: Some(vec![BlockState::new(AIR), BlockState::new(1)]),
            ..Default::default()
        };
        assert!(matches!(load(&grid, &props, false), Err(Error::Palette(_))));
    }

    #[test]
    fn local_mode_uses_supplied_palette() {
        let grid = Grid3::new((2, 1, 1), vec![0, 1]).unwrap();
        let props = ArrayProperties {
            palette: Some(vec![BlockState::new(AIR), BlockState::new(17)]),
            ..Default::default()
        };
        let v = load(&grid, &props, false).unwrap();
        assert_eq!(v.get(1, 0, 0).unwrap().id, 17);
    }
}
