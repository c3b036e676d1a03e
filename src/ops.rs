//! 空间算子：裁剪与分块
//!
//! 两者都产生全新的 Volume，绝不与输入共享调色板或扩展数据。

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::volume::{Palette, Volume};

/// 提取闭区间 `[min, max]` 的子结构
///
/// 调色板只保留裁剪区域内实际用到的状态（空气固定在索引 0，其余按首次
/// 出现顺序重排），原点元数据平移 `min`，窗口外的扩展数据被丢弃。
pub fn crop(
    volume: &Volume,
    min: (usize, usize, usize),
    max: (usize, usize, usize),
) -> Result<Volume> {
    let dims = volume.dims();
    for (axis, (lo, hi, dim)) in [
        ('x', (min.0, max.0, dims.0)),
        ('y', (min.1, max.1, dims.1)),
        ('z', (min.2, max.2, dims.2)),
    ] {
        if lo > hi {
            return Err(Error::Range(format!(
                "{} 轴下界 {} 大于上界 {}",
                axis, lo, hi
            )));
        }
        if hi >= dim {
            return Err(Error::Range(format!(
                "{} 轴上界 {} 超出维度 {}",
                axis, hi, dim
            )));
        }
    }

    let new_dims = (max.0 - min.0 + 1, max.1 - min.1 + 1, max.2 - min.2 + 1);
    let old_palette = volume.palette();
    let default = old_palette
        .get(0)
        .cloned()
        .ok_or_else(|| Error::Palette("调色板缺少默认状态".to_string()))?;
    let mut palette = Palette::new(default);

    // 旧调色板索引 -> 新调色板索引，按首次出现填充
    let mut remap: Vec<Option<u32>> = vec![None; old_palette.len()];
    remap[0] = Some(0);

    let mut indices = Vec::with_capacity(new_dims.0 * new_dims.1 * new_dims.2);
    for y in min.1..=max.1 {
        for z in min.2..=max.2 {
            for x in min.0..=max.0 {
                let old_idx = volume.indices()[volume.cell_index(x, y, z)] as usize;
                let new_idx = match remap[old_idx] {
                    Some(idx) => idx,
                    None => {
                        let state = old_palette
                            .get(old_idx as u32)
                            .cloned()
                            .ok_or_else(|| Error::Palette("索引越界".to_string()))?;
                        let idx = palette.intern(state);
                        remap[old_idx] = Some(idx);
                        idx
                    }
                };
                indices.push(new_idx);
            }
        }
    }

    // 窗口内的扩展数据重定位到新的局部坐标
    let mut extra = HashMap::new();
    for (&(x, y, z), value) in volume.extra() {
        let (x, y, z) = (x as usize, y as usize, z as usize);
        if x >= min.0 && x <= max.0 && y >= min.1 && y <= max.1 && z >= min.2 && z <= max.2 {
            extra.insert(
                ((x - min.0) as u32, (y - min.1) as u32, (z - min.2) as u32),
                value.clone(),
            );
        }
    }

    let mut metadata = volume.metadata.clone();
    metadata.origin = (
        metadata.origin.0 + min.0 as i32,
        metadata.origin.1 + min.1 as i32,
        metadata.origin.2 + min.2 as i32,
    );

    Volume::new(new_dims, indices, palette, extra, metadata)
}

/// 按固定边长把结构切分为轴对齐的立方体序列
///
/// 越界的边界立方体截断为剩余范围，不做填充。序列按立方体最小角
/// 先 x、再 y、后 z 递增的顺序产生，重复调用结果一致。
pub fn dice(volume: &Volume, cube: usize) -> Result<Vec<Volume>> {
    if cube == 0 {
        return Err(Error::Range("立方体边长必须为正".to_string()));
    }
    let (nx, ny, nz) = volume.dims();
    if nx == 0 || ny == 0 || nz == 0 {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for z0 in (0..nz).step_by(cube) {
        for y0 in (0..ny).step_by(cube) {
            for x0 in (0..nx).step_by(cube) {
                let max = (
                    (x0 + cube - 1).min(nx - 1),
                    (y0 + cube - 1).min(ny - 1),
                    (z0 + cube - 1).min(nz - 1),
                );
                out.push(crop(volume, (x0, y0, z0), max)?);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{load, ArrayProperties, Grid3};
    use crate::volume::BlockState;
    use fastnbt::Value;
    use std::collections::HashSet;

    /// 10x10x10，(2,2,2)..=(7,7,7) 填充石头（全局 ID 1）
    fn stone_cube() -> Volume {
        let mut grid = Grid3::filled((10, 10, 10), 0).unwrap();
        for y in 2..=7usize {
            for z in 2..=7usize {
                for x in 2..=7usize {
                    grid.cells[(y * 10 + z) * 10 + x] = 1;
                }
            }
        }
        load(&grid, &ArrayProperties::default(), true).unwrap()
    }

    #[test]
    fn crop_stone_cube_scenario() {
        let v = stone_cube();
        let cropped = crop(&v, (2, 2, 2), (7, 7, 7)).unwrap();
        assert_eq!(cropped.dims(), (6, 6, 6));
        assert_eq!(cropped.palette().len(), 2);
        assert_eq!(cropped.metadata.origin, (2, 2, 2));
        for ((_, _, _), state) in cropped.iter_blocks() {
            assert_eq!(state.id, 1);
        }
    }

    #[test]
    fn crop_rejects_bad_bounds() {
        let v = stone_cube();
        assert!(matches!(crop(&v, (5, 0, 0), (2, 9, 9)), Err(Error::Range(_))));
        assert!(matches!(crop(&v, (0, 0, 0), (9, 9, 10)), Err(Error::Range(_))));
    }

    #[test]
    fn crop_is_idempotent_on_full_extent() {
        let v = stone_cube();
        let once = crop(&v, (2, 2, 2), (7, 7, 7)).unwrap();
        let twice = crop(&once, (0, 0, 0), (5, 5, 5)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn crop_rebuilds_palette_to_used_states() {
        let grid = Grid3::new((2, 1, 1), vec![1, 7]).unwrap();
        let v = load(&grid, &ArrayProperties::default(), true).unwrap();
        assert_eq!(v.palette().len(), 3);
        // 只裁剪出含 ID 7 的一格：石头从调色板消失
        let cropped = crop(&v, (1, 0, 0), (1, 0, 0)).unwrap();
        assert_eq!(cropped.palette().len(), 2);
        assert_eq!(cropped.palette().entries()[1], BlockState::new(7));
    }

    #[test]
    fn crop_rekeys_extra_data() {
        let grid = Grid3::filled((3, 3, 3), 1).unwrap();
        let mut props = ArrayProperties::default();
        props.extra.insert((2, 2, 2), Value::Byte(7));
        props.extra.insert((0, 0, 0), Value::Byte(9));
        let v = load(&grid, &props, true).unwrap();

        let cropped = crop(&v, (1, 1, 1), (2, 2, 2)).unwrap();
        assert_eq!(cropped.extra().len(), 1);
        assert_eq!(cropped.extra().get(&(1, 1, 1)), Some(&Value::Byte(7)));
    }

    #[test]
    fn dice_small_volume_yields_single_cube() {
        let v = stone_cube();
        let parts = dice(&v, 16).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].dims(), (10, 10, 10));
        assert_eq!(parts[0].metadata.origin, (0, 0, 0));
    }

    #[test]
    fn dice_covers_extent_without_gaps_or_overlap() {
        let v = stone_cube();
        let parts = dice(&v, 4).unwrap();
        // 10 = 4 + 4 + 2，每轴 3 段
        assert_eq!(parts.len(), 27);

        let mut covered: HashSet<(i32, i32, i32)> = HashSet::new();
        for part in &parts {
            let (ox, oy, oz) = part.metadata.origin;
            let (dx, dy, dz) = part.dims();
            for y in 0..dy {
                for z in 0..dz {
                    for x in 0..dx {
                        let abs = (ox + x as i32, oy + y as i32, oz + z as i32);
                        // 无重叠
                        assert!(covered.insert(abs));
                    }
                }
            }
        }
        // 无缝隙
        assert_eq!(covered.len(), 1000);
    }

    #[test]
    fn dice_is_restartable() {
        let v = stone_cube();
        assert_eq!(dice(&v, 4).unwrap(), dice(&v, 4).unwrap());
    }

    #[test]
    fn dice_rejects_zero_cube() {
        let v = stone_cube();
        assert!(matches!(dice(&v, 0), Err(Error::Range(_))));
    }

    #[test]
    fn dice_preserves_block_content() {
        let v = stone_cube();
        let parts = dice(&v, 3).unwrap();
        for part in &parts {
            let (ox, oy, oz) = part.metadata.origin;
            for ((x, y, z), state) in part.iter_blocks() {
                let expect = v
                    .get(
                        (ox + x as i32) as usize,
                        (oy + y as i32) as usize,
                        (oz + z as i32) as usize,
                    )
                    .unwrap();
                assert_eq!(state, expect);
            }
        }
    }
}
