//! 规范化体素结构表示
//!
//! 所有编解码器的统一目标：调色板 + 密集索引数组 + 稀疏扩展数据。
//! 索引数组按固定的 Y-Z-X 顺序排列，`idx = (y * nz + z) * nx + x`。

use std::collections::{BTreeMap, HashMap};

use fastnbt::Value;

use crate::error::{Error, Result};
use crate::format::Format;

/// 全局命名空间中的规范方块 ID
pub type BlockId = u32;

/// 空气（默认状态）的全局 ID
pub const AIR: BlockId = 0;

/// 未知方块的全局 ID（宽松模式回退目标）
pub const UNKNOWN: BlockId = 4095;

/// 规范方块状态：全局 ID + 属性映射
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockState {
    pub id: BlockId,
    pub properties: BTreeMap<String, String>,
}

impl BlockState {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_properties(id: BlockId, properties: BTreeMap<String, String>) -> Self {
        Self { id, properties }
    }

    pub fn is_air(&self) -> bool {
        self.id == AIR
    }
}

/// 有序去重的方块状态调色板
///
/// 索引 0 固定为默认（空气）状态。
#[derive(Debug, Clone)]
pub struct Palette {
    entries: Vec<BlockState>,
    lookup: HashMap<BlockState, u32>,
}

impl Palette {
    /// 以给定默认状态创建调色板
    pub fn new(default: BlockState) -> Self {
        let mut lookup = HashMap::new();
        lookup.insert(default.clone(), 0);
        Self {
            entries: vec![default],
            lookup,
        }
    }

    /// 以空气为默认状态创建调色板
    pub fn air() -> Self {
        Self::new(BlockState::new(AIR))
    }

    /// 从有序状态列表构建，重复状态视为调色板错误
    pub fn from_entries(entries: Vec<BlockState>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::Palette("调色板不能为空".to_string()));
        }
        let mut lookup = HashMap::new();
        for (i, state) in entries.iter().enumerate() {
            if lookup.insert(state.clone(), i as u32).is_some() {
                return Err(Error::Palette(format!("调色板存在重复状态: id={}", state.id)));
            }
        }
        Ok(Self { entries, lookup })
    }

    /// 插入状态并返回索引，已存在时返回原索引
    pub fn intern(&mut self, state: BlockState) -> u32 {
        if let Some(&idx) = self.lookup.get(&state) {
            return idx;
        }
        let idx = self.entries.len() as u32;
        self.lookup.insert(state.clone(), idx);
        self.entries.push(state);
        idx
    }

    pub fn index_of(&self, state: &BlockState) -> Option<u32> {
        self.lookup.get(state).copied()
    }

    pub fn get(&self, index: u32) -> Option<&BlockState> {
        self.entries.get(index as usize)
    }

    pub fn entries(&self) -> &[BlockState] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 引用该调色板所需的打包位宽（由条目数决定，最小 2 位）
    pub fn index_bits(&self) -> usize {
        let mut bits = 2;
        while (1usize << bits) < self.entries.len() {
            bits += 1;
        }
        bits
    }
}

impl PartialEq for Palette {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

/// 体素结构的元数据
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// 原点偏移（裁剪/分块后用于重新拼装）
    pub origin: (i32, i32, i32),
    /// 来源格式，内存中直接构建时为 None
    pub source: Option<Format>,
    pub name: Option<String>,
    pub author: Option<String>,
    /// 创建时间（毫秒时间戳）
    pub created: Option<i64>,
    /// 来源格式的版本标记，仅用于往返保真
    pub version: Option<i32>,
}

impl Metadata {
    pub fn new(source: Option<Format>) -> Self {
        Self {
            origin: (0, 0, 0),
            source,
            name: None,
            author: None,
            created: None,
            version: None,
        }
    }
}

/// 规范化体素结构
///
/// 构造后不可变；派生操作总是产生新的 Volume，调色板与扩展数据随之复制。
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    dims: (usize, usize, usize),
    indices: Vec<u32>,
    palette: Palette,
    /// 坐标 -> 方块实体式扩展数据（稀疏）
    extra: HashMap<(u32, u32, u32), Value>,
    pub metadata: Metadata,
}

impl Volume {
    /// 构造并校验全部不变量
    pub fn new(
        dims: (usize, usize, usize),
        indices: Vec<u32>,
        palette: Palette,
        extra: HashMap<(u32, u32, u32), Value>,
        metadata: Metadata,
    ) -> Result<Self> {
        let (nx, ny, nz) = dims;
        let cells = nx
            .checked_mul(ny)
            .and_then(|v| v.checked_mul(nz))
            .ok_or_else(|| Error::Shape("体积超出寻址范围".to_string()))?;
        if indices.len() != cells {
            return Err(Error::Shape(format!(
                "索引数组长度 {} 与维度 {}x{}x{} 不符",
                indices.len(),
                nx,
                ny,
                nz
            )));
        }
        let limit = palette.len() as u32;
        if let Some(&bad) = indices.iter().find(|&&i| i >= limit) {
            return Err(Error::Palette(format!(
                "索引 {} 超出调色板长度 {}",
                bad, limit
            )));
        }
        for &(x, y, z) in extra.keys() {
            if x as usize >= nx || y as usize >= ny || z as usize >= nz {
                return Err(Error::Shape(format!(
                    "扩展数据坐标 ({}, {}, {}) 越界",
                    x, y, z
                )));
            }
        }
        Ok(Self {
            dims,
            indices,
            palette,
            extra,
            metadata,
        })
    }

    /// 零体积结构（空白）
    pub fn empty(source: Option<Format>) -> Self {
        Self {
            dims: (0, 0, 0),
            indices: Vec::new(),
            palette: Palette::air(),
            extra: HashMap::new(),
            metadata: Metadata::new(source),
        }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    /// 单元格总数
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn extra(&self) -> &HashMap<(u32, u32, u32), Value> {
        &self.extra
    }

    /// 坐标到索引数组下标
    pub fn cell_index(&self, x: usize, y: usize, z: usize) -> usize {
        let (nx, _, nz) = self.dims;
        (y * nz + z) * nx + x
    }

    /// 读取坐标处的方块状态
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<&BlockState> {
        let (nx, ny, nz) = self.dims;
        if x >= nx || y >= ny || z >= nz {
            return None;
        }
        let idx = self.indices[self.cell_index(x, y, z)];
        self.palette.get(idx)
    }

    /// 按固定顺序遍历所有单元格
    pub fn iter_blocks(&self) -> impl Iterator<Item = ((usize, usize, usize), &BlockState)> {
        let (nx, ny, nz) = self.dims;
        let palette = &self.palette;
        let indices = &self.indices;
        (0..ny).flat_map(move |y| {
            (0..nz).flat_map(move |z| {
                (0..nx).map(move |x| {
                    let idx = indices[(y * nz + z) * nx + x];
                    ((x, y, z), &palette.entries[idx as usize])
                })
            })
        })
    }

    /// 非空气单元格数量
    pub fn count_blocks(&self) -> usize {
        self.indices
            .iter()
            .filter(|&&i| {
                self.palette
                    .get(i)
                    .map(|s| !s.is_air())
                    .unwrap_or(false)
            })
            .count()
    }
}
