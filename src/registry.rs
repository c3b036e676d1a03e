//! 方块身份注册表
//!
//! 在各格式的原生方块词汇与全局规范 ID 空间之间做双向翻译。
//! 映射表随库内置，进程内只加载一次，加载后只读，可无锁并发查询。

use std::collections::{BTreeMap, HashMap};

use log::warn;
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::format::Format;
use crate::volume::{BlockId, BlockState, UNKNOWN};

/// 查询失败时的回退策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    /// 未知标识映射为未知方块并记录诊断
    Lenient,
    /// 未知标识直接报错
    Strict,
}

/// 参与查询的映射表种类（优先级单位）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// 当前格式的专用表
    Specific,
    /// 规范方块名称表
    Canonical,
    /// 模组方块表
    Modded,
    /// 旧版数字 ID 表
    Legacy,
}

impl TableKind {
    /// 从配置字符串解析，未知值返回 None
    pub fn parse(s: &str) -> Option<TableKind> {
        match s {
            "specific" => Some(TableKind::Specific),
            "canonical" => Some(TableKind::Canonical),
            "modded" => Some(TableKind::Modded),
            "legacy" => Some(TableKind::Legacy),
            _ => None,
        }
    }
}

/// 查询选项：回退策略 + 映射表优先级
///
/// 默认优先级为「格式专用表优先于通用表」，可通过配置调整。
#[derive(Debug, Clone)]
pub struct LookupOptions {
    pub mode: LookupMode,
    pub precedence: Vec<TableKind>,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            mode: LookupMode::Lenient,
            precedence: vec![TableKind::Specific, TableKind::Canonical, TableKind::Modded],
        }
    }
}

impl LookupOptions {
    pub fn strict() -> Self {
        Self {
            mode: LookupMode::Strict,
            ..Self::default()
        }
    }
}

/// 方块在某一格式中的原始表示
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawBlock {
    /// 命名空间名称 + 属性（Litematic/Schem/Structure/CSV）
    Name {
        name: String,
        properties: BTreeMap<String, String>,
    },
    /// 旧版数字 ID + data 值（Schematica）
    Legacy { id: u8, data: u8 },
    /// BuildPaste 数字 ID
    BuildPaste { id: u32 },
    /// GrabCraft 显示名称
    GrabCraft { name: String },
}

// ============== 映射表 ==============

#[derive(Debug, Deserialize)]
struct RawRow {
    raw: String,
    #[serde(default)]
    props: BTreeMap<String, String>,
    block: String,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

/// 行键控的映射表，同一原始键可有多行，按声明顺序消歧
#[derive(Debug)]
struct MappingTable {
    rows: Vec<RawRow>,
    by_raw: HashMap<String, Vec<usize>>,
}

impl MappingTable {
    fn parse(json: &str, source: &str) -> Self {
        let rows: Vec<RawRow> = serde_json::from_str(json)
            .unwrap_or_else(|e| panic!("内置映射表 {} 损坏: {}", source, e));
        let mut by_raw: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            by_raw.entry(row.raw.clone()).or_default().push(i);
        }
        Self { rows, by_raw }
    }

    /// 最具体匹配：原始属性匹配键数最多的行获胜，平局按声明顺序取先
    fn best(&self, raw: &str, raw_props: Option<&BTreeMap<String, String>>) -> Option<&RawRow> {
        let candidates = self.by_raw.get(raw)?;
        let mut best: Option<(&RawRow, usize)> = None;
        for &i in candidates {
            let row = &self.rows[i];
            let matched = match raw_props {
                Some(props) => {
                    if !row.props.iter().all(|(k, v)| props.get(k) == Some(v)) {
                        continue;
                    }
                    row.props.len()
                }
                None => {
                    if !row.props.is_empty() {
                        continue;
                    }
                    0
                }
            };
            match best {
                Some((_, n)) if n >= matched => {}
                _ => best = Some((row, matched)),
            }
        }
        best.map(|(row, _)| row)
    }
}

// ============== 坐标修正表 ==============

/// GrabCraft 坐标约定与规范约定之间的修正参数
#[derive(Debug, Clone, Deserialize)]
pub struct CoordAdjust {
    /// 各轴平移量（GrabCraft 坐标从 1 开始）
    pub offset: [i32; 3],
    /// 是否交换垂直轴与深度轴
    pub swap_yz: bool,
}

impl CoordAdjust {
    /// 原始坐标 -> 规范坐标
    pub fn to_canonical(&self, raw: (i32, i32, i32)) -> (i32, i32, i32) {
        let (x, y, z) = if self.swap_yz {
            (raw.0, raw.2, raw.1)
        } else {
            raw
        };
        (x + self.offset[0], y + self.offset[1], z + self.offset[2])
    }

    /// 规范坐标 -> 原始坐标
    pub fn from_canonical(&self, c: (i32, i32, i32)) -> (i32, i32, i32) {
        let (x, y, z) = (c.0 - self.offset[0], c.1 - self.offset[1], c.2 - self.offset[2]);
        if self.swap_yz {
            (x, z, y)
        } else {
            (x, y, z)
        }
    }
}

// ============== 注册表 ==============

/// 进程级只读注册表
#[derive(Debug)]
pub struct Registry {
    by_name: HashMap<String, BlockId>,
    by_id: HashMap<BlockId, String>,
    legacy: MappingTable,
    modded: MappingTable,
    buildpaste: MappingTable,
    grabcraft: MappingTable,
    transparency: HashMap<String, bool>,
    coord_adjust: CoordAdjust,
    // 编码方向的反向投影，加载时一次性构建
    legacy_exact: HashMap<BlockState, (u8, u8)>,
    legacy_by_id: HashMap<BlockId, (u8, u8)>,
    buildpaste_by_id: HashMap<BlockId, u32>,
    grabcraft_exact: HashMap<BlockState, String>,
    grabcraft_by_id: HashMap<BlockId, String>,
}

#[derive(Debug, Deserialize)]
struct BlockRow {
    id: BlockId,
    name: String,
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::load_builtin);

/// 全局注册表访问入口，首次调用时完成一次性加载
pub fn registry() -> &'static Registry {
    &REGISTRY
}

impl Registry {
    fn load_builtin() -> Self {
        let blocks: Vec<BlockRow> = serde_json::from_str(include_str!("tables/blocks.json"))
            .unwrap_or_else(|e| panic!("内置方块表损坏: {}", e));
        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();
        for row in &blocks {
            by_name.insert(row.name.clone(), row.id);
            by_id.insert(row.id, row.name.clone());
        }

        let legacy = MappingTable::parse(include_str!("tables/legacy.json"), "legacy");
        let modded = MappingTable::parse(include_str!("tables/modded.json"), "modded");
        let buildpaste = MappingTable::parse(include_str!("tables/buildpaste.json"), "buildpaste");
        let grabcraft = MappingTable::parse(include_str!("tables/grabcraft.json"), "grabcraft");

        let transparency: HashMap<String, bool> =
            serde_json::from_str(include_str!("tables/transparency.json"))
                .unwrap_or_else(|e| panic!("内置透明度表损坏: {}", e));
        let coord_adjust: CoordAdjust =
            serde_json::from_str(include_str!("tables/grabcraft_coords.json"))
                .unwrap_or_else(|e| panic!("内置坐标修正表损坏: {}", e));

        // 反向投影：首个匹配行获胜
        let mut legacy_exact = HashMap::new();
        let mut legacy_by_id = HashMap::new();
        for row in &legacy.rows {
            let Some(&id) = by_name.get(&row.block) else {
                continue;
            };
            let Ok(raw_id) = row.raw.parse::<u8>() else {
                continue;
            };
            let data = row
                .props
                .get("data")
                .and_then(|d| d.parse::<u8>().ok())
                .unwrap_or(0);
            let state = BlockState::with_properties(id, row.properties.clone());
            legacy_exact.entry(state).or_insert((raw_id, data));
            legacy_by_id.entry(id).or_insert((raw_id, data));
        }

        let mut buildpaste_by_id = HashMap::new();
        for row in &buildpaste.rows {
            let (Some(&id), Ok(raw_id)) = (by_name.get(&row.block), row.raw.parse::<u32>()) else {
                continue;
            };
            buildpaste_by_id.entry(id).or_insert(raw_id);
        }

        let mut grabcraft_exact = HashMap::new();
        let mut grabcraft_by_id = HashMap::new();
        for row in &grabcraft.rows {
            let Some(&id) = by_name.get(&row.block) else {
                continue;
            };
            let state = BlockState::with_properties(id, row.properties.clone());
            grabcraft_exact.entry(state).or_insert(row.raw.clone());
            grabcraft_by_id.entry(id).or_insert(row.raw.clone());
        }

        Self {
            by_name,
            by_id,
            legacy,
            modded,
            buildpaste,
            grabcraft,
            transparency,
            coord_adjust,
            legacy_exact,
            legacy_by_id,
            buildpaste_by_id,
            grabcraft_exact,
            grabcraft_by_id,
        }
    }

    /// 宽松模式的回退状态
    pub fn unknown_state(&self) -> BlockState {
        BlockState::new(UNKNOWN)
    }

    /// 规范名称 -> 全局 ID
    pub fn id_of(&self, name: &str) -> Option<BlockId> {
        self.by_name.get(name).copied()
    }

    /// 全局 ID -> 规范名称
    pub fn name_of(&self, id: BlockId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// 透明度标志（供可视化协作方使用，核心不消费）
    pub fn is_transparent(&self, name: &str) -> bool {
        self.transparency.get(name).copied().unwrap_or(false)
    }

    /// GrabCraft 坐标修正参数
    pub fn coord_adjust(&self) -> &CoordAdjust {
        &self.coord_adjust
    }

    fn specific_table(&self, format: Format) -> Option<&MappingTable> {
        match format {
            Format::Schematic => Some(&self.legacy),
            Format::BuildPaste => Some(&self.buildpaste),
            Format::GrabCraft => Some(&self.grabcraft),
            _ => None,
        }
    }

    /// 将原始标识解析为规范方块状态
    ///
    /// 按 `opts.precedence` 依次查表；宽松模式下查不到时回退为未知方块并
    /// 输出诊断，严格模式下返回 `UnknownBlock`。
    pub fn resolve(
        &self,
        format: Format,
        raw: &str,
        raw_props: Option<&BTreeMap<String, String>>,
        opts: &LookupOptions,
    ) -> Result<BlockState> {
        for kind in &opts.precedence {
            let hit = match kind {
                TableKind::Specific => self
                    .specific_table(format)
                    .and_then(|t| self.lookup_table(t, raw, raw_props)),
                TableKind::Canonical => self.by_name.get(raw).map(|&id| {
                    BlockState::with_properties(
                        id,
                        raw_props.cloned().unwrap_or_default(),
                    )
                }),
                TableKind::Modded => self.lookup_table(&self.modded, raw, raw_props),
                TableKind::Legacy => self.lookup_table(&self.legacy, raw, raw_props),
            };
            if let Some(state) = hit {
                return Ok(state);
            }
        }

        match opts.mode {
            LookupMode::Lenient => {
                warn!("未知方块标识 {} (来源格式: {:?})，已替换为未知方块", raw, format);
                Ok(self.unknown_state())
            }
            LookupMode::Strict => Err(Error::UnknownBlock {
                format,
                raw: raw.to_string(),
            }),
        }
    }

    /// 按显式表序列解析（优先级可完全由调用方指定）
    pub fn resolve_in(
        &self,
        format: Format,
        kinds: &[TableKind],
        raw: &str,
        raw_props: Option<&BTreeMap<String, String>>,
        mode: LookupMode,
    ) -> Result<BlockState> {
        let opts = LookupOptions {
            mode,
            precedence: kinds.to_vec(),
        };
        self.resolve(format, raw, raw_props, &opts)
    }

    fn lookup_table(
        &self,
        table: &MappingTable,
        raw: &str,
        raw_props: Option<&BTreeMap<String, String>>,
    ) -> Option<BlockState> {
        // 先精确匹配属性；给定属性匹配不到时退回无属性行
        let row = table
            .best(raw, raw_props)
            .or_else(|| raw_props.and(table.best(raw, None)))?;
        let id = self.by_name.get(&row.block).copied()?;
        Some(BlockState::with_properties(id, row.properties.clone()))
    }

    /// 将规范方块状态投影为目标格式的原始表示
    ///
    /// 无精确条目时退回忽略属性的最近祖先条目，仍无结果时报
    /// `UnrepresentableBlock`。
    pub fn project(&self, format: Format, state: &BlockState) -> Result<RawBlock> {
        match format {
            Format::Litematic | Format::Schem | Format::Structure | Format::Csv => self
                .by_id
                .get(&state.id)
                .map(|name| RawBlock::Name {
                    name: name.clone(),
                    properties: state.properties.clone(),
                })
                .ok_or_else(|| self.unrepresentable(format, state)),
            Format::Schematic => self
                .legacy_exact
                .get(state)
                .or_else(|| self.legacy_by_id.get(&state.id))
                .map(|&(id, data)| RawBlock::Legacy { id, data })
                .ok_or_else(|| self.unrepresentable(format, state)),
            Format::BuildPaste => self
                .buildpaste_by_id
                .get(&state.id)
                .map(|&id| RawBlock::BuildPaste { id })
                .ok_or_else(|| self.unrepresentable(format, state)),
            Format::GrabCraft => self
                .grabcraft_exact
                .get(state)
                .or_else(|| self.grabcraft_by_id.get(&state.id))
                .map(|name| RawBlock::GrabCraft { name: name.clone() })
                .ok_or_else(|| self.unrepresentable(format, state)),
        }
    }

    fn unrepresentable(&self, format: Format, state: &BlockState) -> Error {
        let name = self
            .name_of(state.id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", state.id));
        Error::UnrepresentableBlock {
            format,
            state: crate::nbt::format_state_name(&name, &state.properties),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_name_resolves_with_properties() {
        let opts = LookupOptions::default();
        let state = registry()
            .resolve(
                Format::Schem,
                "minecraft:oak_stairs",
                Some(&props(&[("facing", "west")])),
                &opts,
            )
            .unwrap();
        assert_eq!(Some(state.id), registry().id_of("minecraft:oak_stairs"));
        assert_eq!(state.properties.get("facing").map(String::as_str), Some("west"));
    }

    #[test]
    fn most_specific_legacy_row_wins() {
        let opts = LookupOptions::default();
        let reg = registry();
        let wool = reg
            .resolve(Format::Schematic, "35", Some(&props(&[("data", "14")])), &opts)
            .unwrap();
        assert_eq!(Some(wool.id), reg.id_of("minecraft:red_wool"));
        // data 值无专用行时退回无属性行
        let white = reg
            .resolve(Format::Schematic, "35", Some(&props(&[("data", "7")])), &opts)
            .unwrap();
        assert_eq!(Some(white.id), reg.id_of("minecraft:white_wool"));
    }

    #[test]
    fn canonicalization_is_stable_across_tables() {
        let opts = LookupOptions::default();
        let reg = registry();
        let via_legacy = reg
            .resolve(Format::Schematic, "1", None, &opts)
            .unwrap();
        let via_buildpaste = reg
            .resolve(Format::BuildPaste, "1", None, &opts)
            .unwrap();
        let via_name = reg
            .resolve(Format::Litematic, "minecraft:stone", None, &opts)
            .unwrap();
        assert_eq!(via_legacy, via_buildpaste);
        assert_eq!(via_legacy, via_name);
    }

    #[test]
    fn lenient_falls_back_strict_fails() {
        let reg = registry();
        // "35" 存在于旧版表，但模组表中没有
        let lenient = reg
            .resolve_in(Format::Litematic, &[TableKind::Modded], "35", None, LookupMode::Lenient)
            .unwrap();
        assert_eq!(lenient, reg.unknown_state());

        let strict =
            reg.resolve_in(Format::Litematic, &[TableKind::Modded], "35", None, LookupMode::Strict);
        match strict {
            Err(Error::UnknownBlock { raw, .. }) => assert_eq!(raw, "35"),
            other => panic!("意外结果: {:?}", other),
        }
    }

    #[test]
    fn precedence_order_is_respected() {
        let reg = registry();
        // chisel:granite 只在模组表中；优先级不含模组表时应查不到
        let without = reg.resolve_in(
            Format::Litematic,
            &[TableKind::Canonical],
            "chisel:granite",
            None,
            LookupMode::Strict,
        );
        assert!(matches!(without, Err(Error::UnknownBlock { .. })));

        let with = reg
            .resolve_in(
                Format::Litematic,
                &[TableKind::Canonical, TableKind::Modded],
                "chisel:granite",
                None,
                LookupMode::Strict,
            )
            .unwrap();
        assert_eq!(Some(with.id), reg.id_of("minecraft:granite"));
    }

    #[test]
    fn project_exact_then_ancestor() {
        let reg = registry();
        let stairs_id = reg.id_of("minecraft:oak_stairs").unwrap();
        let east = BlockState::with_properties(stairs_id, props(&[("facing", "east")]));
        assert_eq!(
            reg.project(Format::Schematic, &east).unwrap(),
            RawBlock::Legacy { id: 53, data: 0 }
        );
        // 无精确行时退回忽略属性的祖先行
        let odd = BlockState::with_properties(stairs_id, props(&[("facing", "up")]));
        assert!(matches!(
            reg.project(Format::Schematic, &odd).unwrap(),
            RawBlock::Legacy { id: 53, .. }
        ));
    }

    #[test]
    fn project_unrepresentable() {
        let reg = registry();
        let unknown = reg.unknown_state();
        assert!(matches!(
            reg.project(Format::BuildPaste, &unknown),
            Err(Error::UnrepresentableBlock { .. })
        ));
    }

    #[test]
    fn coord_adjust_roundtrip() {
        let adjust = registry().coord_adjust();
        let raw = (3, 2, 9);
        assert_eq!(adjust.from_canonical(adjust.to_canonical(raw)), raw);
    }

    #[test]
    fn transparency_flags_load() {
        let reg = registry();
        assert!(reg.is_transparent("minecraft:glass"));
        assert!(!reg.is_transparent("minecraft:stone"));
    }
}
