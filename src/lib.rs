//! Minecraft 结构文件多格式转换库
//!
//! 各格式经编解码器汇聚到统一的规范化结构 [`volume::Volume`]，方块身份由
//! 内置注册表翻译到全局 ID 空间，在此基础上提供裁剪、分块等空间操作。

pub mod array;
pub mod buildpaste;
pub mod config;
pub mod csvio;
pub mod error;
pub mod format;
pub mod grabcraft;
pub mod litematic;
pub mod nbt;
pub mod ops;
pub mod registry;
pub mod schem;
pub mod schematic;
pub mod structure;
pub mod volume;

pub use array::{load, ArrayProperties, Grid3};
pub use config::Config;
pub use error::{Error, Result};
pub use format::{decode_auto, Format};
pub use ops::{crop, dice};
pub use registry::{registry, LookupMode, LookupOptions, TableKind};
pub use volume::{BlockId, BlockState, Metadata, Palette, Volume, AIR, UNKNOWN};
