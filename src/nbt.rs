//! NBT 容器通用工具
//!
//! gzip 封装、紧凑 JSON 桥接、调色板索引打包以及标签树取值辅助。

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use fastnbt::{ByteArray, IntArray, LongArray, Value};
use serde_json::{json, Map, Value as JsonValue};

use crate::error::{Error, Result};

/// gzip 魔数
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// 输入为 gzip 时透明解压，否则原样返回
pub fn maybe_gunzip(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() >= 2 && data[..2] == GZIP_MAGIC {
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::format(format!("gzip 解压失败: {}", e)))?;
        Ok(out)
    } else {
        Ok(data.to_vec())
    }
}

/// gzip 压缩
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// 解压并解析 NBT 根复合标签
pub fn read_compound(data: &[u8]) -> Result<HashMap<String, Value>> {
    let raw = maybe_gunzip(data)?;
    match fastnbt::from_bytes::<Value>(&raw)? {
        Value::Compound(map) => Ok(map),
        _ => Err(Error::format("根标签不是复合标签")),
    }
}

/// 序列化复合标签并 gzip 压缩
pub fn write_compound(map: HashMap<String, Value>) -> Result<Vec<u8>> {
    let bytes = fastnbt::to_bytes(&Value::Compound(map))?;
    gzip(&bytes)
}

// ============== 标签树取值辅助 ==============

pub fn get_int(map: &HashMap<String, Value>, key: &str) -> Result<i32> {
    match map.get(key) {
        Some(Value::Int(v)) => Ok(*v),
        Some(Value::Short(v)) => Ok(*v as i32),
        Some(Value::Byte(v)) => Ok(*v as i32),
        Some(Value::Long(v)) => Ok(*v as i32),
        _ => Err(Error::format(format!("缺少整数字段: {}", key))),
    }
}

pub fn get_str<'a>(map: &'a HashMap<String, Value>, key: &str) -> Result<&'a str> {
    match map.get(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(Error::format(format!("缺少字符串字段: {}", key))),
    }
}

pub fn get_compound<'a>(
    map: &'a HashMap<String, Value>,
    key: &str,
) -> Result<&'a HashMap<String, Value>> {
    match map.get(key) {
        Some(Value::Compound(c)) => Ok(c),
        _ => Err(Error::format(format!("缺少复合字段: {}", key))),
    }
}

pub fn get_list<'a>(map: &'a HashMap<String, Value>, key: &str) -> Result<&'a [Value]> {
    match map.get(key) {
        Some(Value::List(l)) => Ok(l),
        _ => Err(Error::format(format!("缺少列表字段: {}", key))),
    }
}

/// 读取 {x, y, z} 复合标签为坐标
pub fn get_xyz(map: &HashMap<String, Value>) -> Result<(i32, i32, i32)> {
    Ok((get_int(map, "x")?, get_int(map, "y")?, get_int(map, "z")?))
}

/// 校验文件声明的维度乘积不溢出，返回单元格总数
pub fn checked_volume(nx: usize, ny: usize, nz: usize) -> Result<usize> {
    nx.checked_mul(ny)
        .and_then(|v| v.checked_mul(nz))
        .ok_or_else(|| {
            Error::format(format!("尺寸 {}x{}x{} 超出寻址范围", nx, ny, nz))
        })
}

// ============== 方块状态字符串 ==============

/// 解析 `minecraft:lever[face=floor,facing=north]` 形式的状态串
pub fn parse_state_name(s: &str) -> Result<(String, BTreeMap<String, String>)> {
    let mut properties = BTreeMap::new();
    let Some(open) = s.find('[') else {
        return Ok((s.to_string(), properties));
    };
    if !s.ends_with(']') {
        return Err(Error::format(format!("状态串缺少右括号: {}", s)));
    }
    let name = s[..open].to_string();
    let body = &s[open + 1..s.len() - 1];
    if !body.is_empty() {
        for pair in body.split(',') {
            let mut it = pair.splitn(2, '=');
            let key = it.next().unwrap_or("").trim();
            let value = it
                .next()
                .ok_or_else(|| Error::format(format!("状态属性缺少值: {}", pair)))?
                .trim();
            if key.is_empty() {
                return Err(Error::format(format!("状态属性缺少键: {}", pair)));
            }
            properties.insert(key.to_string(), value.to_string());
        }
    }
    Ok((name, properties))
}

/// 格式化为 `name[k=v,...]` 形式，无属性时仅输出名称
pub fn format_state_name(name: &str, properties: &BTreeMap<String, String>) -> String {
    if properties.is_empty() {
        return name.to_string();
    }
    let body: Vec<String> = properties.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}[{}]", name, body.join(","))
}

// ============== 调色板索引打包 ==============

/// 将调色板索引打包进 64 位长整型数组，条目可跨越边界
pub fn pack_indices(indices: &[u32], bits: usize) -> Vec<i64> {
    let total_bits = indices.len() * bits;
    let mut longs = vec![0u64; (total_bits + 63) / 64];
    let mask = (1u64 << bits) - 1;

    for (i, &index) in indices.iter().enumerate() {
        let value = index as u64 & mask;
        let bit_index = i * bits;
        let start = bit_index / 64;
        let offset = bit_index % 64;
        longs[start] |= value << offset;
        let end = (bit_index + bits - 1) / 64;
        if end != start {
            longs[end] |= value >> (64 - offset);
        }
    }

    longs.into_iter().map(|v| v as i64).collect()
}

/// 解包打包的调色板索引
pub fn unpack_indices(longs: &[i64], bits: usize, count: usize) -> Result<Vec<u32>> {
    let needed = (count * bits + 63) / 64;
    if longs.len() < needed {
        return Err(Error::format(format!(
            "打包数据过短: 需要 {} 个长整型, 实际 {}",
            needed,
            longs.len()
        )));
    }
    let mask = (1u64 << bits) - 1;
    let mut out = Vec::with_capacity(count);

    for i in 0..count {
        let bit_index = i * bits;
        let start = bit_index / 64;
        let offset = bit_index % 64;
        let value = if offset + bits <= 64 {
            (longs[start] as u64 >> offset) & mask
        } else {
            let low = longs[start] as u64 >> offset;
            let high = (longs[start + 1] as u64) << (64 - offset);
            (low | high) & mask
        };
        out.push(value as u32);
    }
    Ok(out)
}

// ============== 变长整数（Sponge BlockData） ==============

/// 解码无符号 LEB128 序列，数量不足或过长时报告字节偏移
pub fn read_varints(data: &[i8], count: usize) -> Result<Vec<u32>> {
    let mut out = Vec::with_capacity(count);
    let mut pos = 0usize;

    while out.len() < count {
        let mut value: u32 = 0;
        let mut shift = 0u32;
        loop {
            if pos >= data.len() {
                return Err(Error::format_at("变长整数数据被截断", Some(pos as u64)));
            }
            let byte = data[pos] as u8;
            pos += 1;
            value |= ((byte & 0x7f) as u32) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 28 {
                return Err(Error::format_at("变长整数过长", Some(pos as u64)));
            }
        }
        out.push(value);
    }
    Ok(out)
}

/// 编码为无符号 LEB128 序列
pub fn write_varints(values: &[u32]) -> Vec<i8> {
    let mut out = Vec::with_capacity(values.len());
    for &v in values {
        let mut v = v;
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            out.push(byte as i8);
            if v == 0 {
                break;
            }
        }
    }
    out
}

// ============== NBT 与 JSON 桥接 ==============

/// 将 fastnbt Value 转换为紧凑 JSON 格式
///
/// 类型后缀（b/s/L/f）与数组前缀（B;/I;/L;）保证无损还原。
pub fn nbt_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Byte(v) => JsonValue::String(format!("{}b", v)),
        Value::Short(v) => JsonValue::String(format!("{}s", v)),
        Value::Int(v) => JsonValue::Number((*v).into()),
        Value::Long(v) => JsonValue::String(format!("{}L", v)),
        Value::Float(v) => JsonValue::String(format!("{}f", v)),
        Value::Double(v) => {
            if let Some(n) = serde_json::Number::from_f64(*v) {
                JsonValue::Number(n)
            } else {
                JsonValue::String(format!("{}d", v))
            }
        }
        Value::String(s) => {
            if is_type_like_string(s) {
                JsonValue::String(format!("{}\\0", s))
            } else {
                JsonValue::String(s.clone())
            }
        }
        Value::ByteArray(arr) => {
            let bytes: Vec<u8> = arr.iter().map(|&b| b as u8).collect();
            JsonValue::String(format!("B;{}", BASE64.encode(&bytes)))
        }
        Value::IntArray(arr) => {
            let mut bytes = Vec::with_capacity(arr.len() * 4);
            for &v in arr.iter() {
                bytes.extend_from_slice(&v.to_be_bytes());
            }
            JsonValue::String(format!("I;{}", BASE64.encode(&bytes)))
        }
        Value::LongArray(arr) => {
            let mut bytes = Vec::with_capacity(arr.len() * 8);
            for &v in arr.iter() {
                bytes.extend_from_slice(&v.to_be_bytes());
            }
            JsonValue::String(format!("L;{}", BASE64.encode(&bytes)))
        }
        Value::List(list) => {
            if list.is_empty() {
                json!({"[]": "End"})
            } else {
                JsonValue::Array(list.iter().map(nbt_to_json).collect())
            }
        }
        Value::Compound(map) => {
            let obj: Map<String, JsonValue> = map
                .iter()
                .map(|(k, v)| (k.clone(), nbt_to_json(v)))
                .collect();
            JsonValue::Object(obj)
        }
    }
}

/// 检查字符串是否看起来像类型标记，需要转义
fn is_type_like_string(s: &str) -> bool {
    if s.len() < 2 {
        return false;
    }
    if let Some(last) = s.chars().last() {
        if matches!(last, 'b' | 's' | 'L' | 'f') {
            let prefix = &s[..s.len() - 1];
            if prefix.parse::<f64>().is_ok() {
                return true;
            }
        }
    }
    if s.len() > 2 && s.as_bytes().get(1) == Some(&b';') {
        let first = s.as_bytes()[0];
        if matches!(first, b'B' | b'I' | b'L') {
            return true;
        }
    }
    false
}

/// 将紧凑 JSON 转换回 fastnbt Value
pub fn json_to_nbt(json: &JsonValue) -> Result<Value> {
    match json {
        JsonValue::Object(obj) => {
            // 空列表标记
            if obj.len() == 1 && obj.contains_key("[]") {
                return Ok(Value::List(vec![]));
            }
            let mut map = HashMap::new();
            for (k, v) in obj {
                map.insert(k.clone(), json_to_nbt(v)?);
            }
            Ok(Value::Compound(map))
        }
        JsonValue::Array(arr) => {
            let list: Result<Vec<Value>> = arr.iter().map(json_to_nbt).collect();
            Ok(Value::List(list?))
        }
        JsonValue::String(s) => parse_string_value(s),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    Ok(Value::Int(i as i32))
                } else {
                    Ok(Value::Long(i))
                }
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Double(f))
            } else {
                Ok(Value::Int(0))
            }
        }
        JsonValue::Bool(b) => Ok(Value::Byte(if *b { 1 } else { 0 })),
        JsonValue::Null => Ok(Value::Byte(0)),
    }
}

/// 解析可能带类型标记的字符串值
fn parse_string_value(s: &str) -> Result<Value> {
    if s.ends_with("\\0") {
        return Ok(Value::String(s[..s.len() - 2].to_string()));
    }

    if s.len() > 2 && s.as_bytes().get(1) == Some(&b';') {
        let prefix = s.as_bytes()[0];
        let b64 = &s[2..];
        let bytes = BASE64
            .decode(b64)
            .map_err(|e| Error::format(format!("数组字段 base64 解码失败: {}", e)))?;

        match prefix {
            b'B' => {
                let arr: Vec<i8> = bytes.iter().map(|&b| b as i8).collect();
                return Ok(Value::ByteArray(ByteArray::new(arr)));
            }
            b'I' => {
                if bytes.len() % 4 != 0 {
                    return Err(Error::format(format!(
                        "整型数组字段长度 {} 不是 4 的倍数",
                        bytes.len()
                    )));
                }
                let arr: Vec<i32> = bytes
                    .chunks(4)
                    .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                return Ok(Value::IntArray(IntArray::new(arr)));
            }
            b'L' => {
                if bytes.len() % 8 != 0 {
                    return Err(Error::format(format!(
                        "长整型数组字段长度 {} 不是 8 的倍数",
                        bytes.len()
                    )));
                }
                let arr: Vec<i64> = bytes
                    .chunks(8)
                    .map(|c| i64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect();
                return Ok(Value::LongArray(LongArray::new(arr)));
            }
            _ => {}
        }
    }

    if let Some(last) = s.chars().last() {
        if matches!(last, 'b' | 's' | 'L' | 'f') {
            let prefix = &s[..s.len() - 1];
            match last {
                'b' => {
                    if let Ok(v) = prefix.parse::<i8>() {
                        return Ok(Value::Byte(v));
                    }
                }
                's' => {
                    if let Ok(v) = prefix.parse::<i16>() {
                        return Ok(Value::Short(v));
                    }
                }
                'L' => {
                    if let Ok(v) = prefix.parse::<i64>() {
                        return Ok(Value::Long(v));
                    }
                }
                'f' => {
                    if let Ok(v) = prefix.parse::<f32>() {
                        return Ok(Value::Float(v));
                    }
                }
                _ => {}
            }
        }
    }

    Ok(Value::String(s.to_string()))
}
