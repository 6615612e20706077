//! Shader parameter model and uniform layout packer.
//!
//! The renderer exposes a dynamically-sized set of scene parameters (floats,
//! colors, vectors) that the host edits at runtime. This crate owns the pure
//! logic around them: the parameter model itself, TOML loading for parameter
//! files, and the byte-layout packer that assigns each parameter an offset
//! inside the fixed-capacity uniform block shared with the WGSL kernels.
//!
//! Packing follows WGSL/std140-compatible rules: scalars are 4-byte aligned
//! and occupy 4 bytes, color/vector parameters are 16-byte aligned and occupy
//! 16 bytes (three components carry data, the fourth is padding). The packer
//! also emits the matching WGSL field declarations so the CPU layout and the
//! shader-side struct cannot drift apart.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors produced while loading or validating a parameter set.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("failed to parse parameter file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid parameter set: {0}")]
    Invalid(String),
}

/// Errors produced by the layout packer.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("packed parameters need {required} bytes but only {limit} are available before the reserved region")]
    Overflow { required: u32, limit: u32 },
    #[error("duplicate parameter key '{0}'")]
    DuplicateKey(String),
    #[error("parameter key '{0}' is not a valid shader identifier")]
    InvalidKey(String),
}

/// Value payload of a single shader parameter.
///
/// The enum is deliberately closed: packing, uniform writes, and WGSL
/// generation all match exhaustively so a new variant cannot be added without
/// touching every consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParamValue {
    Float { value: f32, min: f32, max: f32, step: f32 },
    Color { r: f32, g: f32, b: f32 },
    Vec3 { x: f32, y: f32, z: f32 },
}

impl ParamValue {
    /// Required byte alignment inside the uniform block.
    pub fn alignment(&self) -> u32 {
        match self {
            ParamValue::Float { .. } => 4,
            ParamValue::Color { .. } | ParamValue::Vec3 { .. } => 16,
        }
    }

    /// Bytes occupied inside the uniform block, padding included.
    pub fn size(&self) -> u32 {
        match self {
            ParamValue::Float { .. } => 4,
            ParamValue::Color { .. } | ParamValue::Vec3 { .. } => 16,
        }
    }

    /// Short tag used when comparing parameter-set shapes.
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Float { .. } => ParamKind::Float,
            ParamValue::Color { .. } => ParamKind::Color,
            ParamValue::Vec3 { .. } => ParamKind::Vec3,
        }
    }

    /// WGSL type spelled for the generated uniform struct.
    ///
    /// Color and vector parameters are declared as `vec4<f32>` rather than
    /// `vec3<f32>` so their footprint is exactly the packed 16 bytes.
    pub fn wgsl_type(&self) -> &'static str {
        match self {
            ParamValue::Float { .. } => "f32",
            ParamValue::Color { .. } | ParamValue::Vec3 { .. } => "vec4<f32>",
        }
    }

    fn write_bytes(&self, out: &mut [u8]) {
        match *self {
            ParamValue::Float { value, .. } => {
                out[..4].copy_from_slice(&value.to_le_bytes());
            }
            ParamValue::Color { r, g, b } => write_vec4(out, [r, g, b, 0.0]),
            ParamValue::Vec3 { x, y, z } => write_vec4(out, [x, y, z, 0.0]),
        }
    }
}

fn write_vec4(out: &mut [u8], values: [f32; 4]) {
    for (slot, value) in out[..16].chunks_exact_mut(4).zip(values) {
        slot.copy_from_slice(&value.to_le_bytes());
    }
}

/// Discriminant of a [`ParamValue`], used for shape comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Color,
    Vec3,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Float => f.write_str("float"),
            ParamKind::Color => f.write_str("color"),
            ParamKind::Vec3 => f.write_str("vec3"),
        }
    }
}

/// One named shader parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderParameter {
    pub key: String,
    #[serde(flatten)]
    pub value: ParamValue,
}

impl ShaderParameter {
    pub fn float(key: impl Into<String>, value: f32, min: f32, max: f32, step: f32) -> Self {
        Self {
            key: key.into(),
            value: ParamValue::Float { value, min, max, step },
        }
    }

    pub fn color(key: impl Into<String>, r: f32, g: f32, b: f32) -> Self {
        Self {
            key: key.into(),
            value: ParamValue::Color { r, g, b },
        }
    }

    pub fn vec3(key: impl Into<String>, x: f32, y: f32, z: f32) -> Self {
        Self {
            key: key.into(),
            value: ParamValue::Vec3 { x, y, z },
        }
    }
}

/// Field names the prelude generator claims for itself; parameters must not
/// shadow them inside the shared uniform struct.
const RESERVED_KEYS: [&str; 12] = [
    "resolution", "eye", "target", "pointer", "time", "delta", "frame", "debug_mode", "flags",
    "_reserved", "audio", "u",
];

fn validate_key(key: &str) -> bool {
    let mut chars = key.chars();
    let leading_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    leading_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED_KEYS.contains(&key)
}

/// Ordered collection of shader parameters, loadable from a TOML file:
///
/// ```toml
/// [[param]]
/// key = "glow_strength"
/// type = "float"
/// value = 0.6
/// min = 0.0
/// max = 2.0
/// step = 0.01
///
/// [[param]]
/// key = "floor_tint"
/// type = "color"
/// r = 0.8
/// g = 0.7
/// b = 0.6
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSet {
    #[serde(rename = "param", default)]
    pub params: Vec<ShaderParameter>,
}

impl ParamSet {
    pub fn new(params: Vec<ShaderParameter>) -> Self {
        Self { params }
    }

    /// Parses a parameter file and validates every key.
    pub fn from_toml_str(input: &str) -> Result<Self, ParamError> {
        let set: ParamSet = toml::from_str(input)?;
        for param in &set.params {
            if !validate_key(&param.key) {
                return Err(ParamError::Invalid(format!(
                    "key '{}' is not a valid shader identifier",
                    param.key
                )));
            }
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn get(&self, key: &str) -> Option<&ShaderParameter> {
        self.params.iter().find(|p| p.key == key)
    }

    /// True when `other` has the same keys and kinds in the same order.
    ///
    /// A shape change invalidates the packed layout (and therefore the
    /// compiled uniform struct); a pure value change does not.
    pub fn same_shape(&self, other: &ParamSet) -> bool {
        self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.key == b.key && a.value.kind() == b.value.kind())
    }

    /// Writes every parameter value into `buf` at its packed offset.
    pub fn write_packed(&self, layout: &UniformLayout, buf: &mut [u8]) {
        for param in &self.params {
            if let Some(offset) = layout.offset_of(&param.key) {
                let offset = offset as usize;
                param.value.write_bytes(&mut buf[offset..offset + param.value.size() as usize]);
            }
        }
    }
}

/// Byte layout of the dynamic parameter region inside the uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    entries: Vec<(String, u32)>,
    total_size: u32,
}

impl UniformLayout {
    /// Packs `params` starting at byte `base`, rejecting layouts that would
    /// spill past `limit` (the first byte of the reserved trailing region).
    ///
    /// Offsets are assigned in input order: the running offset is padded up
    /// to each parameter's alignment, then advanced by its size. After the
    /// last parameter the total is padded to the next multiple of 16. The
    /// same list in the same order always yields the same layout; reordering
    /// parameters changes offsets.
    pub fn pack(params: &[ShaderParameter], base: u32, limit: u32) -> Result<Self, LayoutError> {
        let mut entries: Vec<(String, u32)> = Vec::with_capacity(params.len());
        let mut cursor = base;

        for param in params {
            if !validate_key(&param.key) {
                return Err(LayoutError::InvalidKey(param.key.clone()));
            }
            if entries.iter().any(|(key, _)| key == &param.key) {
                return Err(LayoutError::DuplicateKey(param.key.clone()));
            }
            cursor = align_up(cursor, param.value.alignment());
            entries.push((param.key.clone(), cursor));
            cursor += param.value.size();
        }

        let total_size = align_up(cursor, 16);
        if total_size > limit {
            return Err(LayoutError::Overflow {
                required: total_size,
                limit,
            });
        }

        Ok(Self { entries, total_size })
    }

    /// Total padded size in bytes, counted from byte zero of the block.
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn offset_of(&self, key: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(entry_key, _)| entry_key == key)
            .map(|(_, offset)| *offset)
    }

    /// Iterates `(key, offset)` pairs in packed order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(key, offset)| (key.as_str(), *offset))
    }

    /// Emits the WGSL field declarations for the parameter region followed by
    /// the reserved trailing slot at `audio_offset`.
    ///
    /// WGSL's natural layout rules (f32 align 4, vec4 align 16) reproduce the
    /// packer's offsets, so only the gap between the last parameter and the
    /// reserved slot needs explicit padding. `audio_offset` must be the limit
    /// the layout was packed against.
    pub fn wgsl_fields(&self, params: &[ShaderParameter], audio_offset: u32) -> String {
        debug_assert!(self.total_size <= audio_offset);
        let mut out = String::new();
        for param in params {
            out.push_str(&format!("    {}: {},\n", param.key, param.value.wgsl_type()));
        }
        let pad_vec4s = (audio_offset - self.total_size) / 16;
        if pad_vec4s > 0 {
            out.push_str(&format!("    _reserved: array<vec4<f32>, {pad_vec4s}>,\n"));
        }
        out.push_str("    audio: vec4<f32>,\n");
        out
    }
}

fn align_up(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float(key: &str) -> ShaderParameter {
        ShaderParameter::float(key, 0.5, 0.0, 1.0, 0.01)
    }

    #[test]
    fn packs_single_float_after_header() {
        let layout = UniformLayout::pack(&[float("a")], 48, 1008).unwrap();
        assert_eq!(layout.offset_of("a"), Some(48));
        assert_eq!(layout.total_size(), 64);
    }

    #[test]
    fn packs_single_color_at_origin() {
        let params = [ShaderParameter::color("c", 1.0, 0.0, 0.0)];
        let layout = UniformLayout::pack(&params, 0, 1008).unwrap();
        assert_eq!(layout.offset_of("c"), Some(0));
        assert_eq!(layout.total_size(), 16);
    }

    #[test]
    fn pads_float_before_color() {
        let params = [float("a"), ShaderParameter::color("b", 0.0, 0.0, 0.0)];
        let layout = UniformLayout::pack(&params, 0, 1008).unwrap();
        assert_eq!(layout.offset_of("a"), Some(0));
        assert_eq!(layout.offset_of("b"), Some(16));
        assert_eq!(layout.total_size(), 32);
    }

    #[test]
    fn consecutive_floats_pack_tightly() {
        let params = [float("a"), float("b"), float("c")];
        let layout = UniformLayout::pack(&params, 16, 1008).unwrap();
        assert_eq!(layout.offset_of("a"), Some(16));
        assert_eq!(layout.offset_of("b"), Some(20));
        assert_eq!(layout.offset_of("c"), Some(24));
        assert_eq!(layout.total_size(), 32);
    }

    #[test]
    fn reordering_changes_offsets() {
        let forward = [float("a"), ShaderParameter::vec3("v", 0.0, 0.0, 0.0)];
        let backward = [ShaderParameter::vec3("v", 0.0, 0.0, 0.0), float("a")];
        let fwd = UniformLayout::pack(&forward, 0, 1008).unwrap();
        let bwd = UniformLayout::pack(&backward, 0, 1008).unwrap();
        assert_ne!(fwd.offset_of("a"), bwd.offset_of("a"));
    }

    #[test]
    fn rejects_overflow_past_reserved_region() {
        let params: Vec<_> = (0..8)
            .map(|i| ShaderParameter::color(format!("c{i}"), 0.0, 0.0, 0.0))
            .collect();
        let err = UniformLayout::pack(&params, 0, 64).unwrap_err();
        assert_eq!(
            err,
            LayoutError::Overflow {
                required: 128,
                limit: 64
            }
        );
    }

    #[test]
    fn rejects_duplicate_and_invalid_keys() {
        let dup = [float("a"), float("a")];
        assert_eq!(
            UniformLayout::pack(&dup, 0, 1008).unwrap_err(),
            LayoutError::DuplicateKey("a".into())
        );

        let bad = [float("2fast")];
        assert_eq!(
            UniformLayout::pack(&bad, 0, 1008).unwrap_err(),
            LayoutError::InvalidKey("2fast".into())
        );

        let shadow = [float("time")];
        assert_eq!(
            UniformLayout::pack(&shadow, 0, 1008).unwrap_err(),
            LayoutError::InvalidKey("time".into())
        );
    }

    #[test]
    fn writes_values_at_packed_offsets() {
        let params = ParamSet::new(vec![
            float("a"),
            ShaderParameter::color("c", 1.0, 2.0, 3.0),
        ]);
        let layout = UniformLayout::pack(&params.params, 0, 1008).unwrap();
        let mut buf = vec![0u8; layout.total_size() as usize];
        params.write_packed(&layout, &mut buf);

        assert_eq!(f32::from_le_bytes(buf[0..4].try_into().unwrap()), 0.5);
        assert_eq!(f32::from_le_bytes(buf[16..20].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(buf[20..24].try_into().unwrap()), 2.0);
        assert_eq!(f32::from_le_bytes(buf[24..28].try_into().unwrap()), 3.0);
        assert_eq!(f32::from_le_bytes(buf[28..32].try_into().unwrap()), 0.0);
    }

    #[test]
    fn loads_param_file_from_toml() {
        let set = ParamSet::from_toml_str(
            r#"
[[param]]
key = "glow_strength"
type = "float"
value = 0.6
min = 0.0
max = 2.0
step = 0.01

[[param]]
key = "floor_tint"
type = "color"
r = 0.8
g = 0.7
b = 0.6

[[param]]
key = "light_offset"
type = "vec3"
x = 1.0
y = 4.0
z = -2.0
"#,
        )
        .unwrap();

        assert_eq!(set.len(), 3);
        assert!(matches!(
            set.get("glow_strength").unwrap().value,
            ParamValue::Float { value, .. } if value == 0.6
        ));
        assert!(matches!(
            set.get("light_offset").unwrap().value,
            ParamValue::Vec3 { y, .. } if y == 4.0
        ));
    }

    #[test]
    fn rejects_reserved_key_in_toml() {
        let err = ParamSet::from_toml_str(
            r#"
[[param]]
key = "frame"
type = "float"
value = 0.0
min = 0.0
max = 1.0
step = 0.1
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ParamError::Invalid(_)));
    }

    #[test]
    fn shape_comparison_ignores_values() {
        let a = ParamSet::new(vec![float("a"), ShaderParameter::color("c", 0.0, 0.0, 0.0)]);
        let mut b = a.clone();
        if let ParamValue::Float { value, .. } = &mut b.params[0].value {
            *value = 0.9;
        }
        assert!(a.same_shape(&b));

        let c = ParamSet::new(vec![ShaderParameter::color("c", 0.0, 0.0, 0.0), float("a")]);
        assert!(!a.same_shape(&c));
    }

    #[test]
    fn generates_wgsl_fields_with_reserved_tail() {
        let params = vec![float("glow"), ShaderParameter::color("tint", 0.0, 0.0, 0.0)];
        let layout = UniformLayout::pack(&params, 96, 1008).unwrap();
        let fields = layout.wgsl_fields(&params, 1008);

        assert!(fields.contains("glow: f32,"));
        assert!(fields.contains("tint: vec4<f32>,"));
        // 96 -> pad to 112 -> color ends at 128; (1008 - 128) / 16 = 55.
        assert_eq!(layout.total_size(), 128);
        assert!(fields.contains("_reserved: array<vec4<f32>, 55>,"));
        assert!(fields.trim_end().ends_with("audio: vec4<f32>,"));
    }
}
