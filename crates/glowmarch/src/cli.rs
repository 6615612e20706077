use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "glowmarch",
    author,
    version,
    about = "Live ReSTIR-GI viewer for raymarched SDF scenes",
    arg_required_else_help = false
)]
pub struct RunArgs {
    /// Scene shader file to render and watch for edits; omit for the
    /// built-in scene.
    #[arg(value_name = "SCENE")]
    pub scene: Option<PathBuf>,

    /// Parameter file (TOML) declaring the scene's tunable uniforms.
    #[arg(long, value_name = "FILE")]
    pub params: Option<PathBuf>,

    /// Window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", default_value = "1280x720")]
    pub size: String,

    /// Directory receiving capture and recording files.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub output: PathBuf,

    /// Start a recording of this many seconds immediately on launch.
    #[arg(long, value_name = "SECONDS")]
    pub record: Option<f32>,

    /// Frame rate of the exported video.
    #[arg(long, value_name = "FPS", default_value_t = 30.0)]
    pub record_fps: f32,

    /// Bitrate of the exported video in kbit/s.
    #[arg(long, value_name = "KBPS", default_value_t = 12_000)]
    pub record_bitrate: u32,

    /// Orbit the camera at this rate (degrees/second) while recording.
    #[arg(long, value_name = "DEG_PER_SEC")]
    pub record_orbit: Option<f32>,

    /// Initial debug view (0 final, 1 albedo, 2 normal, 3 direct,
    /// 4 indirect, 5 sample-count heatmap).
    #[arg(long, value_name = "MODE", default_value_t = 0)]
    pub debug: u32,

    /// Image file bound as the user media texture.
    #[arg(long, value_name = "FILE")]
    pub texture: Option<PathBuf>,
}

pub fn parse() -> RunArgs {
    RunArgs::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in '{value}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in '{value}'"))?;
    if width == 0 || height == 0 {
        return Err(format!("size must be non-zero, got '{value}'"));
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_sizes() {
        assert_eq!(parse_size("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_size("1920X1080").unwrap(), (1920, 1080));
    }

    #[test]
    fn rejects_malformed_sizes() {
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x720").is_err());
        assert!(parse_size("wide x tall").is_err());
    }
}
