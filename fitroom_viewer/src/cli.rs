use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use fitroom_scene::FitParams;

#[derive(Parser, Debug)]
#[command(about = "Fits a garment model onto an avatar in an interactive wgpu viewport", version)]
pub struct Args {
    /// Avatar model (.glb or .gltf)
    #[arg(long)]
    pub avatar: Option<PathBuf>,

    /// Garment model fitted onto the avatar
    #[arg(long)]
    pub garment: Option<PathBuf>,

    /// Garment tint as #rrggbb
    #[arg(long, default_value = "#ffffff")]
    pub color: String,

    /// Start with the garment hidden
    #[arg(long)]
    pub hide_garment: bool,

    /// JSON file overriding the fitting constants (scale_factor,
    /// vertical_offset, half_turn, bind_confidence_min)
    #[arg(long)]
    pub fit_preset: Option<PathBuf>,

    /// Camera vertical field of view in degrees
    #[arg(long, default_value_t = 75.0)]
    pub fov: f32,

    /// Decode and fit without opening a window, then print a report
    #[arg(long)]
    pub headless: bool,
}

pub fn load_fit_preset(path: &Path) -> Result<FitParams> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading fit preset {}", path.display()))?;
    let params: FitParams = serde_json::from_str(&data)
        .with_context(|| format!("parsing fit preset {}", path.display()))?;
    Ok(params)
}
