mod app;
mod scene;

use std::env;
use std::error::Error;
use std::path::PathBuf;

use scene::{RenderConfig, ShadingMode};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 800;

/// Value following a flag, if there is none the flag is malformed.
fn flag_value<'a>(args: &'a [String], i: usize) -> Result<&'a str, Box<dyn Error>> {
    return match args.get(i + 1) {
        Some(value) => Ok(value.as_str()),
        None => Err(format!("missing value after {}", args[i]).into()),
    };
}

#[show_image::main]
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    // Default values.
    let mut config = RenderConfig {
        width: WIDTH,
        height: HEIGHT,
        ..Default::default()
    };
    let mut asset_path = PathBuf::from("assets/diablo3_pose/diablo3_pose.obj");
    let mut output_path = None;
    let mut print_fps = false;

    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-p" => {
                asset_path = PathBuf::from(flag_value(&args, i)?);
                i += 1;
            }
            "-s" => {
                config.shading = flag_value(&args, i)?.parse::<ShadingMode>()?;
                i += 1;
            }
            "-t" => {
                config.threads = flag_value(&args, i)?.parse::<usize>()?;
                i += 1;
            }
            "-o" => {
                output_path = Some(PathBuf::from(flag_value(&args, i)?));
                i += 1;
            }
            "--fps" => print_fps = true,
            unknown => return Err(format!("unknown argument {}", unknown).into()),
        }
        i += 1;
    }

    let params = app::Params {
        config,
        print_fps,
        asset_path,
        output_path,
    };

    app::run(params)?;

    return Ok(());
}
