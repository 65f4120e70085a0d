//! Panorama VR viewer
//!
//! Run with:
//!   cargo run -- --texture pano.jpg
//!   cargo run --features openvr -- --texture pano.jpg
//!   cargo run -- --fake-hmd --stereo over-under --texture stereo_pano.jpg

use clap::Parser;
use panorama_vr::{
    renderer::PanoramaRenderer,
    resources::{MeshTopology, PoleMode, SphereOptions},
    stereo::StereoLayout,
    vr::{self, FakeVrRuntime, VrRuntime},
    window, ViewerConfig,
};
use std::path::PathBuf;

/// Index layout of the sphere mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliTopology {
    /// Two triangles per grid cell.
    #[default]
    List,
    /// One strip joined with degenerate triangles.
    Strip,
}

impl From<CliTopology> for MeshTopology {
    fn from(cli: CliTopology) -> Self {
        match cli {
            CliTopology::List => MeshTopology::TriangleList,
            CliTopology::Strip => MeshTopology::TriangleStrip,
        }
    }
}

/// How the panorama image carries its views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliStereo {
    /// Same image for both eyes.
    #[default]
    Mono,
    /// Left eye in the top half, right eye in the bottom half.
    OverUnder,
}

impl From<CliStereo> for StereoLayout {
    fn from(cli: CliStereo) -> Self {
        match cli {
            CliStereo::Mono => StereoLayout::Mono,
            CliStereo::OverUnder => StereoLayout::OverUnder,
        }
    }
}

/// 360° panorama viewer for VR headsets.
#[derive(Parser, Debug)]
#[command(
    name = "panorama-vr",
    about = "Show an equirectangular panorama in a VR headset",
    long_about = "Maps an equirectangular panorama onto the inside of a sphere and renders it\n\
        into a SteamVR headset (build with --features openvr).\n\
        \n\
        Without a headset the viewer shows a flat preview in the window.",
    version
)]
struct Args {
    /// Equirectangular panorama image. A checkerboard is shown when omitted.
    #[arg(long, short)]
    texture: Option<PathBuf>,

    /// Sphere radius in meters.
    #[arg(long, default_value = "2.0")]
    radius: f32,

    /// Vertices per latitude row.
    #[arg(long, default_value = "64")]
    width_segments: u32,

    /// Number of latitude rows.
    #[arg(long, default_value = "32")]
    height_segments: u32,

    /// Index layout of the sphere mesh.
    #[arg(long, default_value = "list", value_enum)]
    topology: CliTopology,

    /// Snap pole rows onto the axis and drop their zero-area triangles.
    #[arg(long)]
    collapse_poles: bool,

    /// Degrees to turn the panorama around the vertical axis.
    #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
    yaw: f32,

    /// Layout of the panorama image.
    #[arg(long, default_value = "mono", value_enum)]
    stereo: CliStereo,

    /// Simulate a headset instead of connecting to a VR runtime.
    #[arg(long)]
    fake_hmd: bool,

    /// Initial window width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Enable vertical sync for the desktop window.
    #[arg(long)]
    vsync: bool,

    /// Near clip distance.
    #[arg(long, default_value = "0.1")]
    near: f32,

    /// Far clip distance.
    #[arg(long, default_value = "5.0")]
    far: f32,

    /// Samples per pixel of the eye targets, 1 or 4.
    #[arg(long, default_value = "4", value_parser = clap::value_parser!(u32).range(1..=4))]
    msaa: u32,

    /// Exit after rendering N frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

impl From<Args> for ViewerConfig {
    fn from(args: Args) -> Self {
        let poles = if args.collapse_poles {
            PoleMode::Collapse
        } else {
            PoleMode::Preserve
        };

        Self {
            width: args.width,
            height: args.height,
            vsync: args.vsync,
            texture_path: args.texture,
            sphere: SphereOptions::new(args.radius, args.width_segments, args.height_segments)
                .with_topology(args.topology.into())
                .with_poles(poles),
            near: args.near,
            far: args.far,
            msaa_samples: args.msaa,
            stereo_layout: args.stereo.into(),
            yaw_degrees: args.yaw,
            max_frames: args.max_frames,
            ..Default::default()
        }
    }
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    let runtime: Box<dyn VrRuntime> = if args.fake_hmd {
        Box::new(FakeVrRuntime::new())
    } else {
        vr::default_runtime()
    };
    log::info!("Using {} VR runtime", runtime.name());

    let config = ViewerConfig::from(args);

    let renderer = match PanoramaRenderer::new(config.clone(), runtime) {
        Ok(renderer) => renderer,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Failed to set up viewer: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = window::run(&config, renderer) {
        log::error!("{}", e);
        eprintln!("Viewer failed: {}", e);
        std::process::exit(1);
    }
}
