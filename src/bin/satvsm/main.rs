//! satvsm CLI - headless soft-shadow rendering and GPU/CPU verification.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use glam::Vec2;
use log::{debug, info, warn};

use satvsm::export::export_exr;
use satvsm::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_DATE: &str = env!("SATVSM_BUILD_DATE");

/// Options shared by every command
#[derive(Default)]
struct Options {
    settings: Option<PathBuf>,
    output: Option<PathBuf>,
    frames: u32,
    view: Option<DebugView>,
    size: Option<u32>,
    workgroup: Option<u32>,
    contact_hardening: bool,
    no_shadows: bool,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            "-V" | "--version" => {
                println!("satvsm {VERSION} (built {BUILD_DATE})");
                return;
            }
            _ => filtered_args.push(arg),
        }
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    let _trace_guard = init_tracing();

    if filtered_args.is_empty() {
        print_usage(&args[0]);
        return;
    }

    let result = parse_options(&filtered_args[1..]).and_then(|opts| match filtered_args[0] {
        "render" | "r" => cmd_render(&opts),
        "verify" | "v" => cmd_verify(&opts),
        "config" | "c" => cmd_config(&opts),
        "help" | "h" | "-h" | "--help" => {
            print_usage(&args[0]);
            Ok(())
        }
        other => bail!("Unknown command: {other}"),
    });

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage(prog: &str) {
    println!("satvsm {VERSION} - summed-area variance soft shadows");
    println!();
    println!("Usage: {} [options] <command> [command options]", prog);
    println!();
    println!("Commands:");
    println!("  r, render   Render the demo scene and export a debug view to EXR");
    println!("  v, verify   Compare the GPU summed-area table and sampler with the CPU reference");
    println!("  c, config   Print settings as JSON (or save with --output)");
    println!("  h, help     Show this help");
    println!();
    println!("Command options:");
    println!("  --settings <file>     Load settings JSON (default: user config dir)");
    println!("  --output <file>       Output path");
    println!("  --frames <n>          Frames to render (default 1)");
    println!("  --view <name>         final | variance | sat-rows | sat");
    println!("  --size <n>            Shadow map resolution");
    println!("  --workgroup <n>       Scan work-group size (power of two)");
    println!("  --contact-hardening   Enable contact hardening");
    println!("  --no-shadows          Disable shadows");
    println!();
    println!("Options:");
    println!("  -v, --verbose  Debug output");
    println!("  -vv, --trace   Trace output (very verbose)");
    println!("  -q, --quiet    Errors only");
    println!("  -V, --version  Print version and build date");
}

fn parse_options(args: &[&str]) -> Result<Options> {
    let mut opts = Options {
        frames: 1,
        ..Default::default()
    };
    let mut it = args.iter();
    while let Some(&arg) = it.next() {
        let mut value = || {
            it.next()
                .copied()
                .with_context(|| format!("{arg} needs a value"))
        };
        match arg {
            "--settings" => opts.settings = Some(PathBuf::from(value()?)),
            "--output" | "-o" => opts.output = Some(PathBuf::from(value()?)),
            "--frames" => opts.frames = value()?.parse().context("--frames")?,
            "--view" => opts.view = Some(value()?.parse()?),
            "--size" => opts.size = Some(value()?.parse().context("--size")?),
            "--workgroup" => opts.workgroup = Some(value()?.parse().context("--workgroup")?),
            "--contact-hardening" => opts.contact_hardening = true,
            "--no-shadows" => opts.no_shadows = true,
            other => bail!("Unknown option: {other}"),
        }
    }
    Ok(opts)
}

fn load_settings(opts: &Options) -> Result<ShadowSettings> {
    let mut settings = match &opts.settings {
        Some(path) => ShadowSettings::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ShadowSettings::load_or_default(),
    };
    if let Some(size) = opts.size {
        settings.shadow_map_size = size;
    }
    if let Some(wg) = opts.workgroup {
        settings.workgroup_size = wg;
    }
    if let Some(view) = opts.view {
        settings.debug_view = view;
    }
    settings.contact_hardening |= opts.contact_hardening;
    settings.enable_shadows &= !opts.no_shadows;
    settings.validate()?;
    Ok(settings)
}

fn build_pipeline(settings: &ShadowSettings) -> Result<ShadowPipeline> {
    let ctx = GpuContext::new_headless().context("creating GPU device")?;
    let mut pipeline = ShadowPipeline::new(ctx, settings)?;
    for mesh in demo_casters() {
        pipeline.add_caster(&mesh)?;
    }
    Ok(pipeline)
}

fn cmd_render(opts: &Options) -> Result<()> {
    let settings = load_settings(opts)?;
    let mut pipeline = build_pipeline(&settings)?;

    let start = std::time::Instant::now();
    for _ in 0..opts.frames.max(1) {
        pipeline.render_frame()?;
    }
    pipeline.context().wait_idle()?;
    info!(
        "Rendered {} frame(s) in {:.2?}",
        pipeline.frame_count(),
        start.elapsed()
    );

    let view = pipeline.debug_view();
    let image = pipeline.read_debug_view(view)?;
    if let Some((lo, hi)) = image.range() {
        info!("{view}: {}x{} values in [{lo}, {hi}]", image.width, image.height);
    }

    let output = opts
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("satvsm_{view}.exr")));
    export_exr(&image, &output)?;
    println!("Wrote {}", output.display());
    Ok(())
}

fn cmd_verify(opts: &Options) -> Result<()> {
    let mut settings = load_settings(opts)?;
    settings.enable_shadows = true;
    let mut pipeline = build_pipeline(&settings)?;

    pipeline.capture()?;
    pipeline.build_sat()?;

    let variance = pipeline.read_variance()?;
    let gpu_sat = pipeline.read_sat()?;
    let cpu_sat = SatBuilder::new(settings.workgroup_size)?.build(&variance);

    let mut max_err = 0.0f32;
    for (g, c) in gpu_sat.texels().iter().zip(cpu_sat.texels()) {
        let scale = c.m1.abs().max(c.m2.abs()).max(1.0);
        max_err = max_err
            .max((g.m1 - c.m1).abs() / scale)
            .max((g.m2 - c.m2).abs() / scale);
    }
    println!("SAT {0}x{0}: max relative error {max_err:.3e}", gpu_sat.size());

    // Sampler on a regular grid of light-space points at several depths
    let sampler = SoftShadowSampler::new(&cpu_sat, settings.penumbra_parameters());
    let mut points = Vec::new();
    for j in 0..32 {
        for i in 0..32 {
            let uv = Vec2::new((i as f32 + 0.5) / 32.0, (j as f32 + 0.5) / 32.0);
            for depth in [0.2, 0.5, 0.8] {
                points.push(LightSpacePoint::new(uv, depth));
            }
        }
    }
    let gpu = pipeline.sample(&points)?;
    let mut max_diff = 0.0f32;
    for (p, g) in points.iter().zip(&gpu) {
        let c = sampler.sample(p);
        let diff = (c - g).abs();
        if diff > 1e-3 {
            debug!("uv {:?} depth {}: cpu {c} gpu {g}", p.uv, p.depth);
        }
        max_diff = max_diff.max(diff);
    }
    println!("Sampler ({} points): max abs difference {max_diff:.3e}", points.len());

    if max_err > 1e-4 || max_diff > 1e-2 {
        warn!("GPU results diverge from the CPU reference");
        bail!("verification failed");
    }
    println!("OK");
    Ok(())
}

fn cmd_config(opts: &Options) -> Result<()> {
    let settings = load_settings(opts)?;
    match &opts.output {
        Some(path) => {
            settings.save(path)?;
            println!("Saved {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&settings)?),
    }
    if let Some(path) = ShadowSettings::default_path() {
        debug!("Default settings path: {}", path.display());
    }
    Ok(())
}

#[cfg(feature = "profiling")]
fn init_tracing() -> Option<tracing_chrome::FlushGuard> {
    use tracing_subscriber::prelude::*;

    if std::env::var("SATVSM_TRACE").ok().as_deref() != Some("1") {
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();

    let subscriber = tracing_subscriber::registry().with(chrome_layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }

    Some(guard)
}

#[cfg(not(feature = "profiling"))]
fn init_tracing() -> Option<()> {
    if std::env::var("SATVSM_TRACE").ok().as_deref() == Some("1") {
        warn!("SATVSM_TRACE=1 needs the `profiling` feature");
    }
    None
}
