use std::path::PathBuf;

use anyhow::Context;
use hydrocell_fluids::{config::SimulationConfig, report::RunTotals, Fluid};
use hydrocell_io::{decode::FluidDataDecoder, encode::FluidDataEncoder};
use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};

pub fn run(config: &SimulationConfig, output: Option<PathBuf>, frames: u64, fps: u32) -> anyhow::Result<()> {
    let mut scene = config.build_scene().context("building scene")?;

    let mut encoder = match output {
        Some(path) => {
            let mut encoder = FluidDataEncoder::new(path.clone(), frames, fps)
                .with_context(|| format!("creating output directory {}", path.display()))?;
            encoder.encode_metadata(&scene)?;
            Some(encoder)
        }
        None => None,
    };

    let bar_template = "Running Simulation {spinner:.green} [{elapsed}] [{bar:50.white/white}] {pos}/{len} ({eta})";
    let style = ProgressStyle::with_template(bar_template)?
        .progress_chars("=> ")
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let progress = ProgressBar::new(frames).with_style(style);

    let mut totals = RunTotals::default();

    for frame in (0..frames).progress_with(progress) {
        let report = scene.step(config.dt).with_context(|| format!("simulating frame {frame}"))?;
        totals.add(&report);

        if let Some(encoder) = encoder.as_mut() {
            encoder.encode_frame(&scene).with_context(|| format!("recording frame {frame}"))?;
        }
    }

    log::info!(
        "finished {frames} frames: {totals}, {} particles still active",
        scene.fluid.active_particles(),
    );

    Ok(())
}

pub fn inspect(path: PathBuf) -> anyhow::Result<()> {
    let mut decoder = FluidDataDecoder::new(path.clone());
    let metadata = decoder
        .decode_metadata()
        .with_context(|| format!("reading metadata from {}", path.display()))?;
    let domain = metadata.domain();

    println!(
        "{} frames at {} fps, {} grid of {} cells from {}",
        metadata.num_frames,
        metadata.fps,
        domain.grid_size,
        domain.cell_length,
        domain.origin,
    );

    let mut frame = 0;
    while let Some(data) = decoder.decode_frame().with_context(|| format!("reading frame {frame}"))? {
        let occupied = data.cells.iter().filter(|c| c.is_occupied()).count();
        let fixed = data.cells.iter().filter(|c| c.is_fixed()).count();
        let max_speed = data.particles.iter().map(|p| p.speed).fold(0.0, f32::max);

        println!(
            "frame {frame}: {} particles, {occupied} occupied cells, {fixed} fixed cells, max speed {max_speed:.3}",
            data.particles.len(),
        );
        frame += 1;
    }

    Ok(())
}
