use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use stackreg::config::{load_config_or_default, Config};
use stackreg::stack::init;
use stackreg::{build_stack, store, volume_io, Registration, Stack, StackAligner, StackConfig};

#[derive(Parser)]
#[command(name = "stackreg")]
#[command(about = "Slice-stack registration and volume reconstruction")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a high-resolution slice series against its block series
    /// and write the reconstructed volumes
    Reconstruct {
        /// Directory of low-resolution block images
        #[arg(short, long)]
        block_dir: PathBuf,

        /// Directory of high-resolution slice images
        #[arg(short = 's', long)]
        slice_dir: PathBuf,

        /// Configuration file (TOML or JSON)
        #[arg(short, long)]
        config: Option<String>,

        /// Output directory for volumes and transforms
        #[arg(short, long)]
        output: PathBuf,

        /// Register only the slice at this index
        #[arg(long)]
        slice: Option<usize>,

        /// File listing slice names, one per line (defaults to the
        /// sorted block directory contents)
        #[arg(long)]
        names: Option<PathBuf>,

        /// Run a final deformable pass on a control grid of this many
        /// nodes per axis
        #[arg(long)]
        deformable_grid: Option<usize>,
    },

    /// Compose saved transforms with per-slice adjustments
    Compose {
        /// Directory of original transform files
        #[arg(short = 'O', long)]
        original_dir: PathBuf,

        /// Directory of adjustment transform files
        #[arg(short, long)]
        adjustment_dir: PathBuf,

        /// Output directory for composed transforms
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Apply sparse translation adjustments to a saved stack and
    /// re-emit its volume
    Adjust {
        /// Directory of slice images
        #[arg(short, long)]
        image_dir: PathBuf,

        /// Directory of saved transform files
        #[arg(short, long)]
        transform_dir: PathBuf,

        /// Directory of adjustment files (sparse, matched by basename)
        #[arg(short, long)]
        adjustment_dir: PathBuf,

        /// Configuration file (TOML or JSON)
        #[arg(short, long)]
        config: Option<String>,

        /// Output directory for the updated volume
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .init();

    match cli.command {
        Commands::Reconstruct {
            block_dir,
            slice_dir,
            config,
            output,
            slice,
            names,
            deformable_grid,
        } => {
            handle_reconstruct(block_dir, slice_dir, config, output, slice, names, deformable_grid)?;
        }
        Commands::Compose {
            original_dir,
            adjustment_dir,
            output,
        } => {
            let composed = stackreg::compose::compose_series(&original_dir, &adjustment_dir, &output)?;
            println!("Composed {} transforms into {:?}", composed, output);
        }
        Commands::Adjust {
            image_dir,
            transform_dir,
            adjustment_dir,
            config,
            output,
        } => {
            handle_adjust(image_dir, transform_dir, adjustment_dir, config, output)?;
        }
    }

    Ok(())
}

fn handle_reconstruct(
    block_dir: PathBuf,
    slice_dir: PathBuf,
    config_path: Option<String>,
    output: PathBuf,
    slice: Option<usize>,
    names: Option<PathBuf>,
    deformable_grid: Option<usize>,
) -> anyhow::Result<()> {
    let config = load_config_or_default(config_path.as_deref());
    let file_names = slice_names(&block_dir, names.as_deref())?;
    anyhow::ensure!(!file_names.is_empty(), "no slices found in {:?}", block_dir);

    println!("Building stacks from {} slice pairs...", file_names.len());
    let mut lo_res = build_stack(&StackConfig {
        image_dir: block_dir,
        file_names: file_names.clone(),
        spacings: config.stacks.lo_res_spacings,
        original_spacing: None,
        size: None,
        normalize: config.stacks.normalize,
    })?;
    let mut hi_res = build_stack(&StackConfig {
        image_dir: slice_dir,
        file_names,
        spacings: lo_res.spacings(),
        original_spacing: Some(config.stacks.hi_res_spacings),
        size: Some(lo_res.resampler_size()),
        normalize: config.stacks.normalize,
    })?;

    init::initialize_to_common_centre(&mut hi_res);
    init::set_moving_center_from_fixed(&lo_res, &mut hi_res)?;
    lo_res.update_volumes();

    let mut registration = Registration::new(config.registration_tuning());

    println!("Rigid pass...");
    run_pass(&mut lo_res, &mut hi_res, &mut registration, &config, slice)?;

    println!("Affine pass...");
    init::promote_transforms_to_affine(&mut hi_res)?;
    let mut report = run_pass(&mut lo_res, &mut hi_res, &mut registration, &config, slice)?;

    if let Some(grid) = deformable_grid {
        println!("Deformable pass ({grid}x{grid} grid)...");
        init::initialize_deformable_from_bulk(&lo_res, &mut hi_res, grid)?;
        report = run_pass(&mut lo_res, &mut hi_res, &mut registration, &config, slice)?;
    }

    println!(
        "Registered {} slices ({} skipped, {} unconverged)",
        report.converged_count(),
        report.skipped_count(),
        report.unconverged_count()
    );

    hi_res.update_volumes();

    std::fs::create_dir_all(&output)?;
    volume_io::write_volume(&output.join("block"), lo_res.volume(), lo_res.spacings())?;
    volume_io::write_volume(&output.join("slices"), hi_res.volume(), hi_res.spacings())?;
    volume_io::write_mask_volume(&output.join("slices_mask"), hi_res.mask_volume(), hi_res.spacings())?;

    let transform_dir = output.join("transforms");
    store::save(&hi_res, &transform_dir)?;
    store::save_shrink_counts(&lo_res, &transform_dir)?;
    println!("Wrote volumes and transforms to {:?}", output);

    Ok(())
}

fn run_pass(
    lo_res: &mut Stack,
    hi_res: &mut Stack,
    registration: &mut Registration,
    config: &Config,
    slice: Option<usize>,
) -> anyhow::Result<stackreg::AlignmentReport> {
    let mut aligner = StackAligner::new(lo_res, hi_res, registration, config.driver.clone());
    match slice {
        Some(index) => aligner.align_one(index),
        None => aligner.align(),
    }
}

fn handle_adjust(
    image_dir: PathBuf,
    transform_dir: PathBuf,
    adjustment_dir: PathBuf,
    config_path: Option<String>,
    output: PathBuf,
) -> anyhow::Result<()> {
    let config = load_config_or_default(config_path.as_deref());
    let file_names = slice_names(&image_dir, None)?;
    anyhow::ensure!(!file_names.is_empty(), "no slices found in {:?}", image_dir);

    let mut stack = build_stack(&StackConfig {
        image_dir,
        file_names,
        spacings: config.stacks.lo_res_spacings,
        original_spacing: None,
        size: None,
        normalize: config.stacks.normalize,
    })?;

    store::load(&mut stack, &transform_dir)?;
    let adjusted = store::apply_adjustments(&mut stack, &adjustment_dir)?;
    println!("Applied {} translation adjustments", adjusted);

    stack.update_volumes();
    std::fs::create_dir_all(&output)?;
    volume_io::write_volume(&output.join("adjusted"), stack.volume(), stack.spacings())?;
    volume_io::write_mask_volume(&output.join("adjusted_mask"), stack.mask_volume(), stack.spacings())?;
    println!("Wrote adjusted volume to {:?}", output);

    Ok(())
}

/// Slice series order. An explicit names file wins; otherwise the
/// sorted directory listing defines the series.
fn slice_names(dir: &Path, names_file: Option<&Path>) -> anyhow::Result<Vec<String>> {
    match names_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            Ok(content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect())
        }
        None => {
            let mut names = Vec::new();
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            names.sort();
            Ok(names)
        }
    }
}
