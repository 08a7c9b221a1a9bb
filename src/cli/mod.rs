//! Command-line interface for the DICOM rendering and redaction tool.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{BlackoutConfig, ColorMode, VoiFunction};
use crate::dicom::{DicomImage, PixelData};
use crate::redaction::{
    redact, redact_baseline_jpeg, redact_encapsulated_frames, rotate_and_flip, JpegRedactionOptions, OverlaySource,
    PixelBuffer, RedactionOptions, RedactionShape, Rotation,
};
use crate::transform::{render, RenderOptions, Window};

/// DICOM Pixel Blackout Tool
///
/// Renders DICOM frames to 8-bit images and blacks out burned-in
/// annotations, losslessly at block level for baseline JPEG.
#[derive(Parser, Debug)]
#[command(name = "medimg-blackout")]
#[command(author = "Medical Imaging Team")]
#[command(version = "0.1.0")]
#[command(about = "DICOM pixel rendering and redaction")]
#[command(long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show pixel attributes of a DICOM file
    Info {
        /// Input DICOM file path
        #[arg(short, long)]
        input: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render frames to PNG
    Render {
        /// Input DICOM file path
        #[arg(short, long)]
        input: PathBuf,

        /// Output PNG path; with --all-frames the frame number is appended
        #[arg(short, long)]
        output: PathBuf,

        /// Frame to render
        #[arg(short, long, default_value = "0")]
        frame: usize,

        /// Render every frame
        #[arg(long, conflicts_with = "frame")]
        all_frames: bool,

        /// VOI function
        #[arg(long, value_enum)]
        function: Option<FunctionArg>,

        /// Window center (requires --width)
        #[arg(long, requires = "width", allow_hyphen_values = true)]
        center: Option<f64>,

        /// Window width (requires --center)
        #[arg(long, requires = "center")]
        width: Option<f64>,

        /// Invert the rendered gray levels
        #[arg(long)]
        invert: bool,

        /// Write grayscale output as RGB
        #[arg(long)]
        rgb: bool,

        /// Index of the VOI window or LUT to use
        #[arg(long, default_value = "0")]
        voi: usize,
    },

    /// Black out rectangles in the pixel data
    Blackout {
        /// Input DICOM file path
        #[arg(short, long)]
        input: PathBuf,

        /// Output path: raw pixel data for native images, JPEG for baseline JPEG
        #[arg(short, long)]
        output: PathBuf,

        /// Rectangle as X,Y,WIDTH,HEIGHT (repeatable)
        #[arg(short, long = "rect", allow_hyphen_values = true)]
        rects: Vec<RedactionShape>,

        /// Only redact this frame
        #[arg(long)]
        frame: Option<usize>,

        /// Burn overlay planes into the pixel data
        #[arg(long)]
        burn_in_overlays: bool,

        /// Explicit background value
        #[arg(long, allow_hyphen_values = true)]
        background: Option<i32>,

        /// Use the pixel padding value as background
        #[arg(long)]
        use_padding: bool,

        /// Gray level of redacted JPEG blocks
        #[arg(long, default_value = "0")]
        gray_level: u8,

        /// Always regenerate JPEG Huffman tables
        #[arg(long)]
        optimize_tables: bool,
    },

    /// Rotate and flip native pixel data
    Rotate {
        /// Input DICOM file path
        #[arg(short, long)]
        input: PathBuf,

        /// Output raw pixel data path
        #[arg(short, long)]
        output: PathBuf,

        /// Clockwise rotation in degrees (multiple of 90)
        #[arg(short, long, default_value = "90", allow_hyphen_values = true)]
        degrees: i32,

        /// Mirror horizontally after rotating
        #[arg(long)]
        flip: bool,
    },

    /// Black out rectangles in a standalone baseline JPEG file
    JpegBlackout {
        /// Input JPEG file path
        #[arg(short, long)]
        input: PathBuf,

        /// Output JPEG file path
        #[arg(short, long)]
        output: PathBuf,

        /// Rectangle as X,Y,WIDTH,HEIGHT (repeatable)
        #[arg(short, long = "rect", required = true, allow_hyphen_values = true)]
        rects: Vec<RedactionShape>,

        /// Gray level of redacted blocks
        #[arg(long, default_value = "0")]
        gray_level: u8,

        /// Always regenerate Huffman tables
        #[arg(long)]
        optimize_tables: bool,
    },
}

/// VOI function argument.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum FunctionArg {
    /// DICOM linear function
    Linear,
    /// Linear ramp without the DICOM offsets
    LinearExact,
    /// Sigmoid
    Sigmoid,
}

impl From<FunctionArg> for VoiFunction {
    fn from(arg: FunctionArg) -> Self {
        match arg {
            FunctionArg::Linear => VoiFunction::LinearDicom,
            FunctionArg::LinearExact => VoiFunction::LinearExact,
            FunctionArg::Sigmoid => VoiFunction::Logistic,
        }
    }
}

/// Run the CLI application.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else if !cli.quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let config = match &cli.config {
        Some(path) => BlackoutConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => BlackoutConfig::default(),
    };
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(config.thread_count())
        .build_global()
    {
        log::debug!("Thread pool already initialized: {}", e);
    }

    match cli.command {
        Commands::Info { input, json } => run_info(&input, json, cli.quiet),
        Commands::Render {
            input,
            output,
            frame,
            all_frames,
            function,
            center,
            width,
            invert,
            rgb,
            voi,
        } => {
            let window = center.zip(width).map(|(c, w)| Window::new(c, w));
            let settings = RenderSettings {
                function: function.map(Into::into).unwrap_or(config.render.function),
                window,
                invert,
                color_mode: if rgb { ColorMode::Rgb } else { config.render.color_mode },
                voi,
            };
            run_render(&input, &output, frame, all_frames, &settings, cli.quiet)
        }
        Commands::Blackout {
            input,
            output,
            rects,
            frame,
            burn_in_overlays,
            background,
            use_padding,
            gray_level,
            optimize_tables,
        } => {
            let mut options = RedactionOptions::from(&config.redaction);
            options.burn_in_overlays |= burn_in_overlays;
            options.use_padding_as_background |= use_padding;
            if background.is_some() {
                options.explicit_background = background;
            }
            let jpeg = JpegRedactionOptions {
                gray_level,
                optimize_tables,
            };
            run_blackout(&input, &output, &rects, frame, &options, &jpeg)
        }
        Commands::Rotate {
            input,
            output,
            degrees,
            flip,
        } => run_rotate(&input, &output, degrees, flip),
        Commands::JpegBlackout {
            input,
            output,
            rects,
            gray_level,
            optimize_tables,
        } => {
            let data = fs::read(&input).with_context(|| format!("Failed to read {}", input.display()))?;
            let options = JpegRedactionOptions {
                gray_level,
                optimize_tables,
            };
            let redacted = redact_baseline_jpeg(&data, &rects, &options)?;
            fs::write(&output, &redacted).with_context(|| format!("Failed to write {}", output.display()))?;
            log::info!("Wrote {} ({} bytes)", output.display(), redacted.len());
            Ok(())
        }
    }
}

fn open(input: &Path) -> anyhow::Result<DicomImage> {
    DicomImage::open(input).with_context(|| format!("Failed to open {}", input.display()))
}

fn progress_bar(len: u64, quiet: bool) -> anyhow::Result<ProgressBar> {
    if quiet || len < 2 {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(len);
    bar.set_style(ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} frames {msg}")?.progress_chars("=> "));
    Ok(bar)
}

/// `output` with `_NNNN` appended to the file stem.
fn numbered_path(output: &Path, index: usize) -> PathBuf {
    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
    let name = match output.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{:04}.{}", stem, index, ext),
        None => format!("{}_{:04}", stem, index),
    };
    output.with_file_name(name)
}

/// Run info command.
fn run_info(input: &Path, json: bool, quiet: bool) -> anyhow::Result<()> {
    let image = open(input)?;
    let summary = image.summary();

    if quiet {
        return Ok(());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let format = &summary.format;
    println!("DICOM Pixel Information");
    println!("=======================");
    println!("File: {}", input.display());
    println!();

    println!("Image Properties:");
    println!("  Dimensions: {}x{}", format.columns, format.rows);
    println!("  Frames: {}", format.number_of_frames);
    println!("  Bits Allocated/Stored/High: {}/{}/{}", format.bits_allocated, format.bits_stored, format.high_bit);
    println!("  Samples/Pixel: {}", format.samples_per_pixel);
    println!("  Photometric: {}", format.photometric_interpretation);
    println!("  Signed: {}", if format.is_signed() { "Yes" } else { "No" });
    if let Some(padding) = format.padding {
        match padding.range_limit {
            Some(limit) => println!("  Padding: {}..{}", padding.value, limit),
            None => println!("  Padding: {}", padding.value),
        }
    }
    println!();

    println!("Transfer Syntax: {}", summary.transfer_syntax);
    println!("  Encapsulated: {}", if summary.encapsulated { "Yes" } else { "No" });
    println!("  Block redaction: {}", if image.is_baseline_jpeg() { "Yes" } else { "No" });
    println!();

    if let Some(modality) = &summary.modality {
        println!("Modality: {}", modality);
    }
    println!("VOI: {} window(s), {} LUT(s)", summary.windows, summary.voi_luts);
    println!("Palette: {}", if summary.palette { "Yes" } else { "No" });
    if !summary.overlay_planes.is_empty() {
        println!("Overlay planes: {:?}", summary.overlay_planes);
    }
    Ok(())
}

/// Rendering choices from the command line.
struct RenderSettings {
    function: VoiFunction,
    window: Option<Window>,
    invert: bool,
    color_mode: ColorMode,
    voi: usize,
}

impl RenderSettings {
    fn options(&self, image: &DicomImage, frame: usize) -> RenderOptions {
        let mut options = image.render_options(frame);
        options.function = self.function;
        options.window = self.window;
        options.inverted ^= self.invert;
        options.color_mode = self.color_mode;
        options.voi_selection = self.voi;
        options
    }
}

/// Run render command.
fn run_render(
    input: &Path,
    output: &Path,
    frame: usize,
    all_frames: bool,
    settings: &RenderSettings,
    quiet: bool,
) -> anyhow::Result<()> {
    let image = open(input)?;
    let mut source = image.frame_source()?;
    let frames: Vec<usize> = if all_frames {
        (0..source.frame_count()).collect()
    } else {
        vec![frame]
    };

    let bar = progress_bar(frames.len() as u64, quiet)?;
    for &index in &frames {
        let raster = source.frame(index)?;
        let rendered = render(
            &raster,
            &image.modality,
            &image.voi,
            image.palette.as_ref(),
            &settings.options(&image, index),
        )?;
        for warning in &rendered.warnings {
            log::warn!("Frame {}: {:?}", index, warning);
        }
        let path = if all_frames {
            numbered_path(output, index)
        } else {
            output.to_path_buf()
        };
        rendered
            .raster
            .save_png(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::debug!("Wrote {}", path.display());
        bar.inc(1);
    }
    bar.finish_and_clear();
    source.close();

    log::info!("Rendered {} frame(s) from {}", frames.len(), input.display());
    Ok(())
}

fn write_pixels(output: &Path, buffer: &PixelBuffer) -> anyhow::Result<()> {
    fs::write(output, &buffer.bytes).with_context(|| format!("Failed to write {}", output.display()))?;
    let format = &buffer.format;
    log::info!(
        "Wrote {} ({} bytes, {}x{}x{}, {} bits allocated, {} stored)",
        output.display(),
        buffer.bytes.len(),
        format.columns,
        format.rows,
        format.number_of_frames,
        format.bits_allocated,
        format.bits_stored
    );
    Ok(())
}

/// Per-frame shape lists: every frame, or only `frame` when given.
fn shapes_per_frame(rects: &[RedactionShape], frames: usize, frame: Option<usize>) -> anyhow::Result<Vec<Vec<RedactionShape>>> {
    match frame {
        Some(index) if index >= frames => bail!("frame {} out of range ({} frame(s))", index, frames),
        Some(index) => Ok((0..frames)
            .map(|i| if i == index { rects.to_vec() } else { Vec::new() })
            .collect()),
        None => Ok(vec![rects.to_vec(); frames]),
    }
}

/// Run blackout command.
fn run_blackout(
    input: &Path,
    output: &Path,
    rects: &[RedactionShape],
    frame: Option<usize>,
    options: &RedactionOptions,
    jpeg: &JpegRedactionOptions,
) -> anyhow::Result<()> {
    let image = open(input)?;

    if let PixelData::Encapsulated(frames) = &image.pixel_data {
        if options.burn_in_overlays {
            log::warn!("Overlay burn-in is not available for compressed pixel data");
        }
        let shapes = shapes_per_frame(rects, frames.len(), frame)?;
        let redacted = redact_encapsulated_frames(&image.transfer_syntax, frames, &shapes, jpeg)?;

        if redacted.len() == 1 {
            fs::write(output, &redacted[0]).with_context(|| format!("Failed to write {}", output.display()))?;
        } else {
            for (index, data) in redacted.iter().enumerate() {
                let path = numbered_path(output, index);
                fs::write(&path, data).with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }
        log::info!("Wrote {} redacted JPEG frame(s)", redacted.len());
        return Ok(());
    }

    let mut source = image.frame_source()?;
    let shapes = shapes_per_frame(rects, source.frame_count(), frame)?;
    let overlays: Option<&dyn OverlaySource> = Some(&image.overlays);
    let buffer = redact(&mut source, &shapes, options, overlays)?;
    source.close();
    write_pixels(output, &buffer)
}

/// Run rotate command.
fn run_rotate(input: &Path, output: &Path, degrees: i32, flip: bool) -> anyhow::Result<()> {
    let image = open(input)?;
    let rotation = Rotation::from_degrees(degrees)?;
    let mut source = image.frame_source()?;
    let buffer = rotate_and_flip(&mut source, rotation, flip)?;
    source.close();
    write_pixels(output, &buffer)
}
