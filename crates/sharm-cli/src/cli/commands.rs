use super::CliError;
use super::helpers::*;
use serde::Serialize;
use sharm_core::modules::crd::{PointKind, PointSet};
use sharm_core::modules::shc::io::{self, DEFAULT_DIGITS, ShcFormat, read_gfc_header};
use sharm_core::modules::{RoundTrip, shs};
use std::path::PathBuf;

#[derive(clap::Args)]
pub(super) struct InfoArgs {
    /// Coefficient file
    file: PathBuf,

    /// Input format (guessed from the extension when omitted)
    #[arg(long, value_enum)]
    format: Option<FormatArg>,
}

#[derive(clap::Args)]
pub(super) struct ConvertArgs {
    /// Input coefficient file
    input: PathBuf,

    /// Output coefficient file
    output: PathBuf,

    /// Input format
    #[arg(long, value_enum)]
    from: Option<FormatArg>,

    /// Output format
    #[arg(long, value_enum)]
    to: Option<FormatArg>,

    /// Maximum degree to read and write
    #[arg(long)]
    nmax: Option<usize>,

    /// Loop order of tbl/dov output
    #[arg(long, value_enum, default_value = "n")]
    order: OrderArg,

    /// Epoch `yyyymmdd[.hhmm]` for time-variable gfc models
    #[arg(long)]
    epoch: Option<String>,

    /// Significant digits of text output
    #[arg(long, default_value_t = DEFAULT_DIGITS)]
    digits: usize,
}

#[derive(clap::Args)]
pub(super) struct RescaleArgs {
    /// Input coefficient file
    input: PathBuf,

    /// Output coefficient file
    output: PathBuf,

    /// New geocentric gravitational constant
    #[arg(long)]
    mu: f64,

    /// New reference radius
    #[arg(long)]
    r: f64,

    #[arg(long, value_enum)]
    from: Option<FormatArg>,

    #[arg(long, value_enum)]
    to: Option<FormatArg>,
}

#[derive(clap::Args)]
pub(super) struct DvArgs {
    /// Coefficient file
    file: PathBuf,

    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Maximum degree
    #[arg(long)]
    nmax: Option<usize>,

    /// Report degree amplitudes instead of variances
    #[arg(long)]
    amplitude: bool,

    /// JSON output path (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub(super) enum QuantityArg {
    #[default]
    Value,
    Grad1,
    Grad2,
}

#[derive(clap::Args)]
pub(super) struct SynthArgs {
    /// Coefficient file
    file: PathBuf,

    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Quadrature grid
    #[arg(long, value_enum)]
    grid: GridArg,

    /// Maximum degree (the file's when omitted)
    #[arg(long)]
    nmax: Option<usize>,

    #[arg(long, value_enum, default_value = "value")]
    quantity: QuantityArg,

    /// Sphere radius of the grid (the reference radius when omitted)
    #[arg(long)]
    radius: Option<f64>,

    /// JSON output path (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct RoundtripArgs {
    /// Coefficient file
    file: PathBuf,

    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    #[arg(long, value_enum)]
    grid: GridArg,

    #[arg(long)]
    nmax: Option<usize>,

    /// JSON output path (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct InfoReport {
    path: String,
    format: &'static str,
    nmax: usize,
    mu: f64,
    r: f64,
}

#[derive(Serialize)]
struct DegreeReport {
    nmax: usize,
    mu: f64,
    r: f64,
    quantity: &'static str,
    values: Vec<f64>,
}

#[derive(Serialize)]
struct Component {
    name: &'static str,
    rows: Vec<Vec<f64>>,
}

#[derive(Serialize)]
struct SynthesisReport {
    grid: &'static str,
    nmax: usize,
    radius: f64,
    lat: Vec<f64>,
    lon: Vec<f64>,
    components: Vec<Component>,
}

#[derive(Serialize)]
struct RoundtripReport {
    grid: &'static str,
    nmax: usize,
    max_difference_amplitude: f64,
    difference_amplitudes: Vec<f64>,
}

pub(super) fn run_info_command(args: InfoArgs) -> Result<i32, CliError> {
    let format = resolve_format(&args.file, args.format)?;
    let (nmax, mu, r) = if format == ShcFormat::Gfc {
        let header = read_gfc_header(&args.file)?;
        (header.nmax, header.mu, header.r)
    } else {
        let shc = io::read(&args.file, format, None, None)?;
        (shc.nmax(), shc.mu(), shc.r())
    };
    emit_json(
        &InfoReport {
            path: args.file.display().to_string(),
            format: format.as_str(),
            nmax,
            mu,
            r,
        },
        None,
    )?;
    Ok(0)
}

pub(super) fn run_convert_command(args: ConvertArgs) -> Result<i32, CliError> {
    let shc = read_shc(&args.input, args.from, args.nmax, args.epoch.as_deref())?;
    let format = resolve_format(&args.output, args.to)?;
    let nmax = args.nmax.unwrap_or(shc.nmax()).min(shc.nmax());
    io::write(&shc, nmax, &args.output, format, args.order.into(), args.digits)?;
    Ok(0)
}

pub(super) fn run_rescale_command(args: RescaleArgs) -> Result<i32, CliError> {
    let mut shc = read_shc(&args.input, args.from, None, None)?;
    shc.rescale(args.mu, args.r)?;
    let format = resolve_format(&args.output, args.to)?;
    io::write(&shc, shc.nmax(), &args.output, format, OrderArg::default().into(), DEFAULT_DIGITS)?;
    Ok(0)
}

pub(super) fn run_dv_command(args: DvArgs) -> Result<i32, CliError> {
    let shc = read_shc(&args.file, args.format, args.nmax, None)?;
    let nmax = shc.nmax();
    let (quantity, values) = if args.amplitude {
        ("degree_amplitudes", shc.da(nmax)?)
    } else {
        ("degree_variances", shc.dv(nmax)?)
    };
    emit_json(
        &DegreeReport {
            nmax,
            mu: shc.mu(),
            r: shc.r(),
            quantity,
            values,
        },
        args.output.as_deref(),
    )?;
    Ok(0)
}

fn split_rows(values: Vec<f64>, width: usize) -> Vec<Vec<f64>> {
    if width == 0 {
        return Vec::new();
    }
    values.chunks(width).map(<[f64]>::to_vec).collect()
}

pub(super) fn run_synth_command(args: SynthArgs, options: &GlobalOptions) -> Result<i32, CliError> {
    let session = options.session()?;
    let shc = read_shc(&args.file, args.format, args.nmax, None)?;
    let nmax = shc.nmax();
    let radius = args.radius.unwrap_or(shc.r());
    let kind = PointKind::from(args.grid);
    let grid = PointSet::quadrature(kind, nmax, radius)?;
    let width = grid.row_width();

    let components: Vec<(&'static str, Vec<f64>)> = match args.quantity {
        QuantityArg::Value => vec![("value", shs::point(&grid, &shc, nmax, &session)?)],
        QuantityArg::Grad1 => {
            let [x, y, z] = shs::point_grad1(&grid, &shc, nmax, &session)?;
            vec![("x", x), ("y", y), ("z", z)]
        }
        QuantityArg::Grad2 => {
            let [xx, xy, xz, yy, yz, zz] = shs::point_grad2(&grid, &shc, nmax, &session)?;
            vec![("xx", xx), ("xy", xy), ("xz", xz), ("yy", yy), ("yz", yz), ("zz", zz)]
        }
    };
    emit_json(
        &SynthesisReport {
            grid: kind.as_str(),
            nmax,
            radius,
            lat: grid.lat().to_vec(),
            lon: grid.lon().to_vec(),
            components: components
                .into_iter()
                .map(|(name, values)| Component {
                    name,
                    rows: split_rows(values, width),
                })
                .collect(),
        },
        args.output.as_deref(),
    )?;
    Ok(0)
}

pub(super) fn run_roundtrip_command(args: RoundtripArgs, options: &GlobalOptions) -> Result<i32, CliError> {
    let session = options.session()?;
    let shc = read_shc(&args.file, args.format, args.nmax, None)?;
    let nmax = shc.nmax();
    let kind = PointKind::from(args.grid);
    let grid = PointSet::quadrature(kind, nmax, shc.r())?;
    let back = grid.round_trip(&shc, nmax, &session)?;
    let difference_amplitudes = shc.dda(&back, nmax)?;
    let max_difference_amplitude = difference_amplitudes.iter().copied().fold(0.0, f64::max);
    tracing::info!(grid = kind.as_str(), nmax, max_difference_amplitude, "round trip finished");
    emit_json(
        &RoundtripReport {
            grid: kind.as_str(),
            nmax,
            max_difference_amplitude,
            difference_amplitudes,
        },
        args.output.as_deref(),
    )?;
    Ok(0)
}
