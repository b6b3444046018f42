use super::CliError;
use anyhow::Context;
use serde::Serialize;
use sharm_core::common::{SessionConfig, load_session_config};
use sharm_core::modules::Session;
use sharm_core::modules::crd::PointKind;
use sharm_core::modules::shc::Shc;
use sharm_core::modules::shc::io::{self, ShcFormat, WriteOrder};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub(super) struct GlobalOptions {
    pub(super) config: Option<PathBuf>,
}

impl GlobalOptions {
    pub(super) fn session(&self) -> Result<Session, CliError> {
        let config = match &self.config {
            Some(path) => load_session_config(path).map_err(sharm_core::domain::HarmError::from)?,
            None => SessionConfig::default(),
        };
        Ok(Session::new(config)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(super) enum FormatArg {
    Gfc,
    Mtx,
    Tbl,
    Dov,
    Bin,
}

impl From<FormatArg> for ShcFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Gfc => ShcFormat::Gfc,
            FormatArg::Mtx => ShcFormat::Mtx,
            FormatArg::Tbl => ShcFormat::Tbl,
            FormatArg::Dov => ShcFormat::Dov,
            FormatArg::Bin => ShcFormat::Bin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(super) enum GridArg {
    Gl,
    Dh1,
    Dh2,
}

impl From<GridArg> for PointKind {
    fn from(grid: GridArg) -> Self {
        match grid {
            GridArg::Gl => PointKind::GaussLegendre,
            GridArg::Dh1 => PointKind::DriscollHealy1,
            GridArg::Dh2 => PointKind::DriscollHealy2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub(super) enum OrderArg {
    #[default]
    N,
    M,
}

impl From<OrderArg> for WriteOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::N => WriteOrder::N,
            OrderArg::M => WriteOrder::M,
        }
    }
}

/// Explicit format, else the one implied by the file name.
pub(super) fn resolve_format(path: &Path, explicit: Option<FormatArg>) -> Result<ShcFormat, CliError> {
    explicit.map(ShcFormat::from).or_else(|| ShcFormat::detect(path)).ok_or_else(|| {
        CliError::Usage(format!(
            "cannot tell the coefficient format of '{}'; pass it explicitly",
            path.display()
        ))
    })
}

pub(super) fn read_shc(
    path: &Path,
    format: Option<FormatArg>,
    nmax: Option<usize>,
    epoch: Option<&str>,
) -> Result<Shc, CliError> {
    let format = resolve_format(path, format)?;
    Ok(io::read(path, format, nmax, epoch)?)
}

/// Pretty JSON to `output`, or to stdout without one.
pub(super) fn emit_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value).context("failed to serialize JSON output")?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create '{}'", parent.display()))?;
            }
            fs::write(path, format!("{rendered}\n"))
                .with_context(|| format!("failed to write '{}'", path.display()))?;
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{FormatArg, resolve_format};
    use sharm_core::modules::shc::io::ShcFormat;
    use std::path::Path;

    #[test]
    fn explicit_format_wins_over_extension() {
        let format = resolve_format(Path::new("model.gfc"), Some(FormatArg::Tbl)).expect("format");
        assert_eq!(format, ShcFormat::Tbl);
    }

    #[test]
    fn unknown_extension_is_a_usage_error() {
        let error = resolve_format(Path::new("model.xyz"), None).expect_err("no format");
        assert!(error.to_string().contains("model.xyz"));
    }
}
