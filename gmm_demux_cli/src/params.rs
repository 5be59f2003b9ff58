//! Parameter overrides read from a TOML file.

use anyhow::{Context, Result};
use gmm_demux::{DemuxConfig, FitConfig};
use log::warn;
use std::fmt::Debug;
use std::path::Path;

fn warn_if_changed<T: PartialEq + Debug>(name: &str, default: &T, val: &T) {
    if default != val {
        warn!("using non-default {name} = {val:?}");
    }
}

/// Load the run settings, falling back to the defaults for anything the file omits.
pub(crate) fn load_params(path: Option<&Path>) -> Result<DemuxConfig> {
    let Some(path) = path else {
        return Ok(DemuxConfig::default());
    };
    let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
    let config: DemuxConfig = toml::from_str(&s).with_context(|| path.display().to_string())?;
    report_overrides(&config);
    Ok(config)
}

fn report_overrides(config: &DemuxConfig) {
    let default = DemuxConfig::default();
    warn_if_changed(
        "confidence_threshold",
        &default.confidence_threshold,
        &config.confidence_threshold,
    );
    warn_if_changed("ambiguous_rate", &default.ambiguous_rate, &config.ambiguous_rate);

    let (default, fit): (FitConfig, &FitConfig) = (default.fit, &config.fit);
    warn_if_changed("fit.initial_drop_num", &default.initial_drop_num, &fit.initial_drop_num);
    warn_if_changed(
        "fit.initial_capture_rate",
        &default.initial_capture_rate,
        &fit.initial_capture_rate,
    );
    warn_if_changed("fit.max_iterations", &default.max_iterations, &fit.max_iterations);
    warn_if_changed("fit.tolerance", &default.tolerance, &fit.tolerance);
    warn_if_changed("fit.max_restarts", &default.max_restarts, &fit.max_restarts);
}
