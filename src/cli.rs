use crate::config::AppConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;

const SUPPORTED_FLAGS: &str =
    "--width, --height, --vsync, --model, --design, --assets, --zones, --export-dir, --debug-overlays";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    width: Option<u32>,
    height: Option<u32>,
    vsync: Option<bool>,
    model: Option<String>,
    design: Option<String>,
    assets: Option<String>,
    zones: Option<String>,
    export_dir: Option<String>,
    debug_overlays: Option<bool>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "width" => {
                    overrides.width =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid width '{value}'"))?);
                }
                "height" => {
                    overrides.height =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid height '{value}'"))?);
                }
                "vsync" => overrides.vsync = Some(parse_bool_flag("vsync", &value)?),
                "model" => overrides.model = Some(non_empty("model", value)?),
                "design" => overrides.design = Some(non_empty("design", value)?),
                "assets" => overrides.assets = Some(non_empty("assets", value)?),
                "zones" => overrides.zones = Some(non_empty("zones", value)?),
                "export-dir" => overrides.export_dir = Some(non_empty("export-dir", value)?),
                "debug-overlays" => overrides.debug_overlays = Some(parse_bool_flag("debug-overlays", &value)?),
                _ => bail!("Unknown flag '{flag}'. Supported flags: {SUPPORTED_FLAGS}."),
            }
        }
        Ok(overrides)
    }

    pub fn into_config_overrides(self) -> AppConfigOverrides {
        AppConfigOverrides {
            width: self.width,
            height: self.height,
            vsync: self.vsync,
            model_id: self.model,
            design_id: self.design,
            assets_dir: self.assets,
            zones_file: self.zones,
            export_dir: self.export_dir,
            debug_overlays: self.debug_overlays,
        }
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

fn non_empty(flag: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        bail!("Flag --{flag} requires a non-empty value");
    }
    Ok(value)
}
