//! KDL configuration of the headless output management server.

use std::ffi::OsStr;
use std::path::Path;

use miette::{Context, IntoDiagnostic};
use tracing::debug;

pub mod head;
pub mod utils;

pub use crate::head::{Head, Mode, ModeSpec, PhysicalSize, Position, Transform};
pub use crate::utils::Scale;

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct Config {
    #[knuffel(child, default)]
    pub output_management: OutputManagement,
    #[knuffel(children(name = "head"))]
    pub heads: Vec<Head>,
}

#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct OutputManagement {
    /// Highest protocol version to advertise.
    #[knuffel(child, unwrap(argument), default = 3)]
    pub version: u32,
    #[knuffel(child)]
    pub accept_stale_configurations: bool,
}

impl Default for OutputManagement {
    fn default() -> Self {
        Self {
            version: 3,
            accept_stale_configurations: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> miette::Result<Self> {
        let _span = tracy_client::span!("Config::load");

        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("error reading {path:?}"))?;

        let filename = path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("config.kdl");
        let config = Self::parse(filename, &contents).context("error parsing")?;
        debug!("loaded config from {path:?}");
        Ok(config)
    }

    pub fn parse(filename: &str, text: &str) -> Result<Self, knuffel::Error> {
        let _span = tracy_client::span!("Config::parse");
        knuffel::parse(filename, text)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[track_caller]
    fn parse(text: &str) -> Config {
        Config::parse("test.kdl", text)
            .map_err(miette::Report::new)
            .unwrap()
    }

    #[test]
    fn empty_config_is_default() {
        assert_eq!(parse(""), Config::default());
        assert_eq!(Config::default().output_management.version, 3);
    }

    #[test]
    fn parse_full_config() {
        let config = parse(
            r#"
            output-management {
                version 2
                accept-stale-configurations
            }

            head "DP-1" {
                description "Dell U2720Q"
                physical-size 600 340
                position x=1920 y=0
                transform "flipped-90"
                scale 1.5
                mode "3840x2160@60.000" preferred=true current=true
                mode "1920x1080"
            }

            head "HDMI-A-1" {
                off
                scale 2
            }
            "#,
        );

        assert_eq!(
            config,
            Config {
                output_management: OutputManagement {
                    version: 2,
                    accept_stale_configurations: true,
                },
                heads: vec![
                    Head {
                        name: String::from("DP-1"),
                        description: Some(String::from("Dell U2720Q")),
                        physical_size: Some(PhysicalSize {
                            width: 600,
                            height: 340,
                        }),
                        off: false,
                        position: Some(Position { x: 1920, y: 0 }),
                        transform: Transform::Flipped90,
                        scale: Some(Scale(1.5)),
                        modes: vec![
                            Mode {
                                mode: ModeSpec {
                                    width: 3840,
                                    height: 2160,
                                    refresh: 60000,
                                },
                                preferred: true,
                                current: true,
                            },
                            Mode {
                                mode: ModeSpec {
                                    width: 1920,
                                    height: 1080,
                                    refresh: 60000,
                                },
                                preferred: false,
                                current: false,
                            },
                        ],
                    },
                    Head {
                        name: String::from("HDMI-A-1"),
                        description: None,
                        physical_size: None,
                        off: true,
                        position: None,
                        transform: Transform::Normal,
                        scale: Some(Scale(2.)),
                        modes: vec![],
                    },
                ],
            }
        );
    }

    #[test]
    fn reject_bad_values() {
        assert!(Config::parse("test.kdl", r#"head "DP-1" { transform "sideways"; }"#).is_err());
        assert!(Config::parse("test.kdl", r#"head "DP-1" { scale 11; }"#).is_err());
        assert!(Config::parse("test.kdl", r#"head "DP-1" { scale 0; }"#).is_err());
        assert!(Config::parse("test.kdl", r#"head "DP-1" { scale -0.5; }"#).is_err());
        assert!(Config::parse("test.kdl", r#"head "DP-1" { scale 10; }"#).is_ok());
        assert!(Config::parse("test.kdl", r#"head "DP-1" { mode "0x1080@60"; }"#).is_err());
        assert!(Config::parse("test.kdl", r#"head "DP-1" { mode "wide"; }"#).is_err());
        assert!(Config::parse("test.kdl", r#"heads "DP-1""#).is_err());
    }

    #[test]
    fn load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/wlr-output-management.kdl")).unwrap_err();
        assert!(format!("{err:?}").contains("error reading"));
    }
}
