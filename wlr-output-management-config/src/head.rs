use std::str::FromStr;

use miette::miette;

use crate::utils::Scale;

/// Virtual output exposed by the headless server.
#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct Head {
    #[knuffel(argument)]
    pub name: String,
    #[knuffel(child, unwrap(argument))]
    pub description: Option<String>,
    #[knuffel(child)]
    pub physical_size: Option<PhysicalSize>,
    #[knuffel(child)]
    pub off: bool,
    #[knuffel(child)]
    pub position: Option<Position>,
    #[knuffel(child, unwrap(argument, str), default = Transform::Normal)]
    pub transform: Transform,
    #[knuffel(child, unwrap(argument))]
    pub scale: Option<Scale>,
    #[knuffel(children(name = "mode"))]
    pub modes: Vec<Mode>,
}

/// Size in millimeters.
#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalSize {
    #[knuffel(argument)]
    pub width: i32,
    #[knuffel(argument)]
    pub height: i32,
}

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    #[knuffel(property)]
    pub x: i32,
    #[knuffel(property)]
    pub y: i32,
}

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    #[knuffel(argument, str)]
    pub mode: ModeSpec,
    #[knuffel(property, default)]
    pub preferred: bool,
    #[knuffel(property, default)]
    pub current: bool,
}

/// `WIDTHxHEIGHT[@REFRESH]`, refresh in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSpec {
    pub width: i32,
    pub height: i32,
    /// Refresh rate in mHz.
    pub refresh: i32,
}

/// Output transform, counter-clockwise.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    #[default]
    Normal,
    _90,
    _180,
    _270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl FromStr for ModeSpec {
    type Err = miette::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (size, refresh) = match s.split_once('@') {
            Some((size, refresh)) => (size, Some(refresh)),
            None => (s, None),
        };

        let Some((width, height)) = size.split_once('x') else {
            return Err(miette!("no 'x' separator found"));
        };

        let width = width
            .parse::<i32>()
            .map_err(|_| miette!("error parsing width"))?;
        let height = height
            .parse::<i32>()
            .map_err(|_| miette!("error parsing height"))?;
        if width <= 0 || height <= 0 {
            return Err(miette!("width and height must be positive"));
        }

        let refresh = match refresh {
            Some(refresh) => {
                let hz = refresh
                    .parse::<f64>()
                    .map_err(|_| miette!("error parsing refresh rate"))?;
                if !(hz.is_finite() && hz > 0. && hz < 1000.) {
                    return Err(miette!("refresh rate must be between 0 and 1000 Hz"));
                }
                (hz * 1000.).round() as i32
            }
            None => 60_000,
        };

        Ok(Self {
            width,
            height,
            refresh,
        })
    }
}

impl FromStr for Transform {
    type Err = miette::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "90" => Ok(Self::_90),
            "180" => Ok(Self::_180),
            "270" => Ok(Self::_270),
            "flipped" => Ok(Self::Flipped),
            "flipped-90" => Ok(Self::Flipped90),
            "flipped-180" => Ok(Self::Flipped180),
            "flipped-270" => Ok(Self::Flipped270),
            _ => Err(miette!(concat!(
                r#"invalid transform, can be "90", "180", "270", "#,
                r#""flipped", "flipped-90", "flipped-180" or "flipped-270""#
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_mode() {
        assert_eq!(
            "1920x1080@59.94".parse::<ModeSpec>().unwrap(),
            ModeSpec {
                width: 1920,
                height: 1080,
                refresh: 59940,
            }
        );
        assert_eq!(
            "800x600".parse::<ModeSpec>().unwrap(),
            ModeSpec {
                width: 800,
                height: 600,
                refresh: 60000,
            }
        );

        assert!("1920".parse::<ModeSpec>().is_err());
        assert!("1920x".parse::<ModeSpec>().is_err());
        assert!("-1x1080".parse::<ModeSpec>().is_err());
        assert!("1920x1080@".parse::<ModeSpec>().is_err());
        assert!("1920x1080@0".parse::<ModeSpec>().is_err());
    }

    #[test]
    fn parse_transform() {
        assert_eq!("normal".parse::<Transform>().unwrap(), Transform::Normal);
        assert_eq!("270".parse::<Transform>().unwrap(), Transform::_270);
        assert_eq!(
            "flipped-180".parse::<Transform>().unwrap(),
            Transform::Flipped180
        );
        assert!("flipped90".parse::<Transform>().is_err());
    }
}
