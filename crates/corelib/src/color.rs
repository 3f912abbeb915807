//! Linear RGBA color as written in material scripts ("r g b a").

use std::{fmt, str::FromStr};

use crate::{CoreError, CoreResult};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color from three channels.
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    pub fn channels(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Returns `true` if every channel lies in `[0, 1]`.
    pub fn is_normalized(&self) -> bool {
        self.channels().iter().all(|c| (0.0..=1.0).contains(c))
    }

    /// Checks the channel range, reporting the first offending channel.
    pub fn validate(&self, field: &str) -> CoreResult<()> {
        for (label, value) in ["r", "g", "b", "a"].iter().zip(self.channels()) {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::OutOfRange {
                    field: format!("{field}.{label}"),
                    value,
                });
            }
        }
        Ok(())
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::WHITE
    }
}

impl FromStr for Rgba {
    type Err = CoreError;

    /// Accepts three or four whitespace-separated channels; alpha defaults to 1.
    fn from_str(s: &str) -> CoreResult<Self> {
        let err = || CoreError::Parse {
            what: "color",
            value: s.to_string(),
        };
        let values = s
            .split_whitespace()
            .map(|t| t.parse::<f32>().map_err(|_| err()))
            .collect::<CoreResult<Vec<_>>>()?;
        match values.as_slice() {
            [r, g, b] => Ok(Self::rgb(*r, *g, *b)),
            [r, g, b, a] => Ok(Self::new(*r, *g, *b, *a)),
            _ => Err(err()),
        }
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.r, self.g, self.b, self.a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_four_channels() {
        let c: Rgba = "0.133 0.62 0.714 1".parse().unwrap();
        assert_eq!(c, Rgba::new(0.133, 0.62, 0.714, 1.0));
        assert!(c.is_normalized());
    }

    #[test]
    fn alpha_defaults_to_one() {
        let c: Rgba = "0 0.5648 0.5648".parse().unwrap();
        assert_eq!(c.a, 1.0);
    }

    #[test]
    fn rejects_garbage_and_wrong_arity() {
        assert!("0 0".parse::<Rgba>().is_err());
        assert!("a b c d".parse::<Rgba>().is_err());
        assert!("1 1 1 1 1".parse::<Rgba>().is_err());
    }

    #[test]
    fn display_matches_script_layout() {
        assert_eq!(Rgba::new(0.25, 0.25, 0.25, 1.0).to_string(), "0.25 0.25 0.25 1");
    }

    #[test]
    fn validate_names_channel() {
        let err = Rgba::new(0.5, 1.5, 0.0, 1.0).validate("specular").unwrap_err();
        assert_eq!(
            err,
            CoreError::OutOfRange {
                field: "specular.g".into(),
                value: 1.5
            }
        );
    }
}
