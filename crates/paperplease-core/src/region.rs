//! Image-region descriptors and their resolution to clipped pixel boxes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RegionError {
    #[error("region value is not finite")]
    NotFinite,
    #[error("region is empty: right/bottom must exceed left/top")]
    Empty,
}

/// A rectangular area of a ticket image.
///
/// Serialised with a `kind` tag:
/// `{"kind": "percentage", "left": 0.0, "top": 0.78, "right": 0.5, "bottom": 0.82}` or
/// `{"kind": "pixels", "left": 0, "top": 800, "width": 600, "height": 200}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Region {
    /// Fractions of image width (left/right) and height (top/bottom).
    Percentage {
        left: f64,
        top: f64,
        right: f64,
        bottom: f64,
    },
    /// Absolute offsets and extent in pixels.
    Pixels {
        left: i64,
        top: i64,
        width: i64,
        height: i64,
    },
}

/// Absolute box within image bounds; `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }
}

impl Region {
    /// Resolve to a pixel box clipped to `[0, width] x [0, height]`.
    ///
    /// Returns `None` when the clipped box has no area.
    pub fn resolve(&self, width: u32, height: u32) -> Option<PixelBox> {
        let (left, top, right, bottom) = match *self {
            Region::Percentage {
                left,
                top,
                right,
                bottom,
            } => (
                scale(left, width),
                scale(top, height),
                scale(right, width),
                scale(bottom, height),
            ),
            Region::Pixels {
                left,
                top,
                width: w,
                height: h,
            } => (left, top, left.saturating_add(w), top.saturating_add(h)),
        };

        let bx = PixelBox {
            left: clip(left, width),
            top: clip(top, height),
            right: clip(right, width),
            bottom: clip(bottom, height),
        };
        (bx.right > bx.left && bx.bottom > bx.top).then_some(bx)
    }

    /// Reject descriptors that can never resolve to a non-empty box.
    pub fn validate(&self) -> Result<(), RegionError> {
        match *self {
            Region::Percentage {
                left,
                top,
                right,
                bottom,
            } => {
                if ![left, top, right, bottom].iter().all(|v| v.is_finite()) {
                    return Err(RegionError::NotFinite);
                }
                if right <= left || bottom <= top {
                    return Err(RegionError::Empty);
                }
            }
            Region::Pixels { width, height, .. } => {
                if width <= 0 || height <= 0 {
                    return Err(RegionError::Empty);
                }
            }
        }
        Ok(())
    }
}

// Truncates toward zero; NaN maps to 0.
fn scale(fraction: f64, extent: u32) -> i64 {
    (fraction * extent as f64) as i64
}

fn clip(value: i64, max: u32) -> u32 {
    value.clamp(0, max as i64) as u32
}

/// The three areas of the ticket layout the analyzer reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// "by <Name> <Initial> <Role>" line, bottom-left.
    pub name: Region,
    /// Ticket number and date, top-right.
    pub header: Region,
    /// Handwritten signature, below the name line and above the footer.
    pub signature: Region,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: Region::Percentage {
                left: 0.0,
                top: 0.78,
                right: 0.50,
                bottom: 0.82,
            },
            header: Region::Percentage {
                left: 0.60,
                top: 0.025,
                right: 0.99,
                bottom: 0.06,
            },
            // Left side only: payment details sit on the right.
            signature: Region::Percentage {
                left: 0.01,
                top: 0.82,
                right: 0.45,
                bottom: 0.94,
            },
        }
    }
}

impl RegionConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn validate(&self) -> Result<(), RegionError> {
        self.name.validate()?;
        self.header.validate()?;
        self.signature.validate()
    }
}
