// src/ops.rs
//
// Transform parameters. Cheap to create and store - the expensive work happens in run().

/// Fit-within bounding box. The image is scaled uniformly so neither side exceeds the box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizeSpec {
    pub width: u32,
    pub height: u32,
}

impl ResizeSpec {
    /// Returns None when either bound is zero: a zero box means "no resize requested".
    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            None
        } else {
            Some(Self { width, height })
        }
    }
}

/// Target aspect ratio for a centered crop, expressed as width:height.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropSpec {
    pub width: f64,
    pub height: f64,
}

impl CropSpec {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    pub fn ratio(&self) -> f64 {
        self.width / self.height
    }
}

/// JPEG quality in [0.0, 1.0].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JpegQuality(f32);

impl JpegQuality {
    pub const DEFAULT: JpegQuality = JpegQuality(0.85);

    /// Stores the raw value; clamping happens when the quality is used.
    pub fn new(value: f32) -> Self {
        Self(value)
    }

    pub fn get(&self) -> f32 {
        self.0
    }

    /// Clamp to [0, 1]. NaN falls back to the default.
    pub fn clamped(&self) -> f32 {
        if self.0.is_nan() {
            Self::DEFAULT.0
        } else {
            self.0.clamp(0.0, 1.0)
        }
    }

    /// Quality on the 0-100 scale used by libjpeg.
    pub fn as_percent(&self) -> u8 {
        (self.clamped() * 100.0).round() as u8
    }
}

impl Default for JpegQuality {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Options that shape the decoded input and the encoded output.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodingOptions {
    pub quality: JpegQuality,
    /// Copy the source ICC profile into the JPEG output
    pub preserve_icc: bool,
    /// Apply the EXIF Orientation tag right after decoding
    pub auto_orient: bool,
}

impl Default for EncodingOptions {
    fn default() -> Self {
        Self {
            quality: JpegQuality::DEFAULT,
            preserve_icc: false,
            auto_orient: true,
        }
    }
}

/// The geometric work a task performs. Resize always runs before crop.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TransformPlan {
    pub resize: Option<ResizeSpec>,
    pub crop: Option<CropSpec>,
}

/// EXIF orientation (tag 0x0112), values 1-8.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Normal,
    FlipH,
    Rotate180,
    FlipV,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl Orientation {
    pub fn from_exif(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Normal),
            2 => Some(Self::FlipH),
            3 => Some(Self::Rotate180),
            4 => Some(Self::FlipV),
            5 => Some(Self::Transpose),
            6 => Some(Self::Rotate90),
            7 => Some(Self::Transverse),
            8 => Some(Self::Rotate270),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_spec_zero_is_no_resize() {
        assert_eq!(ResizeSpec::new(0, 100), None);
        assert_eq!(ResizeSpec::new(100, 0), None);
        assert_eq!(
            ResizeSpec::new(10, 20),
            Some(ResizeSpec {
                width: 10,
                height: 20
            })
        );
    }

    #[test]
    fn crop_spec_validity() {
        assert!(CropSpec::new(16.0, 9.0).is_valid());
        assert!(!CropSpec::new(0.0, 5.0).is_valid());
        assert!(!CropSpec::new(-1.0, 1.0).is_valid());
        assert!(!CropSpec::new(f64::NAN, 1.0).is_valid());
        assert!(!CropSpec::new(1.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn jpeg_quality_clamps_on_use() {
        assert_eq!(JpegQuality::new(1.7).clamped(), 1.0);
        assert_eq!(JpegQuality::new(-0.2).clamped(), 0.0);
        assert_eq!(JpegQuality::new(f32::NAN).clamped(), 0.85);
        assert_eq!(JpegQuality::new(1.7).get(), 1.7);
        assert_eq!(JpegQuality::new(1.0).as_percent(), 100);
        assert_eq!(JpegQuality::default().as_percent(), 85);
    }

    #[test]
    fn orientation_from_exif() {
        assert_eq!(Orientation::from_exif(6), Some(Orientation::Rotate90));
        assert_eq!(Orientation::from_exif(0), None);
        assert_eq!(Orientation::from_exif(9), None);
    }
}
