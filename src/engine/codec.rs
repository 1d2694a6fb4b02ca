// src/engine/codec.rs
//
// Injected decode/encode capability. Tasks never call codec libraries directly,
// so the transform core can run against a fake codec in tests.

use crate::engine::common::EngineResult;
use crate::engine::{decoder, encoder};
use image::DynamicImage;

pub trait ImageCodec: Send + Sync {
    /// Decode encoded bytes into a bitmap.
    fn decode(&self, bytes: &[u8]) -> EngineResult<DynamicImage>;

    /// Encode a bitmap as JPEG. `quality` is on the 0-100 scale.
    fn encode(&self, image: &DynamicImage, quality: u8, icc: Option<&[u8]>)
        -> EngineResult<Vec<u8>>;

    fn name(&self) -> &'static str;
}

/// mozjpeg / zune-png / libwebp, with the image crate as the decode fallback.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeCodec;

impl ImageCodec for NativeCodec {
    fn decode(&self, bytes: &[u8]) -> EngineResult<DynamicImage> {
        decoder::decode_image(bytes).map(|(img, _format)| img)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        quality: u8,
        icc: Option<&[u8]>,
    ) -> EngineResult<Vec<u8>> {
        encoder::encode_jpeg(image, quality, icc)
    }

    fn name(&self) -> &'static str {
        "native"
    }
}
