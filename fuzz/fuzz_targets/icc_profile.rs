#![no_main]

//! Fuzz target for ICC profile extraction and re-embedding.

use image::{DynamicImage, RgbImage};
use libfuzzer_sys::fuzz_target;
use resize_op::engine::{embed_icc_jpeg, encode_jpeg, extract_icc_profile};

const PREFIXES: [&[u8]; 3] = [
    &[0xFF, 0xD8],
    &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
    b"RIFF\0\0\0\0WEBP",
];

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }

    let mut profiles = vec![extract_icc_profile(data)];
    for prefix in PREFIXES {
        let mut wrapped = prefix.to_vec();
        wrapped.extend_from_slice(data);
        profiles.push(extract_icc_profile(&wrapped));
    }

    // Anything that validated must survive embedding into a fresh JPEG
    // (single APP2 segment only)
    let Some(icc) = profiles.into_iter().flatten().find(|p| p.len() <= 65_519) else {
        return;
    };
    let img = DynamicImage::ImageRgb8(RgbImage::new(2, 2));
    if let Ok(jpeg) = encode_jpeg(&img, 75, None) {
        if let Ok(with_icc) = embed_icc_jpeg(jpeg, &icc) {
            assert_eq!(extract_icc_profile(&with_icc).as_deref(), Some(icc.as_slice()));
        }
    }
});
