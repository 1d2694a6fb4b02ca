#![no_main]

//! Fuzz target for EXIF orientation detection on arbitrary data.

use libfuzzer_sys::fuzz_target;
use resize_op::engine::detect_exif_orientation;

fuzz_target!(|data: &[u8]| {
    let _ = detect_exif_orientation(data);
});
