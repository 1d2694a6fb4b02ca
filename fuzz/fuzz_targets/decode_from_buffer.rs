#![no_main]

use libfuzzer_sys::fuzz_target;
use resize_op::{ResizeTask, TaskLimits};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // Strict limits keep decompression bombs out of the fuzzer's memory budget
    let mut task = ResizeTask::from_bytes(data.to_vec());
    task.set_limits(TaskLimits::strict());
    let _ = task.run();
});
