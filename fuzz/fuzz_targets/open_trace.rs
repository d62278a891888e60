#![no_main]

use fstq::Trace;
use libfuzzer_sys::fuzz_target;

// Malformed input must come back as an error, never a panic.
fuzz_target!(|data: &[u8]| {
    let Ok(trace) = Trace::from_bytes(data.to_vec()) else {
        return;
    };
    let meta = trace.metadata();
    let names: Vec<String> = trace.variable_names().map(str::to_string).collect();
    for name in names.iter().take(16) {
        let _ = trace.value_at_time(name, meta.start_time as i64);
        let _ = trace.next_time_change(name, meta.start_time as i64);
        let _ = trace.value_changes(name);
    }
});
