#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(xsd) = std::str::from_utf8(data) {
        let _ = exigram::xsd::compile_schema(xsd);
    }
});
