#![no_main]
use libfuzzer_sys::fuzz_target;
use exigram::options::ExiOptions;

fuzz_target!(|data: &[u8]| {
    let mut reader = exigram::bitstream::BitReader::new(data);
    let _ = exigram::header::decode(&mut reader, &ExiOptions::default());
});
