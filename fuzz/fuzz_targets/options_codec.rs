#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = exigram::bitstream::BitReader::new(data);
    if let Ok(options) = exigram::options_codec::decode(&mut reader) {
        // Dekodierte Options müssen sich wieder kodieren lassen
        let mut writer = exigram::bitstream::BitWriter::new();
        assert!(exigram::options_codec::encode(&mut writer, &options).is_ok());
    }
});
