#![no_main]
use libfuzzer_sys::fuzz_target;
use exigram::options::ExiOptions;

fuzz_target!(|data: &[u8]| {
    // Decodierte Events müssen sich mit denselben Options wieder kodieren lassen.
    if let Ok((events, opts)) = exigram::decoder::decode_with_options(data, &ExiOptions::default(), None) {
        let exi = exigram::encoder::encode(&events, &opts, None).expect("re-encode decoded events");
        let again = exigram::decode(&exi, None).expect("decode re-encoded stream");
        assert_eq!(again, events);
    }
});
