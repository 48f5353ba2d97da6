#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(xml) = std::str::from_utf8(data) {
        let opts = exigram::ExiOptions::default();
        if let Ok(events) = exigram::parse_xml_events(xml, &opts) {
            if let Ok(exi) = exigram::encoder::encode(&events, &opts, None) {
                let decoded = exigram::decode(&exi, None).expect("decode own output");
                assert_eq!(decoded, events);
            }
        }
    }
});
