#![no_main]
use libfuzzer_sys::fuzz_target;
use exigram::options::{Alignment, ExiOptions};

fuzz_target!(|data: &[u8]| {
    // Beliebige Bytes: der Decoder darf nur Fehler liefern, nie paniken
    let _ = exigram::decode(data, None);

    let aligned = ExiOptions::default().with_alignment(Alignment::ByteAlignment);
    let _ = exigram::decoder::decode_with_options(data, &aligned, None);
});
