#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Inbound frames arrive as text; classification must never panic,
    // whatever the server (or a hostile peer) puts on the wire.
    if let Ok(raw) = std::str::from_utf8(data) {
        let _ = chalkcast_client::router::classify(raw);
    }
});
