#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };

    // Parsing must never panic, whatever the board sends
    for channels in [1, 5, 8] {
        if let Ok(amps) = hesperus::sensor::parse_sensor_line(line, channels, 240.0, 4) {
            assert_eq!(amps.len(), channels);
        }
    }
});
