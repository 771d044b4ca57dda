#![no_main]

use libfuzzer_sys::fuzz_target;
use tlscope_lib::Comparator;

fuzz_target!(|data: &str| {
    // The comparator parser must never panic, and anything it accepts must
    // survive a display/parse round trip.
    if let Ok(cmp) = data.parse::<Comparator>() {
        let rendered = cmp.to_string();
        let back: Comparator = rendered.parse().expect("rendered comparator must re-parse");
        assert_eq!(cmp, back);
    }
});
