#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = topoff_config::load_toml(data) {
        if cfg.validate().is_ok() {
            // A validated schedule must always be representable.
            let s = cfg.schedule.to_schedule();
            assert!(s.days <= 0x7F && s.hour <= 23 && s.minute <= 59);
        }
    }
});
