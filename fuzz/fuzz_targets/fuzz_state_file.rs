#![no_main]
use libfuzzer_sys::fuzz_target;
use topoff_traits::SettingsStore;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes in the state file must read as an error or a value, never a panic.
    let Ok(dir) = std::env::temp_dir().canonicalize() else {
        return;
    };
    let path = dir.join(format!("topoff_fuzz_{}.toml", std::process::id()));
    if std::fs::write(&path, data).is_err() {
        return;
    }
    let store = topoff_config::FileStore::new(&path);
    let _ = store.trigger_level_cm();
    if let Ok(Some(s)) = store.schedule() {
        assert!(s.days <= 0x7F && s.hour <= 23 && s.minute <= 59);
    }
    let _ = store.last_trigger();
});
