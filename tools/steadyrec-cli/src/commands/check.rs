//! Check power state and storage.

use steadyrec_capture_engine::{PowerState, StorageManager};
use steadyrec_common::config::{config_file_path, AppConfig};

const MIB: u64 = 1024 * 1024;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("SteadyRec System Check");
    println!("{}", "=".repeat(50));

    println!("[OK] Config: {}", config_file_path().display());

    match PowerState::detect() {
        PowerState::Ac => println!("[OK] Power: AC"),
        PowerState::Battery => {
            println!("[WARN] Power: battery (recordings are capped at 30 fps / 8 Mbps)")
        }
        PowerState::Unknown => println!("[OK] Power: unknown, treated as AC"),
    }

    let storage = StorageManager::from_config(config);
    let dir = storage.output_dir();
    if dir.is_dir() {
        println!("[OK] Output directory: {}", dir.display());
    } else {
        println!(
            "[WARN] Output directory does not exist yet: {}",
            dir.display()
        );
    }

    let threshold = config.storage.min_free_bytes;
    let mut ready = true;
    match storage.free_disk_space() {
        Ok(free) if free < threshold => {
            ready = false;
            println!(
                "[FAIL] Free space: {} MiB (minimum {} MiB)",
                free / MIB,
                threshold / MIB
            );
        }
        Ok(free) => println!("[OK] Free space: {} MiB", free / MIB),
        Err(e) => println!("[WARN] Free space unknown: {e}"),
    }

    let orphans = storage.find_orphans()?;
    if orphans.is_empty() {
        println!("[OK] No interrupted recordings");
    } else {
        println!(
            "[WARN] {} interrupted recording(s), see `steadyrec orphans`",
            orphans.len()
        );
    }

    println!();
    if ready {
        println!("SteadyRec is ready to record.");
    } else {
        println!("Not enough free space to record. See above.");
    }

    Ok(())
}
