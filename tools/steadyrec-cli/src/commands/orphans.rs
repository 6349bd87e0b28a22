//! List or remove partial files left by interrupted recordings.

use steadyrec_capture_engine::StorageManager;
use steadyrec_common::config::AppConfig;

pub fn run(config: &AppConfig, delete: bool) -> anyhow::Result<()> {
    let storage = StorageManager::from_config(config);
    let orphans = storage.find_orphans()?;

    if orphans.is_empty() {
        println!("No orphaned recordings in {}", storage.output_dir().display());
        return Ok(());
    }

    for path in &orphans {
        if delete {
            std::fs::remove_file(path)?;
            tracing::info!(path = %path.display(), "Removed orphaned recording");
            println!("Removed {}", path.display());
        } else {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            println!("{}  ({size} bytes)", path.display());
        }
    }

    if !delete {
        println!();
        println!("{} orphaned recording(s). Run with --delete to remove.", orphans.len());
    }
    Ok(())
}
