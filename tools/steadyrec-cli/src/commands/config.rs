//! Show or update the saved configuration.

use std::path::PathBuf;

use steadyrec_common::config::{config_file_path, AppConfig};

pub fn run(
    mut config: AppConfig,
    path: Option<PathBuf>,
    fps: Option<u32>,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(config_file_path);

    if fps.is_none() && output_dir.is_none() {
        println!("# {}", path.display());
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if let Some(fps) = fps {
        config.recording.fps = fps;
        config.recording.normalize();
        if config.recording.fps != fps {
            anyhow::bail!("unsupported fps {fps}, expected 30 or 60");
        }
    }
    if let Some(dir) = output_dir {
        config.output_dir = Some(dir);
    }

    config.save_to(&path)?;
    println!("Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        run(
            AppConfig::default(),
            Some(path.clone()),
            Some(60),
            Some(dir.path().join("out")),
        )
        .unwrap();

        let saved = AppConfig::load_from(&path).unwrap();
        assert_eq!(saved.recording.fps, 60);
        assert_eq!(saved.output_dir, Some(dir.path().join("out")));
    }

    #[test]
    fn test_unsupported_fps_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert!(run(AppConfig::default(), Some(path.clone()), Some(45), None).is_err());
        assert!(!path.exists());
    }
}
