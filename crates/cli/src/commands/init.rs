//! `kiln init`: write a default config file.

use kiln_config::EngineConfig;

pub async fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = EngineConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("Created config directory: {}", config_dir.display());
    }

    if config_path.exists() && !force {
        println!("Config already exists at: {}", config_path.display());
        println!("Edit it manually or re-run with --force.");
        return Ok(());
    }

    std::fs::write(&config_path, EngineConfig::default_toml())?;
    println!("Wrote {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set backend.model (run `kiln models` to see what is installed)");
    println!("  2. Run: kiln doctor");
    println!("  3. Run: kiln chat");

    Ok(())
}
