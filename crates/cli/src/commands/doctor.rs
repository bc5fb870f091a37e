//! `kiln doctor`: diagnose config and backend health.

use kiln_config::EngineConfig;
use kiln_core::{CancellationToken, ChatBackend};
use kiln_providers::HttpBackend;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("Kiln Doctor");
    println!("===========\n");

    let mut issues = 0;

    let config_path = EngineConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  [warn] No config file, using defaults. Run `kiln init` to create one.");
        issues += 1;
    }

    let config = match EngineConfig::load() {
        Ok(config) => {
            println!("  [ok]   Config valid");
            config
        }
        Err(e) => {
            println!("  [fail] {e}");
            println!("\n  1 issue(s) found. Fix the config and re-run.");
            return Ok(());
        }
    };

    let backend = HttpBackend::from_config(&config.backend);
    match backend.health_check().await {
        Ok(true) => println!("  [ok]   Backend reachable: {}", backend.name()),
        Ok(false) => {
            println!("  [fail] Backend answered with an error: {}", backend.name());
            issues += 1;
        }
        Err(e) => {
            println!(
                "  [fail] {}",
                e.user_message().unwrap_or_else(|| e.to_string())
            );
            issues += 1;
        }
    }

    match config.backend.model.as_deref() {
        None => {
            println!("  [warn] No model selected. Set backend.model or KILN_MODEL.");
            issues += 1;
        }
        Some(model) => match backend.list_models(&CancellationToken::new()).await {
            Ok(models) if models.iter().any(|m| m == model) => {
                println!("  [ok]   Model installed: {model}");
            }
            Ok(_) => {
                println!("  [warn] Model {model} is not listed by the backend");
                issues += 1;
            }
            Err(_) => println!("  [skip] Could not list models"),
        },
    }

    println!();
    if issues == 0 {
        println!("  All checks passed!");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
