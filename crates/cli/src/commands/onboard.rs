//! `pursuit onboard`: first-time setup.

use std::path::Path;

use pursuit_config::AppConfig;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    println!("Pursuit: first-time setup\n");

    if let Some(dir) = config_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        println!("  Created config directory: {}", dir.display());
    }

    if config_path.exists() {
        println!("  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete it and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("  Created {}", config_path.display());
    println!("\n  Next steps:");
    println!("    1. Add an API key (or set PURSUIT_API_KEY / OPENROUTER_API_KEY)");
    println!("    2. Point [retrieval] corpus_path at a JSONL export of published sections");
    println!("    3. Run: pursuit ask \"What does Florida Medicaid cover for adult dental?\"\n");

    Ok(())
}
