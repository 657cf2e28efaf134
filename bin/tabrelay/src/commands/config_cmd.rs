use tabrelay_core::{Config, Paths};

/// Show the current configuration as pretty-printed JSON.
pub async fn show() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    println!();
    println!("📋 Current Configuration");
    println!("  File: {}", paths.config_file().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Write a default configuration file, refusing to clobber an existing one
/// unless forced.
pub async fn init(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config_file = paths.config_file();

    if config_file.exists() && !force {
        println!("Config already exists at {}", config_file.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    paths.ensure_dirs()?;
    Config::default().save(&config_file)?;
    println!("✅ Wrote default config to {}", config_file.display());
    Ok(())
}
