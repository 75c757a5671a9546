//! `nodu doctor`: Diagnose system health.

use nodu_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 NODU Doctor — System Diagnostics");
    println!("===================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found");
    } else {
        println!("  ⚠️  No config file, using defaults. Run `nodu onboard` to create one");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    match nodu_store::open(&config.store).await {
        Ok(stores) => println!("  ✅ Store reachable ({})", stores.sessions.name()),
        Err(e) => {
            println!("  ❌ Store unavailable: {e}");
            issues += 1;
        }
    }

    if !config.has_api_key() {
        println!(
            "  ⚠️  No API key configured. Add api_key to config.toml or export GEMINI_API_KEY"
        );
        issues += 1;
    } else {
        let router = nodu_providers::router::build_from_config(&config);
        match router.default() {
            Some(provider) => match provider.health_check().await {
                Ok(true) => println!("  ✅ Provider '{}' reachable", provider.name()),
                Ok(false) => {
                    println!(
                        "  ⚠️  Provider '{}' did not answer the health check",
                        provider.name()
                    );
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ Provider '{}' failed: {e}", provider.name());
                    issues += 1;
                }
            },
            None => {
                println!("  ❌ Unknown provider '{}'", config.default_provider);
                issues += 1;
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
