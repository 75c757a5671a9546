//! `nodu personas`: List the available tutors.

use nodu_core::persona;

pub fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let list: Vec<serde_json::Value> = persona::all()
            .map(|p| {
                serde_json::json!({
                    "key": p.id.as_str(),
                    "alias": p.short_key,
                    "name": p.name,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    println!("📚 Available tutors\n");
    for p in persona::all() {
        let default = if p.id == Default::default() { " (default)" } else { "" };
        println!("  {:<18} {:<10} {}{default}", p.id.as_str(), p.short_key, p.name);
    }
    Ok(())
}
