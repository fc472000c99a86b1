use std::path::Path;

use anyhow::bail;
use filemap_core::FilemapConfig;

pub fn init(path: &str, name: Option<&str>, force: bool) -> anyhow::Result<()> {
    let project_path = Path::new(path);
    let output = project_path.join("filemap.toml");

    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let name = match name {
        Some(name) => name.to_string(),
        None => default_name(project_path),
    };
    let config = FilemapConfig::scaffold(&name);
    std::fs::create_dir_all(project_path)?;
    std::fs::write(&output, config.to_toml_string()?)?;
    println!("✓ Generated {}", output.display());

    Ok(())
}

fn default_name(project_path: &Path) -> String {
    project_path
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "filemap".to_string())
}
