use std::path::Path;

use filemap_core::FilemapConfig;

use super::run::build_pipeline;

pub fn check(config_path: &str) -> anyhow::Result<()> {
    let config = FilemapConfig::from_file(Path::new(config_path))?;
    // Compiles every transform, so a bad regex fails here rather than mid-run.
    build_pipeline(&config)?;
    println!("{}", describe(&config));
    Ok(())
}

fn describe(config: &FilemapConfig) -> String {
    let pipeline = &config.pipeline;
    let mut out = format!(
        "✓ {} ({} stages, capacity {}, chunk {} bytes, {} input)\n",
        pipeline.name.as_deref().unwrap_or("filemap"),
        config.stages.len(),
        pipeline.channel_capacity(),
        pipeline.chunk_size(),
        if pipeline.stream_input() { "live" } else { "materialized" },
    );
    for (index, stage) in config.stages.iter().enumerate() {
        let convention = match stage.convention.unwrap_or_default() {
            filemap_core::Convention::Sync => "sync",
            filemap_core::Convention::Async => "async",
        };
        let on_error = match config.stage_error_mode(index) {
            filemap_core::ErrorMode::Continue => "continue",
            filemap_core::ErrorMode::Halt => "halt",
        };
        out.push_str(&format!(
            "  {index}. {:<16} {:<10} {convention}, on_error={on_error}\n",
            config.stage_name(index),
            stage.transform.label(),
        ));
    }
    out
}
