use anyhow::{Context, Result};
use caremap_format::ranges::RangeSet;
use caremap_format::{CareMap, RecordLayout};
use std::fs;
use std::path::Path;

/// Convert a legacy text care map into a binary frame
pub fn legacy_to_binary(input: &Path, output: &Path, layout: RecordLayout) -> Result<()> {
    let content = fs::read_to_string(input)
        .with_context(|| format!("Failed to read care map: {}", input.display()))?;

    // Legacy care maps may or may not end with a newline; an empty file is
    // an empty, valid map
    let trimmed = content.trim_end();
    let lines: Vec<&str> = if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('\n').collect()
    };

    let map = CareMap::from_legacy_lines(&lines, layout)?;
    log_partitions(&map);

    let bytes = map.to_bytes()?;
    fs::write(output, bytes)
        .with_context(|| format!("Failed to write care map: {}", output.display()))?;

    tracing::info!(
        "Converted {} partition(s) to the binary layout",
        map.partitions.len()
    );
    Ok(())
}

/// Convert a binary care map frame back into the legacy text layout
pub fn binary_to_legacy(input: &Path, output: &Path) -> Result<()> {
    let bytes = fs::read(input)
        .with_context(|| format!("Failed to read care map: {}", input.display()))?;

    let map = CareMap::from_bytes(&bytes)?;
    log_partitions(&map);

    let text = map.to_legacy()?;
    fs::write(output, text)
        .with_context(|| format!("Failed to write care map: {}", output.display()))?;

    tracing::info!(
        "Converted {} partition(s) to the legacy layout",
        map.partitions.len()
    );
    Ok(())
}

/// Per-partition diagnostics; a range string the parser cannot read is
/// reported but never fatal, and never alters the converted output
fn log_partitions(map: &CareMap) {
    for partition in &map.partitions {
        match RangeSet::parse(&partition.ranges) {
            Ok(ranges) => tracing::debug!(
                "Partition {}: {} block(s) ({} bytes) across {} range(s)",
                partition.name,
                ranges.block_count(),
                ranges.byte_count(),
                ranges.pairs().len(),
            ),
            Err(why) => tracing::debug!(
                "Partition {}: block ranges left unparsed: {}",
                partition.name,
                why
            ),
        }
    }
}
