use anyhow::Result;
use caremap_format::RecordLayout;
use clap::Parser;
use std::path::PathBuf;
use tracing::Level;

mod convert;

#[derive(Parser)]
#[command(name = "caremap-tool")]
#[command(about = "Converts a care map between the legacy text layout and the binary frame")]
#[command(version = "0.1.0")]
struct Cli {
    /// Care map to convert
    input_care_map: PathBuf,

    /// Path the converted care map is written to
    output_file: PathBuf,

    /// Expect records without the property id and fingerprint lines
    #[arg(long = "no_fingerprint")]
    no_fingerprint: bool,

    /// Convert a binary care map back to the legacy text layout
    #[arg(short = 'p', long = "parse_proto")]
    parse_proto: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    if cli.parse_proto {
        // The binary frame records its own layout, so --no_fingerprint is
        // ignored on the reverse path
        convert::binary_to_legacy(&cli.input_care_map, &cli.output_file)?;
    } else {
        let layout = RecordLayout::from_fingerprint_enabled(!cli.no_fingerprint);
        convert::legacy_to_binary(&cli.input_care_map, &cli.output_file, layout)?;
    }

    Ok(())
}
