use anyhow::Result;
use clap::{Parser, ValueEnum};
use gen_ext::{
    ENTRY, STREAM_MIN_SIZE, answer_module, app_module, failing_module, far_call_module,
    rel32_module, resident_module, streaming_module,
};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    /// Entry calls the host `get_value()` and returns `{ "Test", value }`
    Answer,
    /// Full descriptor with a start callback
    App,
    /// Entry returns zero
    Failing,
    /// Functions in `.text.iflash` and a table pointing at them
    Resident,
    /// Large `.text` with chunk-straddling relocations
    Streaming,
    /// `BL` to a host function that must be out of range
    FarCall,
    /// An unsupported `R_ARM_REL32`
    Rel32,
}

#[derive(Parser)]
#[command(name = "gen_ext")]
struct Args {
    /// Module to generate
    #[arg(value_enum)]
    kind: Kind,
    /// Output file
    #[arg(short, default_value = "app.llext")]
    output: PathBuf,
    /// `.text` size of the streaming module
    #[arg(long, default_value_t = STREAM_MIN_SIZE)]
    size: usize,
    /// Name in the app module's descriptor
    #[arg(long, default_value = "Demo")]
    name: String,
    /// Entry symbol of the app module
    #[arg(long, default_value = ENTRY)]
    entry: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let bytes = match args.kind {
        Kind::Answer => answer_module()?,
        Kind::App => app_module(&args.name, &args.entry, 0)?,
        Kind::Failing => failing_module()?,
        Kind::Resident => resident_module()?,
        Kind::Streaming => streaming_module(args.size)?,
        Kind::FarCall => far_call_module()?,
        Kind::Rel32 => rel32_module()?,
    };
    std::fs::write(&args.output, &bytes)?;
    println!("{:?}: {} bytes -> {}", args.kind, bytes.len(), args.output.display());
    Ok(())
}
