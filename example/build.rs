use std::path::{Path, PathBuf};
use tlvgen::{build::compile_to_dir, Target};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let schema = Path::new("schema/demo.rpc");
    println!("cargo:rerun-if-changed={}", schema.display());

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    compile_to_dir(schema, &out_dir, Target::Rust)?;
    Ok(())
}
