fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .file_descriptor_set_path(std::path::PathBuf::from(std::env::var("OUT_DIR")?).join("executor_descriptor.bin"))
        .compile_protos(&["proto/executor.proto"], &["proto"])?;
    Ok(())
}
