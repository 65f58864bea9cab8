use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    let proto_dir = PathBuf::from("proto");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/");

    // Client stubs drive the limiter; server stubs back the in-process fake used by tests.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .file_descriptor_set_path(out_dir.join("gubernator_descriptor.bin"))
        .compile_protos(&[proto_dir.join("gubernator.proto")], &[&proto_dir])?;

    Ok(())
}
