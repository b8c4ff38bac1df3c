use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Exposes VERGEN_GIT_SHA / VERGEN_BUILD_TIMESTAMP for the build_info metric.
    EmitBuilder::builder().all_build().all_git().emit()?;
    Ok(())
}
